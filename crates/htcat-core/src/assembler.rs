//! In-order reassembly: segments complete in arbitrary order, bytes leave
//! in ordinal order.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

use crate::error::HtcatError;
use crate::pool::PoolSlot;
use crate::segment::Segment;

/// The emission loop consumes one queue of tagged events. The channel is a
/// rendezvous, so every sender blocks until the loop has taken its event,
/// and unblocks with an error once the loop has exited and dropped the
/// receiver.
enum Event {
    Register(Segment),
    SetLast(u64),
    Cancel(HtcatError),
}

/// Worker-side surface of the assembler. Cheap to clone; safe to use from
/// any number of threads.
#[derive(Clone)]
pub(crate) struct AssemblerHandle {
    tx: SyncSender<Event>,
    last_alloc: Arc<AtomicU64>,
}

impl AssemblerHandle {
    /// Allocate the next ordinal. Ordinals are dense and start at 1.
    pub(crate) fn next_ordinal(&self) -> u64 {
        self.last_alloc.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn last_allocated(&self) -> u64 {
        self.last_alloc.load(Ordering::Relaxed)
    }

    /// Hand a completed segment to the emission loop. Blocks until the
    /// loop accepts it. Returns false when the loop has already exited, in
    /// which case the segment is closed on the way out.
    pub(crate) fn register(&self, segment: Segment) -> bool {
        self.tx.send(Event::Register(segment)).is_ok()
    }

    /// Tell the emission loop the final ordinal. Dropped silently if the
    /// loop has already exited.
    pub(crate) fn set_last(&self, ordinal: u64) {
        let _ = self.tx.send(Event::SetLast(ordinal));
    }

    /// Inject a sticky error. Blocks until the emission loop has observed
    /// it, so on return no further sink writes will happen, or returns
    /// immediately when the loop has already exited.
    pub(crate) fn cancel(&self, err: HtcatError) {
        let _ = self.tx.send(Event::Cancel(err));
    }
}

/// Single-writer reassembly state. Only `write_to`'s caller touches this;
/// everything worker-facing lives on the handle.
pub(crate) struct Assembler {
    rx: Option<Receiver<Event>>,
    last_written: u64,
    last_ordinal: u64,
    future: HashMap<u64, Segment>,
    cancellation: Option<HtcatError>,
    written: u64,
    pool: PoolSlot,
}

impl Assembler {
    pub(crate) fn new(pool: PoolSlot) -> (Assembler, AssemblerHandle) {
        let (tx, rx) = mpsc::sync_channel(0);
        let handle = AssemblerHandle {
            tx,
            last_alloc: Arc::new(AtomicU64::new(0)),
        };
        let assembler = Assembler {
            rx: Some(rx),
            last_written: 0,
            last_ordinal: 0,
            future: HashMap::new(),
            cancellation: None,
            written: 0,
            pool,
        };
        (assembler, handle)
    }

    /// Run the emission loop, writing the resource to `dst` in order.
    /// Returns the bytes written and the first error, if any. One emission
    /// per assembler; later calls report the sticky outcome without
    /// touching the sink.
    pub(crate) fn write_to<W: Write>(&mut self, dst: &mut W) -> (u64, Option<HtcatError>) {
        if let Some(err) = &self.cancellation {
            return (self.written, Some(err.clone()));
        }
        let Some(rx) = self.rx.take() else {
            return (self.written, None);
        };
        let err = self.run(&rx, dst).err();
        if let Some(err) = &err {
            self.cancellation = Some(err.clone());
        }
        // Dropping the receiver releases any sender still blocked on the
        // rendezvous; their sends turn into no-ops.
        drop(rx);
        if let Some(pool) = self.pool.get() {
            pool.free();
        }
        (self.written, err)
    }

    fn run(&mut self, rx: &Receiver<Event>, dst: &mut dyn Write) -> Result<(), HtcatError> {
        loop {
            // An ordinal of zero means the final ordinal is still unknown
            // and cannot satisfy the exit condition.
            if self.last_ordinal > 0 && self.last_written >= self.last_ordinal {
                return Ok(());
            }
            match rx.recv() {
                Ok(Event::Register(segment)) => {
                    let next = self.last_written + 1;
                    if segment.ord == next {
                        self.drain(rx, dst, segment)?;
                    } else if segment.ord > next {
                        self.future.insert(segment.ord, segment);
                    } else {
                        return Err(retrograde(segment.ord, next));
                    }
                }
                Ok(Event::SetLast(ordinal)) => self.last_ordinal = ordinal,
                Ok(Event::Cancel(err)) => return Err(self.cancel_now(err)),
                Err(_) => {
                    // Every sender is gone without completion or
                    // cancellation. A worker died without reporting.
                    return Err(HtcatError::assert(
                        "event channel closed before the final segment".to_string(),
                    ));
                }
            }
        }
    }

    /// Emit the given segment and then every contiguous successor already
    /// held for the future, checking for pending cancellation between
    /// segments.
    fn drain(
        &mut self,
        rx: &Receiver<Event>,
        dst: &mut dyn Write,
        segment: Segment,
    ) -> Result<(), HtcatError> {
        self.emit(dst, segment)?;
        loop {
            match rx.try_recv() {
                Ok(Event::Cancel(err)) => return Err(self.cancel_now(err)),
                Ok(Event::SetLast(ordinal)) => self.last_ordinal = ordinal,
                Ok(Event::Register(segment)) => {
                    if segment.ord <= self.last_written {
                        let next = self.last_written + 1;
                        return Err(retrograde(segment.ord, next));
                    }
                    self.future.insert(segment.ord, segment);
                }
                Err(_) => {}
            }
            let next = self.last_written + 1;
            match self.future.remove(&next) {
                Some(segment) => self.emit(dst, segment)?,
                None => return Ok(()),
            }
        }
    }

    fn emit(&mut self, dst: &mut dyn Write, mut segment: Segment) -> Result<(), HtcatError> {
        let (n, err) = segment.body.write_to(dst);
        self.written += n;
        if let Some(err) = err {
            return Err(err);
        }
        self.last_written = segment.ord;
        segment.close();
        Ok(())
    }

    fn cancel_now(&mut self, err: HtcatError) -> HtcatError {
        // Discarded early arrivals are closed by drop: pooled buffers come
        // back and the owning workers' close latches release.
        self.future.clear();
        self.cancellation = Some(err.clone());
        err
    }
}

fn retrograde(ord: u64, expected: u64) -> HtcatError {
    HtcatError::assert(format!(
        "retrograde segment {} (expected at least {})",
        ord, expected
    ))
}
