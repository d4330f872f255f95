//! Read-ahead buffering: drain a response body into a segment-sized buffer
//! on a background thread so a slow consumer never stalls the transfer.

use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::error::HtcatError;
use crate::pool::BufferPool;
use crate::segment::Payload;

/// Transport reads land in a scratch buffer first so the shared lock is
/// held only for the copy, never across a blocking read.
const READ_CHUNK: usize = 64 * 1024;

/// Signaled exactly once when a segment body has been closed. Workers wait
/// on it before claiming the next segment, which bounds in-flight buffers
/// to the parallelism.
#[derive(Clone)]
pub(crate) struct CloseLatch(Arc<(Mutex<bool>, Condvar)>);

impl CloseLatch {
    fn new() -> Self {
        CloseLatch(Arc::new((Mutex::new(false), Condvar::new())))
    }

    fn signal(&self) {
        let (flag, cond) = &*self.0;
        *flag.lock().unwrap() = true;
        cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let (flag, cond) = &*self.0;
        let mut closed = flag.lock().unwrap();
        while !*closed {
            closed = cond.wait(closed).unwrap();
        }
    }

    #[cfg(test)]
    pub(crate) fn wait_timeout(&self, dur: std::time::Duration) -> bool {
        let (flag, cond) = &*self.0;
        let mut closed = flag.lock().unwrap();
        let deadline = std::time::Instant::now() + dur;
        while !*closed {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cond.wait_timeout(closed, deadline - now).unwrap();
            closed = guard;
        }
        true
    }
}

struct State {
    buf: Vec<u8>,
    begin: usize,
    end: usize,
    eof: bool,
    failed: Option<String>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    more: Condvar,
}

/// Single-producer / single-consumer buffer over an opened response body.
///
/// The filler thread starts at construction and runs until the buffer is
/// full, the source ends or fails, or the buffer is closed under it. The
/// consumer side is `Payload::write_to`; end-of-stream from the source is
/// never surfaced to the consumer as an error.
pub(crate) struct ReadAhead {
    shared: Arc<Shared>,
    pool: Option<Arc<BufferPool>>,
    latch: CloseLatch,
    closed: bool,
}

impl ReadAhead {
    /// Buffer `size` bytes of `source`, using `pool` for the buffer when
    /// one is supplied.
    pub(crate) fn new(
        source: Box<dyn Read + Send>,
        size: u64,
        pool: Option<Arc<BufferPool>>,
    ) -> Self {
        let size = size as usize;
        let buf = match &pool {
            Some(pool) => pool.get(size),
            None => vec![0u8; size],
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buf,
                begin: 0,
                end: 0,
                eof: false,
                failed: None,
                closed: false,
            }),
            more: Condvar::new(),
        });

        let filler = Arc::clone(&shared);
        thread::spawn(move || fill(filler, source));

        ReadAhead {
            shared,
            pool,
            latch: CloseLatch::new(),
            closed: false,
        }
    }

    pub(crate) fn close_latch(&self) -> CloseLatch {
        self.latch.clone()
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let buf = {
            let mut st = self.shared.state.lock().unwrap();
            st.closed = true;
            mem::take(&mut st.buf)
        };
        if let Some(pool) = &self.pool {
            pool.put(buf);
        }
        self.latch.signal();
    }
}

fn fill(shared: Arc<Shared>, mut source: Box<dyn Read + Send>) {
    let mut scratch = vec![0u8; READ_CHUNK];
    loop {
        let want = {
            let st = shared.state.lock().unwrap();
            if st.closed {
                return;
            }
            let remaining = st.buf.len() - st.end;
            if remaining == 0 {
                return;
            }
            remaining.min(scratch.len())
        };
        match source.read(&mut scratch[..want]) {
            Ok(0) => {
                let mut st = shared.state.lock().unwrap();
                st.eof = true;
                shared.more.notify_all();
                return;
            }
            Ok(n) => {
                let mut st = shared.state.lock().unwrap();
                if st.closed {
                    return;
                }
                let end = st.end;
                st.buf[end..end + n].copy_from_slice(&scratch[..n]);
                st.end = end + n;
                shared.more.notify_all();
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                let mut st = shared.state.lock().unwrap();
                st.failed = Some(e.to_string());
                shared.more.notify_all();
                return;
            }
        }
    }
}

impl Payload for ReadAhead {
    fn write_to(&mut self, dst: &mut dyn Write) -> (u64, Option<HtcatError>) {
        let mut written = 0u64;
        let mut st = self.shared.state.lock().unwrap();
        loop {
            while st.begin == st.end
                && st.end < st.buf.len()
                && !st.eof
                && st.failed.is_none()
            {
                st = self.shared.more.wait(st).unwrap();
            }
            if st.closed {
                return (written, None);
            }
            if st.begin < st.end {
                match dst.write(&st.buf[st.begin..st.end]) {
                    Ok(0) => {
                        return (written, Some(HtcatError::sink("sink accepted zero bytes")));
                    }
                    Ok(n) => {
                        st.begin += n;
                        written += n as u64;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return (written, Some(HtcatError::sink(e))),
                }
                continue;
            }
            // Buffered bytes are drained: report a transport failure if one
            // was recorded, otherwise the segment is complete.
            if let Some(msg) = &st.failed {
                return (written, Some(HtcatError::transport("read response body", msg)));
            }
            return (written, None);
        }
    }

    fn close(&mut self) {
        self.close_inner();
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        self.close_inner();
    }
}

/// Streaming pass-through for a body of unknown length: no buffer, no
/// read-ahead, just a copy loop from the source to the sink.
pub(crate) struct StreamBody {
    source: Option<Box<dyn Read + Send>>,
}

impl StreamBody {
    pub(crate) fn new(source: Box<dyn Read + Send>) -> Self {
        StreamBody {
            source: Some(source),
        }
    }
}

impl Payload for StreamBody {
    fn write_to(&mut self, dst: &mut dyn Write) -> (u64, Option<HtcatError>) {
        let Some(source) = self.source.as_mut() else {
            return (0, None);
        };
        let mut scratch = vec![0u8; READ_CHUNK];
        let mut written = 0u64;
        loop {
            let n = match source.read(&mut scratch) {
                Ok(0) => return (written, None),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return (written, Some(HtcatError::transport("read response body", e)));
                }
            };
            let mut off = 0;
            while off < n {
                match dst.write(&scratch[off..n]) {
                    Ok(0) => {
                        return (written, Some(HtcatError::sink("sink accepted zero bytes")));
                    }
                    Ok(m) => {
                        off += m;
                        written += m as u64;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return (written, Some(HtcatError::sink(e))),
                }
            }
        }
    }

    fn close(&mut self) {
        self.source = None;
    }
}
