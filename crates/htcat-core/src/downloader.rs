//! Download startup and workers: probe the resource, pick a strategy, and
//! drive concurrent range requests into the assembler.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use crate::assembler::{Assembler, AssemblerHandle};
use crate::error::HtcatError;
use crate::pool::{BufferPool, PoolSlot};
use crate::read_ahead::{ReadAhead, StreamBody};
use crate::segment::{Segment, SegmentPlanner};
use crate::utils::log_debug;

const MIB: u64 = 1 << 20;
/// Largest nominal per-request byte count.
const MAX_SEGMENT_SIZE: u64 = 20 * MIB;
/// Below this nominal size a single request beats parallel ranges.
const MIN_SEGMENT_SIZE: u64 = MIB;

/// Shared agent with connect and read timeouts applied. Workers clone it,
/// so connections are reused across range requests.
pub fn default_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(crate::config::connect_timeout())
        .timeout_read(crate::config::read_timeout())
        .max_idle_connections(crate::config::MAX_PARALLELISM)
        .build()
}

/// One download: probe, fan out range requests, reassemble in order.
pub struct Downloader {
    assembler: Assembler,
}

impl Downloader {
    /// Start fetching `url` with up to `parallelism` concurrent range
    /// requests. The probe request goes out immediately; transfers run
    /// ahead of `write_to`, bounded by parallelism times the segment size.
    pub fn new(agent: ureq::Agent, url: String, parallelism: usize) -> Downloader {
        let parallelism = parallelism.max(1);
        let pool: PoolSlot = Arc::new(OnceLock::new());
        let (assembler, handle) = Assembler::new(Arc::clone(&pool));
        thread::spawn(move || startup(agent, url, parallelism, handle, pool));
        Downloader { assembler }
    }

    /// Write the resource to `dst` in resource-byte order. Returns bytes
    /// written and the first error, if any; partial output may have
    /// reached the sink before an error surfaced.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> (u64, Option<HtcatError>) {
        self.assembler.write_to(dst)
    }
}

/// Issue a GET, optionally with a Range header. Content-coding is pinned
/// to identity so range arithmetic always refers to stored bytes.
fn request(
    agent: &ureq::Agent,
    url: &str,
    range: Option<&str>,
) -> Result<ureq::Response, HtcatError> {
    let mut req = agent.get(url).set("Accept-Encoding", "identity");
    let operation = match range {
        Some(value) => {
            req = req.set("Range", value);
            "range request"
        }
        None => "initial request",
    };
    match req.call() {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(code, resp)) => {
            Err(HtcatError::status(code, resp.status_text()))
        }
        Err(e) => Err(HtcatError::transport(operation, e)),
    }
}

fn startup(
    agent: ureq::Agent,
    url: String,
    parallelism: usize,
    handle: AssemblerHandle,
    pool_slot: PoolSlot,
) {
    let resp = match request(&agent, &url, None) {
        Ok(resp) => resp,
        Err(e) => {
            handle.cancel(e);
            return;
        }
    };
    if resp.status() != 200 {
        handle.cancel(HtcatError::status(resp.status(), resp.status_text()));
        return;
    }

    let length_header = resp.header("Content-Length").map(str::to_string);
    let total = match length_header {
        None => {
            log_debug("no Content-Length; streaming in a single request");
            let ord = handle.next_ordinal();
            handle.set_last(ord);
            let body = StreamBody::new(Box::new(resp.into_reader()));
            handle.register(Segment::new(ord, Box::new(body)));
            return;
        }
        Some(value) => match parse_content_length(&value) {
            Ok(n) => n,
            Err(e) => {
                handle.cancel(e);
                return;
            }
        },
    };

    let target = segment_size(total, parallelism);
    if target < MIN_SEGMENT_SIZE {
        log_debug(&format!(
            "{} bytes is too small to split; fetching in one request",
            total
        ));
        let ord = handle.next_ordinal();
        handle.set_last(ord);
        let body = ReadAhead::new(Box::new(resp.into_reader()), total, None);
        handle.register(Segment::new(ord, Box::new(body)));
        return;
    }

    log_debug(&format!(
        "{} bytes in segments of {} across {} workers",
        total, target, parallelism
    ));
    let pool = Arc::new(BufferPool::new(parallelism, target as usize));
    let _ = pool_slot.set(Arc::clone(&pool));
    let planner = Arc::new(Mutex::new(SegmentPlanner::new(total, target)));

    // The probe body doubles as the first segment so no request is wasted.
    let (ord, spec) = {
        let mut planner = planner.lock().unwrap();
        let ord = handle.next_ordinal();
        (ord, planner.next())
    };
    let limited = resp.into_reader().take(spec.size);
    let body = ReadAhead::new(Box::new(limited), spec.size, Some(Arc::clone(&pool)));
    let latch = body.close_latch();
    if !handle.register(Segment::new(ord, Box::new(body))) {
        return;
    }

    for _ in 1..parallelism {
        let agent = agent.clone();
        let url = url.clone();
        let planner = Arc::clone(&planner);
        let handle = handle.clone();
        let pool = Arc::clone(&pool);
        thread::spawn(move || worker(agent, url, planner, handle, pool));
    }

    // Chain into the worker loop once the first segment is fully consumed.
    latch.wait();
    worker(agent, url, planner, handle, pool);
}

fn worker(
    agent: ureq::Agent,
    url: String,
    planner: Arc<Mutex<SegmentPlanner>>,
    handle: AssemblerHandle,
    pool: Arc<BufferPool>,
) {
    loop {
        // Ordinal allocation and range computation stay in lockstep under
        // the planner mutex.
        let claim = {
            let mut planner = planner.lock().unwrap();
            if planner.has_next() {
                let ord = handle.next_ordinal();
                Some((ord, planner.next()))
            } else {
                handle.set_last(handle.last_allocated());
                None
            }
        };
        let Some((ord, spec)) = claim else { return };

        let resp = match request(&agent, &url, Some(&spec.header_value())) {
            Ok(resp) => resp,
            Err(e) => {
                handle.cancel(e);
                return;
            }
        };
        match resp.status() {
            // Some origins answer ranges with a plain 200 carrying the
            // requested bytes; anything else is a refusal.
            200 | 206 => {}
            code => {
                handle.cancel(HtcatError::status(code, resp.status_text()));
                return;
            }
        }

        let body = ReadAhead::new(
            Box::new(resp.into_reader()),
            spec.size,
            Some(Arc::clone(&pool)),
        );
        let latch = body.close_latch();
        if !handle.register(Segment::new(ord, Box::new(body))) {
            return;
        }
        // Do not claim more work until the assembler has consumed this
        // segment; this bounds outstanding buffers to the parallelism.
        latch.wait();
    }
}

fn segment_size(total: u64, parallelism: usize) -> u64 {
    let parallelism = parallelism as u64;
    ((total + parallelism - 1) / parallelism).min(MAX_SEGMENT_SIZE)
}

fn parse_content_length(value: &str) -> Result<u64, HtcatError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| HtcatError::length(value))
}
