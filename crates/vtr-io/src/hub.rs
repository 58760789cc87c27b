use std::os::fd::RawFd;
use std::time::Duration;

use crate::sink::{Observer, Sink};
use crate::source::Source;

/// Fan-in/fan-out: every `Source` drains into every `Sink`. Owns both
/// vectors and an implicitly-installed `Observer` sink so the hub always has
/// at least one consumer even before a real sink is attached.
pub struct IoHub {
    sinks: Vec<Box<dyn Sink>>,
    sources: Vec<Box<dyn Source>>,
}

impl Default for IoHub {
    fn default() -> Self {
        Self {
            sinks: vec![Box::new(Observer)],
            sources: Vec::new(),
        }
    }
}

impl IoHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn add_source(&mut self, source: Box<dyn Source>) {
        self.sources.push(source);
    }

    pub fn push(&mut self, data: &[u8]) {
        for sink in &mut self.sinks {
            sink.push(data);
        }
    }

    /// Drain every source into the hub (routing to all sinks), then give
    /// every sink a chance to flush its complete lines.
    pub fn sync(&mut self) {
        for source in &mut self.sources {
            let chunk = source.drain();
            if !chunk.is_empty() {
                for sink in &mut self.sinks {
                    sink.push(&chunk);
                }
            }
        }
        for sink in &mut self.sinks {
            sink.sync();
        }
    }

    /// Descriptors the monitor loop's readiness wait should include. Sources
    /// that report `None` (e.g. `FileSource`) are deliberately excluded —
    /// they're polled unconditionally on every tick instead.
    pub fn poll_fds(&self) -> Vec<RawFd> {
        self.sources.iter().filter_map(|s| s.poll_fd()).collect()
    }

    /// Block (bounded by `timeout`) until any pollable source is readable,
    /// or the timeout elapses. Returns `true` if something became ready.
    /// Sources with no pollable fd (e.g. `FileSource`) are never waited on
    /// here — the caller is expected to drain them unconditionally via
    /// `sync()` on its own cadence.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let fds = self.poll_fds();
        if fds.is_empty() {
            std::thread::sleep(timeout);
            return false;
        }
        let mut pollfds: Vec<libc::pollfd> = fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        // SAFETY: `pollfds` is a valid, correctly sized array that outlives
        // the call; `poll` does not retain the pointer afterward.
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        ret > 0
    }

    /// Drop and clear sources only (parent-side teardown after a child exits).
    pub fn close(&mut self) {
        self.sources.clear();
    }

    /// Drop and clear sinks only.
    pub fn clear(&mut self) {
        self.sinks.clear();
    }

    /// Move this hub's sources/sinks out, leaving a fresh, empty hub behind.
    /// Models the teacher's "stealing copy constructor": after fork, the
    /// parent hands its half of the wiring to the `TestCase` and continues
    /// with a clean slate.
    pub fn take(&mut self) -> IoHub {
        std::mem::take(self)
    }
}

impl Drop for IoHub {
    fn drop(&mut self) {
        self.close();
        self.clear();
    }
}
