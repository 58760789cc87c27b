use std::collections::VecDeque;
use std::time::Instant;

/// A line popped from a [`TimedBuffer`]. `stamp` is the wallclock instant at
/// which the line's *first* byte was observed, not the instant it completed.
#[derive(Debug, Clone)]
pub struct TimedLine {
    pub stamp: Instant,
    pub bytes: Vec<u8>,
}

impl TimedLine {
    pub fn ends_with_newline(&self) -> bool {
        self.bytes.last() == Some(&b'\n')
    }
}

/// Line-oriented byte buffer that stamps each completed line with the
/// wallclock time it first observed data on that line.
///
/// A line is complete only once a `\n` has been observed; the incomplete
/// tail lives in a single in-progress slot until promoted to the queue on
/// newline, or force-flushed via `shift(true)`/`empty(true)`.
#[derive(Debug, Default)]
pub struct TimedBuffer {
    queue: VecDeque<TimedLine>,
    progress: Option<TimedLine>,
}

impl TimedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            let line = self.progress.get_or_insert_with(|| TimedLine {
                stamp: Instant::now(),
                bytes: Vec::new(),
            });
            line.bytes.push(byte);
            if byte == b'\n' {
                let completed = self.progress.take().expect("just inserted");
                self.queue.push_back(completed);
            }
        }
    }

    /// Pop the oldest complete line. If `force` and the queue is empty, also
    /// return (and clear) the in-progress tail.
    pub fn shift(&mut self, force: bool) -> Option<TimedLine> {
        if let Some(line) = self.queue.pop_front() {
            return Some(line);
        }
        if force {
            return self.progress.take();
        }
        None
    }

    /// Mirrors `shift`'s force rule without consuming anything.
    pub fn empty(&self, force: bool) -> bool {
        if !self.queue.is_empty() {
            return false;
        }
        if force {
            self.progress.is_none()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_splits_on_newline() {
        let mut buf = TimedBuffer::new();
        buf.push(b"hello\nworld");
        assert_eq!(buf.shift(false).unwrap().bytes, b"hello\n");
        assert!(buf.shift(false).is_none());
        assert!(!buf.empty(true));
    }

    #[test]
    fn force_flush_returns_partial_tail() {
        let mut buf = TimedBuffer::new();
        buf.push(b"partial");
        assert!(buf.shift(false).is_none());
        let line = buf.shift(true).unwrap();
        assert_eq!(line.bytes, b"partial");
        assert!(buf.empty(true));
    }

    #[test]
    fn multiple_lines_preserve_order() {
        let mut buf = TimedBuffer::new();
        buf.push(b"one\ntwo\nthree");
        assert_eq!(buf.shift(false).unwrap().bytes, b"one\n");
        assert_eq!(buf.shift(false).unwrap().bytes, b"two\n");
        assert!(buf.shift(false).is_none());
        assert_eq!(buf.shift(true).unwrap().bytes, b"three");
    }

    #[test]
    fn byte_fed_incrementally_still_splits() {
        let mut buf = TimedBuffer::new();
        for byte in b"ab\ncd\n" {
            buf.push(std::slice::from_ref(byte));
        }
        assert_eq!(buf.shift(false).unwrap().bytes, b"ab\n");
        assert_eq!(buf.shift(false).unwrap().bytes, b"cd\n");
    }
}
