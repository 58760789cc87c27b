use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::format::Formatter;
use crate::timed_buffer::TimedBuffer;

/// An output consumer. `push` feeds raw bytes in; `outline` pops and writes
/// whatever complete lines (plus, if `force`, the partial tail) are ready;
/// `sync` gives the sink a chance to flush without forcing the tail out.
pub trait Sink: Send {
    fn push(&mut self, data: &[u8]);
    fn outline(&mut self, force: bool);
    fn sync(&mut self);
}

/// No-op sink. Installed by the `IoHub` as a default so the hub always has
/// at least one consumer, even before any real sink is attached.
#[derive(Debug, Default)]
pub struct Observer;

impl Sink for Observer {
    fn push(&mut self, _data: &[u8]) {}
    fn outline(&mut self, _force: bool) {}
    fn sync(&mut self) {}
}

/// Holds the last run's output in memory, prefixed `"| "` on [`BufSink::dump`],
/// so a failed test's output can be replayed to stdout without re-running it.
#[derive(Debug)]
pub struct BufSink {
    buf: TimedBuffer,
    formatter: Formatter,
}

impl BufSink {
    pub fn new(formatter: Formatter) -> Self {
        Self {
            buf: TimedBuffer::new(),
            formatter,
        }
    }

    /// Drain every buffered line, prefixed `"| "`, into `out`.
    pub fn dump(&mut self, out: &mut dyn Write) {
        while let Some(line) = self.buf.shift(true) {
            let formatted = self.formatter.format(&line, false);
            if formatted.is_empty() {
                continue;
            }
            let _ = out.write_all(b"| ");
            let _ = out.write_all(&formatted);
        }
    }
}

impl Sink for BufSink {
    fn push(&mut self, data: &[u8]) {
        self.buf.push(data);
    }

    fn outline(&mut self, _force: bool) {
        // Draining happens at dump() time, not incrementally.
    }

    fn sync(&mut self) {}
}

/// Sink writing to any `Write` handle (stdout, typically). Tracks whether
/// the last emitted byte was a newline so the *next* line's timestamp
/// prefix can be suppressed when continuing a partial line.
pub struct FdSink<W: Write + Send> {
    writer: W,
    buf: TimedBuffer,
    formatter: Formatter,
    last_was_newline: bool,
}

impl<W: Write + Send> FdSink<W> {
    pub fn new(writer: W, formatter: Formatter) -> Self {
        Self {
            writer,
            buf: TimedBuffer::new(),
            formatter,
            last_was_newline: true,
        }
    }

    fn drain(&mut self, force: bool) {
        while let Some(line) = self.buf.shift(force) {
            let suppress = !self.last_was_newline;
            let ends_with_newline = line.ends_with_newline();
            let formatted = self.formatter.format(&line, suppress);
            if !formatted.is_empty() {
                let _ = self.writer.write_all(&formatted);
            }
            self.last_was_newline = ends_with_newline;
        }
    }
}

impl<W: Write + Send> Sink for FdSink<W> {
    fn push(&mut self, data: &[u8]) {
        self.buf.push(data);
    }

    fn outline(&mut self, force: bool) {
        self.drain(force);
    }

    fn sync(&mut self) {
        self.drain(false);
        let _ = self.writer.flush();
    }
}

impl<W: Write + Send> Drop for FdSink<W> {
    fn drop(&mut self) {
        self.drain(true);
        let _ = self.writer.flush();
    }
}

/// `FdSink` variant that lazily opens its file (create+truncate, mode 0644)
/// on first `sync()`. A failed open transitions it to a `killed` state in
/// which further pushes are silently dropped — the test itself is
/// unaffected, matching §7's sink-open-error contract.
///
/// The log file is truncated on open, so a retried test overwrites the
/// previous attempt's log. This is intentional: preserved as observed.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    killed: bool,
    buf: TimedBuffer,
    formatter: Formatter,
    last_was_newline: bool,
}

impl FileSink {
    pub fn new(path: PathBuf, formatter: Formatter) -> Self {
        Self {
            path,
            file: None,
            killed: false,
            buf: TimedBuffer::new(),
            formatter,
            last_was_newline: true,
        }
    }

    fn ensure_open(&mut self) {
        if self.file.is_some() || self.killed {
            return;
        }
        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.path)
        {
            Ok(file) => self.file = Some(file),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to open test log file");
                self.killed = true;
            }
        }
    }

    fn drain(&mut self, force: bool) {
        if self.killed {
            return;
        }
        self.ensure_open();
        let Some(file) = self.file.as_mut() else {
            return;
        };
        while let Some(line) = self.buf.shift(force) {
            let suppress = !self.last_was_newline;
            let ends_with_newline = line.ends_with_newline();
            let formatted = self.formatter.format(&line, suppress);
            if !formatted.is_empty() && file.write_all(&formatted).is_err() {
                self.killed = true;
                self.file = None;
                return;
            }
            self.last_was_newline = ends_with_newline;
        }
    }
}

impl Sink for FileSink {
    fn push(&mut self, data: &[u8]) {
        if !self.killed {
            self.buf.push(data);
        }
    }

    fn outline(&mut self, force: bool) {
        self.drain(force);
    }

    fn sync(&mut self) {
        self.ensure_open();
        self.drain(false);
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.drain(true);
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
    }
}

/// Wraps any sink in an `Arc<Mutex<_>>` so a caller can keep a handle to it
/// (e.g. `TestCase` keeping a `BufSink` handle for replay-on-failure) while
/// the same sink is also installed into an `IoHub`.
pub struct SharedSink<T>(pub Arc<Mutex<T>>);

impl<T> SharedSink<T> {
    pub fn new(inner: T) -> (Arc<Mutex<T>>, Self) {
        let arc = Arc::new(Mutex::new(inner));
        (arc.clone(), Self(arc))
    }
}

impl<T: Sink> Sink for SharedSink<T> {
    fn push(&mut self, data: &[u8]) {
        self.0.lock().expect("sink mutex poisoned").push(data);
    }

    fn outline(&mut self, force: bool) {
        self.0.lock().expect("sink mutex poisoned").outline(force);
    }

    fn sync(&mut self) {
        self.0.lock().expect("sink mutex poisoned").sync();
    }
}
