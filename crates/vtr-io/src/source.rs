use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// Largest chunk drained from a source in one non-blocking read.
const DRAIN_CHUNK: usize = 128 * 1024;

/// An input producer. `drain` pulls whatever is currently available (never
/// blocking) and returns it; an empty result means "nothing right now", not
/// necessarily EOF. `poll_fd` reports the descriptor the monitor loop's
/// readiness wait should include, or `None` if this source should instead be
/// polled unconditionally on every tick.
pub trait Source: Send {
    fn drain(&mut self) -> Vec<u8>;
    fn reset(&mut self) {}
    fn poll_fd(&self) -> Option<RawFd> {
        None
    }
    fn closed(&self) -> bool {
        false
    }
}

/// The child-socket read end. Always pollable.
pub struct SocketSource {
    fd: Option<OwnedFd>,
}

impl SocketSource {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }
}

impl Source for SocketSource {
    fn drain(&mut self) -> Vec<u8> {
        let Some(fd) = self.fd.as_ref() else {
            return Vec::new();
        };
        let raw = fd.as_raw_fd();
        let mut out = Vec::new();
        let mut chunk = [0u8; DRAIN_CHUNK];
        loop {
            // SAFETY: `raw` is a valid, open fd owned by `self.fd` for the
            // duration of this call; `chunk` is sized and borrowed correctly.
            let n = unsafe { libc::read(raw, chunk.as_mut_ptr().cast(), chunk.len()) };
            if n > 0 {
                let n = n as usize;
                out.extend_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    break;
                }
            } else if n == 0 {
                self.fd = None; // EOF
                break;
            } else {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::WouldBlock {
                    break;
                }
                tracing::warn!(error = %err, "socket source read error, closing");
                self.fd = None;
                break;
            }
        }
        out
    }

    fn poll_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    fn closed(&self) -> bool {
        self.fd.is_none()
    }
}

/// A watched file, opened lazily on first `drain` in non-blocking
/// read-only mode and seeked to end so only new data is read. Reports
/// itself as non-pollable — the monitor loop polls it every tick instead.
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    opened: bool,
    closed: bool,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            opened: false,
            closed: false,
        }
    }

    fn ensure_open(&mut self) {
        if self.opened {
            return;
        }
        self.opened = true;
        match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
        {
            Ok(mut file) => {
                if let Err(err) = file.seek(SeekFrom::End(0)) {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to seek watched file");
                }
                self.file = Some(file);
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to open watched file");
                self.closed = true;
            }
        }
    }
}

impl Source for FileSource {
    fn drain(&mut self) -> Vec<u8> {
        self.ensure_open();
        let Some(file) = self.file.as_mut() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut chunk = [0u8; DRAIN_CHUNK];
        loop {
            match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "watched file read error, closing");
                    self.file = None;
                    self.closed = true;
                    break;
                }
            }
        }
        out
    }

    fn poll_fd(&self) -> Option<RawFd> {
        None
    }

    fn closed(&self) -> bool {
        self.closed
    }
}

/// `syslog(2)` action codes used by the ring-buffer fallback, from
/// `<sys/klog.h>`: read-and-clear the whole buffer in one shot.
#[cfg(target_os = "linux")]
const SYSLOG_ACTION_READ_CLEAR: libc::c_int = 4;
#[cfg(target_os = "linux")]
const SYSLOG_ACTION_CLEAR: libc::c_int = 5;

/// Linux kernel ring-buffer tap, enabled only with `--kmsg`. Prefers
/// `/dev/kmsg` seeked to end-of-buffer; if that can't be opened at all
/// (not just permission denial, which self-disables), falls back to
/// draining the kernel ring via the `syslog(2)` read-and-clear action,
/// which destructively empties the buffer on each call — acceptable here
/// since nothing else in the supervisor consumes it.
#[cfg(target_os = "linux")]
pub struct KMsgSource {
    file: Option<File>,
    fallback: bool,
    disabled: bool,
}

#[cfg(target_os = "linux")]
impl KMsgSource {
    pub fn new() -> Self {
        let mut source = Self {
            file: None,
            fallback: false,
            disabled: false,
        };
        source.open();
        source
    }

    fn open(&mut self) {
        self.file = None;
        self.fallback = false;
        match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/kmsg")
        {
            Ok(mut file) => {
                let _ = file.seek(SeekFrom::End(0));
                self.file = Some(file);
            }
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                tracing::warn!("no permission to read /dev/kmsg, disabling kmsg source");
                self.disabled = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "/dev/kmsg unavailable, falling back to syslog(2) read-and-clear");
                // Drop whatever had already accumulated so the next drain
                // only sees records from this test onward.
                // SAFETY: `SYSLOG_ACTION_CLEAR` takes no buffer.
                unsafe {
                    libc::syscall(libc::SYS_syslog, SYSLOG_ACTION_CLEAR, std::ptr::null_mut::<u8>(), 0);
                }
                self.fallback = true;
            }
        }
    }

    fn drain_fallback(&mut self) -> Vec<u8> {
        let mut buf = vec![0u8; 16 * 1024];
        // SAFETY: `buf` is sized and valid for the call's duration; the
        // syscall writes at most `buf.len()` bytes and returns the count.
        let n = unsafe {
            libc::syscall(
                libc::SYS_syslog,
                SYSLOG_ACTION_READ_CLEAR,
                buf.as_mut_ptr(),
                buf.len() as libc::c_int,
            )
        };
        if n <= 0 {
            Vec::new()
        } else {
            buf.truncate(n as usize);
            buf
        }
    }
}

#[cfg(target_os = "linux")]
impl Default for KMsgSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl Source for KMsgSource {
    fn drain(&mut self) -> Vec<u8> {
        if self.disabled {
            return Vec::new();
        }
        if self.fallback {
            return self.drain_fallback();
        }
        let Some(file) = self.file.as_mut() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        // /dev/kmsg delivers one record per read(); loop until EAGAIN.
        let mut chunk = [0u8; 8192];
        loop {
            match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(error = %err, "kmsg read error, closing");
                    self.file = None;
                    break;
                }
            }
        }
        out
    }

    fn reset(&mut self) {
        if !self.disabled {
            self.open();
        }
    }

    fn poll_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    fn closed(&self) -> bool {
        self.disabled
    }
}
