//! A single test's lifecycle: spawn, monitor, and classify one child
//! process, generalizing the teacher's `wait_and_capture_with_idle_timeout`
//! monitor loop (`csa-process::lib`) from a fixed stdout/stderr pair to an
//! arbitrary [`vtr_io::IoHub`] source set.

mod rusage;

use std::io::Write as _;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use tracing::warn;

use vtr_core::{Code, Options, TestId};
use vtr_io::{BufSink, FdSink, FileSink, Formatter, IoHub, SharedSink, Sink, SocketSource};
use vtr_journal::Journal;
use vtr_progress::{Phase, Progress};

pub use rusage::format_rusage_line;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const PULSE_INTERVAL: Duration = Duration::from_secs(1);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Outcome recorded once the child has been reaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Exited(i32),
    Signaled(i32),
}

pub struct TestCase {
    id: TestId,
    script: PathBuf,
    interpreter: Option<PathBuf>,
    slot: usize,
    child: Option<std::process::Child>,
    pid: i32,
    hub: IoHub,
    buf_handle: Option<std::sync::Arc<std::sync::Mutex<BufSink>>>,
    start: Instant,
    silent_start: Instant,
    last_heartbeat: Instant,
    last_pulse: Instant,
    timeout: bool,
    outcome: Option<Outcome>,
    rusage: Option<libc::rusage>,
}

impl TestCase {
    pub fn new(id: TestId, script: PathBuf, interpreter: Option<PathBuf>) -> Self {
        let now = Instant::now();
        Self {
            id,
            script,
            interpreter,
            slot: 0,
            child: None,
            pid: 0,
            hub: IoHub::new(),
            buf_handle: None,
            start: now,
            silent_start: now,
            last_heartbeat: now,
            last_pulse: now,
            timeout: false,
            outcome: None,
            rusage: None,
        }
    }

    pub fn pretty(&self) -> String {
        self.id.to_string()
    }

    pub fn id(&self) -> &TestId {
        &self.id
    }

    pub fn tag(code: Code) -> &'static str {
        match code {
            Code::Started => "STARTED",
            Code::Retried => "RETRIED",
            Code::Unknown => "UNKNOWN",
            Code::Failed => "FAILED",
            Code::Interrupted => "INTERRUPTED",
            Code::KnownFail => "KNOWNFAIL",
            Code::Passed => "PASSED",
            Code::Skipped => "SKIPPED",
            Code::Timeout => "TIMEOUT",
            Code::Warned => "WARNED",
        }
    }

    pub fn timefmt(d: Duration) -> String {
        let secs = d.as_secs();
        format!("{:2}:{:02}", secs / 60, secs % 60)
    }

    /// Spawn the child and install the IO hub's sinks/sources. Marks the
    /// test `STARTED` in `journal`.
    pub fn run(
        &mut self,
        slot: usize,
        options: &Options,
        journal: &mut Journal,
    ) -> anyhow::Result<()> {
        self.slot = slot;
        journal.started(&self.id);

        let (parent_fd, child_fd) = socket::socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;

        let interactive = matches!(options.ui_mode, vtr_core::UiMode::Interactive);
        let mut cmd = self.build_command(options, &child_fd, interactive);

        let child = cmd.spawn().map_err(vtr_core::RunnerError::ForkFailed)?;
        drop(child_fd);

        self.pid = child.id() as i32;
        vtr_signals::set_kill_pid(self.pid);
        self.child = Some(child);

        self.install_sinks_and_sources(options, parent_fd);

        let now = Instant::now();
        self.start = now;
        self.silent_start = now;
        self.last_heartbeat = now;
        self.last_pulse = now;
        Ok(())
    }

    /// In non-interactive mode, stdin is `/dev/null` and stdout/stderr are
    /// `dup2`'d onto the socket fd so the combined stream reaches the parent.
    /// In interactive mode, stdin/stdout/stderr are left attached to the
    /// controlling terminal — the child's stdout never reaches `child_fd`.
    fn build_command(&self, options: &Options, child_fd: &OwnedFd, interactive: bool) -> Command {
        let raw_fd = child_fd.as_raw_fd();
        let mut cmd = Command::new("bash");
        cmd.arg("-noprofile").arg("-norc");
        if let Some(interp) = &self.interpreter {
            cmd.arg(interp);
        }
        cmd.arg(&self.script);
        cmd.current_dir(&options.workdir);
        cmd.env("TEST_SLOT", self.slot.to_string());
        cmd.env(&options.flavour_var, self.id.flavour.as_str());

        if !interactive {
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());

            // SAFETY: pre_exec runs in the forked child before exec; only
            // async-signal-safe calls (setpgid, dup2) happen here.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::dup2(raw_fd, libc::STDOUT_FILENO) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::dup2(raw_fd, libc::STDERR_FILENO) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        } else {
            // SAFETY: pre_exec runs in the forked child before exec;
            // setpgid is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        cmd
    }

    fn install_sinks_and_sources(&mut self, options: &Options, parent_fd: OwnedFd) {
        self.hub.add_source(Box::new(SocketSource::new(parent_fd)));

        match options.ui_mode {
            vtr_core::UiMode::Verbose | vtr_core::UiMode::Interactive => {
                self.hub
                    .add_sink(Box::new(FdSink::new(std::io::stdout(), Formatter::new(self.start))));
            }
            vtr_core::UiMode::Batch => {}
            vtr_core::UiMode::Plain => {
                let (handle, shared) =
                    SharedSink::new(BufSink::new(Formatter::new(self.start)));
                self.hub.add_sink(Box::new(shared));
                self.buf_handle = Some(handle);
            }
        }

        let log_path = options.outdir.join(format!("{}.txt", self.id.log_name()));
        self.hub
            .add_sink(Box::new(FileSink::new(log_path, Formatter::new(self.start))));

        for watch in &options.watch {
            self.hub
                .add_source(Box::new(vtr_io::FileSource::new(watch.clone())));
        }
        #[cfg(target_os = "linux")]
        if options.kmsg {
            self.hub.add_source(Box::new(vtr_io::KMsgSource::new()));
        }
    }

    /// One monitor tick. Returns `true` while the test is still running.
    pub async fn monitor(&mut self, options: &Options, wait: Duration) -> bool {
        vtr_signals::tick_interrupt_decay();
        self.heartbeat(options);

        if let Some(outcome) = self.try_reap() {
            self.outcome = Some(outcome);
            self.hub.sync();
            return false;
        }

        if !matches!(options.ui_mode, vtr_core::UiMode::Interactive)
            && Instant::now().duration_since(self.silent_start) > options.timeout
        {
            self.kill_for_timeout().await;
            return false;
        }

        if self.should_pulse(options) {
            self.last_pulse = Instant::now();
        }

        let ready = {
            let hub = &self.hub;
            tokio::task::block_in_place(|| hub.wait_ready(wait))
        };
        if ready {
            self.silent_start = Instant::now();
        }
        self.hub.sync();
        true
    }

    fn should_pulse(&self, options: &Options) -> bool {
        !matches!(
            options.ui_mode,
            vtr_core::UiMode::Verbose | vtr_core::UiMode::Interactive | vtr_core::UiMode::Batch
        ) && Instant::now().duration_since(self.last_pulse) >= PULSE_INTERVAL
    }

    fn heartbeat(&mut self, options: &Options) {
        let Some(path) = &options.heartbeat else {
            return;
        };
        if Instant::now().duration_since(self.last_heartbeat) < HEARTBEAT_INTERVAL {
            return;
        }
        self.last_heartbeat = Instant::now();
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut file) => {
                if file.write_all(b".").is_ok() {
                    let _ = file.sync_all();
                }
            }
            Err(err) => warn!(error = %err, path = %path.display(), "failed to append heartbeat"),
        }
    }

    /// Non-blocking reap via `wait4(2)`, capturing rusage on success.
    fn try_reap(&mut self) -> Option<Outcome> {
        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: `self.pid` is this TestCase's own child; `status`/`usage`
        // are valid out-params sized for the call.
        let ret = unsafe { libc::wait4(self.pid, &mut status, libc::WNOHANG, &mut usage) };
        if ret != self.pid {
            return None;
        }
        self.rusage = Some(usage);
        if wifexited(status) {
            Some(Outcome::Exited(wexitstatus(status)))
        } else if wifsignaled(status) {
            Some(Outcome::Signaled(wtermsig(status)))
        } else {
            None
        }
    }

    async fn kill_for_timeout(&mut self) {
        self.timeout = true;
        // SAFETY: negative pid targets the child's own process group.
        unsafe {
            libc::kill(-self.pid, libc::SIGINT);
        }
        tokio::time::sleep(KILL_GRACE).await;
        if self.try_reap().is_none() {
            trigger_sysrq_dump();
            // SAFETY: same process group, best-effort hard kill.
            unsafe {
                libc::kill(-self.pid, libc::SIGKILL);
            }
            let mut status: libc::c_int = 0;
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            // SAFETY: blocking wait is bounded because SIGKILL cannot be
            // caught or ignored.
            unsafe {
                libc::wait4(self.pid, &mut status, 0, &mut usage);
            }
            self.rusage = Some(usage);
            self.outcome = Some(Outcome::Signaled(libc::SIGKILL));
        }
        self.hub.sync();
    }

    /// Drains one monitor tick and, once the child has been reaped,
    /// classifies the result, records it in `journal`, and prints the final
    /// progress line. Returns `true` while still running.
    pub async fn finished(
        &mut self,
        options: &Options,
        journal: &mut Journal,
        progress: &mut Progress,
        wait: Duration,
    ) -> bool {
        if self.monitor(options, wait).await {
            return true;
        }

        let code = self.classify();
        if vtr_signals::interrupted() {
            vtr_signals::tick_interrupt_decay();
            if matches!(options.ui_mode, vtr_core::UiMode::Batch) {
                vtr_signals::force_fatal(libc::SIGINT);
            }
        }

        self.hub.close();

        if matches!(code, Code::Failed | Code::Timeout) {
            if let Some(handle) = &self.buf_handle {
                let mut guard = handle.lock().expect("buf sink mutex poisoned");
                guard.dump(&mut std::io::stdout());
            }
        }

        journal.done(&self.id, code);
        self.print_result(progress, options, code);
        self.hub.clear();
        false
    }

    fn classify(&self) -> Code {
        if self.timeout {
            return Code::Timeout;
        }
        match self.outcome {
            Some(Outcome::Exited(0)) => Code::Passed,
            Some(Outcome::Exited(200)) => Code::Skipped,
            Some(Outcome::Exited(_)) => Code::Failed,
            Some(Outcome::Signaled(sig))
                if (sig == libc::SIGINT || sig == libc::SIGTERM) && vtr_signals::interrupted() =>
            {
                Code::Interrupted
            }
            Some(Outcome::Signaled(_)) => Code::Failed,
            None => Code::Failed,
        }
    }

    fn print_result(&self, progress: &mut Progress, options: &Options, code: Code) {
        let elapsed = Instant::now().duration_since(self.start);
        let line = if matches!(options.ui_mode, vtr_core::UiMode::Batch) {
            let head = format!("{:.<64}", self.pretty());
            if matches!(code, Code::Passed) {
                if let Some(usage) = &self.rusage {
                    format!("{head}{}\n{}\n", Self::tag(code), format_rusage_line(elapsed, usage))
                } else {
                    format!("{head}{}\n", Self::tag(code))
                }
            } else {
                format!("{head}{}\n", Self::tag(code))
            }
        } else {
            format!("{} {}\n", Self::tag(code), self.pretty())
        };
        progress.emit(self.slot, Phase::Last, &line);
    }
}

fn wifexited(status: i32) -> bool {
    (status & 0x7f) == 0
}

fn wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}

fn wifsignaled(status: i32) -> bool {
    (((status & 0x7f) + 1) as i8 >> 1) > 0
}

fn wtermsig(status: i32) -> i32 {
    status & 0x7f
}

fn trigger_sysrq_dump() {
    if let Ok(mut file) = std::fs::OpenOptions::new().write(true).open("/proc/sysrq-trigger") {
        let _ = file.write_all(b"t");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_decoding_matches_glibc_macros() {
        // exit(0): low 7 bits 0, exit status in next byte.
        assert!(wifexited(0));
        assert_eq!(wexitstatus(0), 0);
        assert!(wifexited(200 << 8));
        assert_eq!(wexitstatus(200 << 8), 200);

        // killed by SIGKILL (9): low 7 bits == signal, no core-dump bit.
        assert!(wifsignaled(9));
        assert_eq!(wtermsig(9), 9);
        assert!(!wifexited(9));
    }

    #[test]
    fn timefmt_matches_prefix_style() {
        assert_eq!(TestCase::timefmt(Duration::from_secs(0)), " 0:00");
        assert_eq!(TestCase::timefmt(Duration::from_secs(75)), " 1:15");
        assert_eq!(TestCase::timefmt(Duration::from_secs(3725)), "62:05");
    }

    #[test]
    fn tag_covers_every_code() {
        assert_eq!(TestCase::tag(Code::Passed), "PASSED");
        assert_eq!(TestCase::tag(Code::Timeout), "TIMEOUT");
        assert_eq!(TestCase::tag(Code::Interrupted), "INTERRUPTED");
    }
}
