//! Process-wide signal plane: handlers for `SIGCHLD`, `SIGINT`, and most
//! fatals, writing only atomic flags that the supervisor and monitor loop
//! drain on their own schedule. Handlers never allocate, lock, or log —
//! only atomic stores and (for forwarding) `kill(2)`, both async-signal-safe.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Instant;

use nix::sys::signal::{SigHandler, Signal, signal};

/// Target of signal forwarding: the pid of the currently-running child's
/// process group leader (== the child's own pid), or 0 if none is running.
static KILL_PID: AtomicI32 = AtomicI32::new(0);

/// Set by `SIGINT`; cleared either by a second `SIGINT` (fatal) or by the
/// one-second decay deadline in `INTERRUPT_DECAY_MS`.
static INTERRUPT: AtomicBool = AtomicBool::new(false);

/// Milliseconds-since-`epoch()` at which `INTERRUPT` should auto-clear, or 0
/// if no decay is armed. Stands in for `alarm(1)` — tested each monitor
/// tick via `tick_interrupt_decay` rather than delivered as a real signal.
static INTERRUPT_DECAY_MS: AtomicU64 = AtomicU64::new(0);

/// Nonzero once a fatal signal (other than `SIGCHLD`/`SIGWINCH`/`SIGURG`)
/// has been observed.
static FATAL_SIGNAL: AtomicI32 = AtomicI32::new(0);

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Install the process-wide handlers. Must run on the main thread before
/// any child is spawned. Forces `EPOCH` to initialize here so handlers
/// never pay the `OnceLock` init cost (only an atomic load) when they fire.
pub fn install() -> Result<(), nix::Error> {
    let _ = epoch();
    // SAFETY: these handlers only touch atomics and call `kill(2)`, both
    // async-signal-safe; installed once, before any child exists.
    unsafe {
        signal(Signal::SIGINT, SigHandler::Handler(handle_sigint))?;
        signal(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))?;
        signal(Signal::SIGALRM, SigHandler::Handler(handle_sigchld))?;
        signal(Signal::SIGPIPE, SigHandler::SigIgn)?;
        for fatal in [Signal::SIGTERM, Signal::SIGHUP, Signal::SIGQUIT, Signal::SIGUSR1] {
            signal(fatal, SigHandler::Handler(handle_fatal))?;
        }
    }
    Ok(())
}

extern "C" fn handle_sigint(_: libc::c_int) {
    let already_interrupted = INTERRUPT.swap(true, Ordering::SeqCst);
    if already_interrupted {
        // A second SIGINT arrived before the one-second decay cleared the
        // first one's flag: fatal, per the double-Ctrl-C force-quit contract.
        FATAL_SIGNAL.store(libc::SIGINT, Ordering::SeqCst);
    }
    forward_to_child_group(libc::SIGINT);
    let deadline = now_ms() + 1000;
    INTERRUPT_DECAY_MS.store(deadline, Ordering::SeqCst);
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    // No-op: exists only to interrupt a blocking readiness wait promptly
    // when a child exits. Reaping itself happens via an explicit,
    // non-blocking wait in the monitor loop.
}

extern "C" fn handle_fatal(sig: libc::c_int) {
    FATAL_SIGNAL.store(sig, Ordering::SeqCst);
    forward_to_child_group(sig);
}

fn forward_to_child_group(sig: libc::c_int) {
    let pid = KILL_PID.load(Ordering::SeqCst);
    if pid != 0 {
        // SAFETY: kill(2) with a negative pid targets the process group;
        // async-signal-safe.
        unsafe {
            libc::kill(-pid, sig);
        }
    }
}

fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// Record the process-group leader that signals should be forwarded to
/// while a child runs.
pub fn set_kill_pid(pid: i32) {
    KILL_PID.store(pid, Ordering::SeqCst);
}

pub fn clear_kill_pid() {
    KILL_PID.store(0, Ordering::SeqCst);
}

/// Current value of the `interrupt` flag.
pub fn interrupted() -> bool {
    INTERRUPT.load(Ordering::SeqCst)
}

pub fn clear_interrupt() {
    INTERRUPT.store(false, Ordering::SeqCst);
    INTERRUPT_DECAY_MS.store(0, Ordering::SeqCst);
}

/// Force the fatal-signal flag, independent of any signal actually having
/// arrived. Used by the batch-mode `interrupt`-at-finish-time path: §4.8
/// requires a `SIGINT`-interrupted test to halt an unattended batch run
/// rather than leave the supervisor waiting on further input.
pub fn force_fatal(sig: libc::c_int) {
    FATAL_SIGNAL.store(sig, Ordering::SeqCst);
}

/// Nonzero signal number if a fatal signal has been observed.
pub fn fatal_signal() -> i32 {
    FATAL_SIGNAL.load(Ordering::SeqCst)
}

/// Test the decay deadline each monitor tick; clears `INTERRUPT` once it
/// has elapsed, the functional equivalent of `alarm(1)`'s clearer firing.
pub fn tick_interrupt_decay() {
    let deadline = INTERRUPT_DECAY_MS.load(Ordering::SeqCst);
    if deadline != 0 && now_ms() >= deadline {
        INTERRUPT.store(false, Ordering::SeqCst);
        INTERRUPT_DECAY_MS.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Global atomics mean these tests must not run concurrently with each
    // other or with a real signal handler firing mid-assertion.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn interrupt_decay_clears_after_deadline() {
        let _guard = TEST_LOCK.lock().unwrap();
        clear_interrupt();
        INTERRUPT.store(true, Ordering::SeqCst);
        INTERRUPT_DECAY_MS.store(now_ms(), Ordering::SeqCst);
        tick_interrupt_decay();
        assert!(!interrupted());
    }

    #[test]
    fn interrupt_stays_set_before_deadline() {
        let _guard = TEST_LOCK.lock().unwrap();
        clear_interrupt();
        INTERRUPT.store(true, Ordering::SeqCst);
        INTERRUPT_DECAY_MS.store(now_ms() + 60_000, Ordering::SeqCst);
        tick_interrupt_decay();
        assert!(interrupted());
        clear_interrupt();
    }

    #[test]
    fn kill_pid_round_trips() {
        let _guard = TEST_LOCK.lock().unwrap();
        set_kill_pid(4242);
        assert_eq!(KILL_PID.load(Ordering::SeqCst), 4242);
        clear_kill_pid();
        assert_eq!(KILL_PID.load(Ordering::SeqCst), 0);
    }
}
