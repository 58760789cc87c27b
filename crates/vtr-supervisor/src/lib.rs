//! Discovers tests, applies include/exclude/flavour filters, sorts them,
//! allocates slots up to the job limit, drives the global timers, interprets
//! global signals, and emits the final report. Grounded on the teacher's
//! parallel task scheduling shape (`cli-sub-agent::batch`) and its
//! flock-backed persisted-state pattern (`csa-scheduler::rotation`),
//! generalized from a dependency-graph batch runner to a fixed-size slot
//! pool with no inter-test dependencies.

mod discovery;

use std::time::{Duration, Instant};

use tracing::{info, warn};

use vtr_core::{Code, Options, RunnerError, TestId};
use vtr_journal::Journal;
use vtr_progress::Progress;
use vtr_testcase::TestCase;

pub use discovery::discover;

/// `wait()`'s first-slot readiness-poll budget; every subsequent slot in the
/// same pass is polled with a zero wait so the loop rotates fairly without
/// piling up latency per slot (§5's "500 ms then 0 ms" rule).
const FIRST_SLOT_WAIT: Duration = Duration::from_millis(500);
const SUBSEQUENT_SLOT_WAIT: Duration = Duration::from_millis(0);

/// Sleep interval for the `--fatal-timeouts` halt: long enough that a
/// disposable VM gets rebooted (or the operator intervenes) well before it
/// elapses on its own.
const FATAL_TIMEOUT_SLEEP: Duration = Duration::from_secs(3600);

pub struct Supervisor {
    options: Options,
    journal: Journal,
    progress: Progress,
    queue: Vec<TestCase>,
    slots: Vec<Option<TestCase>>,
    suite_start: Instant,
    last_done: Option<TestId>,
}

impl Supervisor {
    /// Discover tests under `options.testdir`, sort them, and load (or
    /// unlink) the journal depending on `--continue`.
    pub fn setup(options: Options) -> Result<Self, RunnerError> {
        std::fs::create_dir_all(&options.outdir).map_err(|source| RunnerError::OutdirCreate {
            path: options.outdir.clone(),
            source,
        })?;

        let queue = discover(&options)?;
        info!(count = queue.len(), "discovered test cases");

        let mut journal = Journal::new(options.outdir.clone());
        if options.continue_ {
            journal.read().map_err(|source| RunnerError::DirectoryRead {
                path: options.outdir.join("journal"),
                source,
            })?;
        } else {
            journal.unlink();
        }

        let jobs = options.jobs.max(1);
        let progress = Progress::new(options.ui_mode, jobs);
        let slots = (0..jobs).map(|_| None).collect();

        Ok(Self {
            options,
            journal,
            progress,
            queue,
            slots,
            suite_start: Instant::now(),
            last_done: None,
        })
    }

    /// Run every discovered test to completion (or until a fatal condition
    /// fires) and return the process exit code.
    pub async fn run(&mut self) -> i32 {
        vtr_signals::clear_interrupt();
        let mut die = false;

        while !self.queue.is_empty() {
            if self.skip_if_already_done() {
                continue;
            }

            let Some(slot) = self.wait_for_free_slot(&mut die).await else {
                break;
            };
            if die {
                break;
            }

            let mut case = self.queue.remove(0);
            if let Err(err) = case.run(slot, &self.options, &mut self.journal) {
                warn!(error = %err, "failed to start test");
                std::process::exit(201);
            }
            self.slots[slot] = Some(case);

            if self.check_global_timers().await {
                die = true;
                break;
            }
        }

        self.drain_remaining_slots().await;
        self.progress.flush();
        self.journal.banner();
        self.report_non_passed();

        vtr_signals::clear_kill_pid();
        let fatal = die || vtr_signals::fatal_signal() != 0;
        if fatal || self.any_test_failed() { 1 } else { 0 }
    }

    /// `--continue`: drop the front of the queue if the journal already
    /// marks it done. Returns `true` if an entry was skipped (caller should
    /// loop again rather than try to schedule it).
    fn skip_if_already_done(&mut self) -> bool {
        if !self.options.continue_ {
            return false;
        }
        let Some(front) = self.queue.first() else {
            return false;
        };
        if self.journal.is_done(front.id()) {
            self.queue.remove(0);
            true
        } else {
            false
        }
    }

    /// Block until some slot is free, ticking every running slot once per
    /// pass (bounded wait on the first slot, zero wait on the rest) and
    /// checking global timers/signals between passes. Returns `None` if a
    /// fatal condition fires while waiting.
    async fn wait_for_free_slot(&mut self, die: &mut bool) -> Option<usize> {
        loop {
            if let Some(idx) = self.first_free_slot() {
                return Some(idx);
            }
            self.tick_all_slots().await;
            if *die || self.check_global_timers().await {
                *die = true;
                return None;
            }
            if vtr_signals::fatal_signal() != 0 {
                *die = true;
                return None;
            }
        }
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Give every occupied slot one monitor tick.
    async fn tick_all_slots(&mut self) {
        for i in 0..self.slots.len() {
            let wait = if i == 0 { FIRST_SLOT_WAIT } else { SUBSEQUENT_SLOT_WAIT };
            self.tick_slot(i, wait).await;
        }
    }

    async fn tick_slot(&mut self, i: usize, wait: Duration) {
        let Some(case) = self.slots[i].as_mut() else {
            return;
        };
        let still_running = case
            .finished(&self.options, &mut self.journal, &mut self.progress, wait)
            .await;
        if !still_running {
            self.last_done = Some(case.id().clone());
            self.slots[i] = None;
        }
    }

    /// Drain every slot still running once the queue is exhausted or a fatal
    /// condition fired, ignoring further scheduling.
    async fn drain_remaining_slots(&mut self) {
        loop {
            let any_running = self.slots.iter().any(|s| s.is_some());
            if !any_running {
                return;
            }
            self.tick_all_slots().await;
        }
    }

    /// `--fatal-timeouts` and the total wall-clock budget. Returns `true` if
    /// the run should die.
    async fn check_global_timers(&mut self) -> bool {
        if self.options.fatal_timeouts && self.journal.consecutive_timeouts() >= 2 {
            if let Some(id) = &self.last_done {
                self.journal.started(id);
            }
            println!("two consecutive timeouts; halting (fatal-timeouts)");
            tokio::time::sleep(FATAL_TIMEOUT_SLEEP).await;
            return true;
        }
        if self.suite_start.elapsed() > self.options.total_timeout {
            println!("total timeout exceeded; halting");
            return true;
        }
        false
    }

    fn any_test_failed(&self) -> bool {
        self.journal.count(Code::Failed) > 0
            || self.journal.count(Code::Timeout) > 0
            || self.journal.count(Code::Interrupted) > 0
            || self.journal.count(Code::Warned) > 0
    }

    /// Print every done entry that is neither `PASSED` nor `SKIPPED`.
    fn report_non_passed(&self) {
        let mut entries: Vec<(&str, Code)> = self
            .journal
            .entries()
            .filter(|(_, code)| !matches!(code, Code::Passed | Code::Skipped))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        for (id, code) in entries {
            println!("{id}: {}", code.word());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vtr_core::{Flavour, UiMode};

    fn opts(testdir: std::path::PathBuf, outdir: std::path::PathBuf) -> Options {
        Options {
            testdir,
            outdir,
            workdir: std::path::PathBuf::from("/tmp"),
            continue_: false,
            only: Vec::new(),
            skip: Vec::new(),
            flavours: vec![Flavour::new("vanilla")],
            flavour_filter: None,
            watch: Vec::new(),
            interpreters: HashMap::new(),
            sort_hints: Vec::new(),
            timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10_800),
            jobs: 1,
            ui_mode: UiMode::Batch,
            kmsg: false,
            heartbeat: None,
            fatal_timeouts: false,
            flavour_var: "TEST_FLAVOUR".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn happy_path_runs_every_test_and_reports_failures() {
        let testdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        std::fs::write(testdir.path().join("a.sh"), "exit 0\n").unwrap();
        std::fs::write(testdir.path().join("b.sh"), "exit 1\n").unwrap();
        std::fs::write(testdir.path().join("c.sh"), "exit 200\n").unwrap();

        let options = opts(testdir.path().to_path_buf(), outdir.path().to_path_buf());
        let mut supervisor = Supervisor::setup(options).unwrap();
        let code = supervisor.run().await;

        assert_eq!(code, 1);
        assert_eq!(supervisor.journal.count(Code::Passed), 1);
        assert_eq!(supervisor.journal.count(Code::Skipped), 1);
        assert_eq!(supervisor.journal.count(Code::Failed), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continue_skips_entries_the_journal_already_marks_done() {
        let testdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        std::fs::write(testdir.path().join("a.sh"), "exit 0\n").unwrap();
        std::fs::write(testdir.path().join("b.sh"), "exit 0\n").unwrap();

        let mut options = opts(testdir.path().to_path_buf(), outdir.path().to_path_buf());
        {
            let mut journal = Journal::new(outdir.path().to_path_buf());
            journal.done(&TestId::new(Flavour::new("vanilla"), "a.sh".into()), Code::Passed);
        }
        options.continue_ = true;

        let mut supervisor = Supervisor::setup(options).unwrap();
        let code = supervisor.run().await;

        assert_eq!(code, 0);
        assert_eq!(supervisor.journal.count(Code::Passed), 2);
    }
}
