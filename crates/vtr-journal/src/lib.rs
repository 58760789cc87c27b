//! Durable, append-optimized status store keyed by test identifier.
//!
//! Two files live in the output directory: `journal` (append-only delta
//! log, one `id code` pair per line) and `list` (full rewrite after each
//! update). Every mutation appends the changed entry to `journal`, fsyncs,
//! rewrites `list` in full, and fsyncs again — the append gives a cheap
//! durable trail; the full rewrite gives a compact, always-current summary.
//! On resume, `journal` is replayed in order; later entries win.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use vtr_core::{Code, TestId};

pub struct Journal {
    outdir: PathBuf,
    statuses: HashMap<String, Code>,
    consecutive_timeouts: u32,
}

impl Journal {
    pub fn new(outdir: PathBuf) -> Self {
        Self {
            outdir,
            statuses: HashMap::new(),
            consecutive_timeouts: 0,
        }
    }

    fn journal_path(&self) -> PathBuf {
        self.outdir.join("journal")
    }

    fn list_path(&self) -> PathBuf {
        self.outdir.join("list")
    }

    /// Mark `id` started. A fresh start goes `absent -> STARTED`; starting a
    /// test that was already `STARTED` (a crash mid-run) instead goes to
    /// `RETRIED`, which is how a resumed run flags an interrupted attempt.
    pub fn started(&mut self, id: &TestId) {
        let key = id.to_string();
        let code = match self.statuses.get(&key) {
            Some(Code::Started) => Code::Retried,
            _ => Code::Started,
        };
        self.statuses.insert(key.clone(), code);
        self.persist(&key, code);
    }

    /// Record a terminal (or `INTERRUPTED`) result, replacing whatever
    /// preceded it. Maintains the consecutive-timeout counter used by
    /// `--fatal-timeouts`.
    pub fn done(&mut self, id: &TestId, code: Code) {
        let key = id.to_string();
        if matches!(code, Code::Timeout) {
            self.consecutive_timeouts += 1;
        } else {
            self.consecutive_timeouts = 0;
        }
        self.statuses.insert(key.clone(), code);
        self.persist(&key, code);
    }

    /// "Done" is any code other than `STARTED` or `INTERRUPTED`.
    pub fn is_done(&self, id: &TestId) -> bool {
        matches!(self.statuses.get(&id.to_string()), Some(code) if code.is_done())
    }

    pub fn count(&self, code: Code) -> usize {
        self.statuses.values().filter(|&&c| c == code).count()
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Every recorded `(id, code)` pair, in no particular order. Lets callers
    /// (the supervisor's final report) apply filters `details()` doesn't.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Code)> {
        self.statuses.iter().map(|(id, &code)| (id.as_str(), code))
    }

    /// Replay `outdir/journal` into the in-memory map. Missing file is not
    /// an error — a fresh run simply starts empty.
    pub fn read(&mut self) -> std::io::Result<()> {
        let path = self.journal_path();
        self.read_path(&path)
    }

    pub fn read_path(&mut self, path: &Path) -> std::io::Result<()> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        for line in contents.lines() {
            let Some((id, word)) = line.split_once(' ') else {
                continue;
            };
            self.statuses.insert(id.to_string(), Code::from_word(word));
        }
        Ok(())
    }

    /// Remove `outdir/journal` (used when not resuming via `--continue`).
    pub fn unlink(&self) {
        let _ = fs::remove_file(self.journal_path());
    }

    fn persist(&self, key: &str, code: Code) {
        if let Err(err) = self.append_journal(key, code) {
            tracing::warn!(error = %err, "failed to append to journal");
        }
        if let Err(err) = self.rewrite_list() {
            tracing::warn!(error = %err, "failed to rewrite list file");
        }
    }

    fn append_journal(&self, key: &str, code: Code) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())?;
        writeln!(file, "{key} {}", code.word())?;
        file.sync_all()
    }

    fn rewrite_list(&self) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.list_path())?;
        let mut keys: Vec<&String> = self.statuses.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(file, "{key} {}", self.statuses[key].word())?;
        }
        file.sync_all()
    }

    /// Totals grouped as passed/skipped/(timeout+warned)/failed.
    pub fn banner(&self) {
        let total = self.statuses.len();
        let passed = self.count(Code::Passed);
        let skipped = self.count(Code::Skipped);
        let broken = self.count(Code::Timeout) + self.count(Code::Warned);
        let failed = self.count(Code::Failed) + self.count(Code::Interrupted);
        println!("{total} tests: {passed} passed, {skipped} skipped, {broken} broken, {failed} failed");
    }

    /// Print every entry that isn't `PASSED`.
    pub fn details(&self) {
        let mut entries: Vec<(&String, &Code)> = self
            .statuses
            .iter()
            .filter(|(_, code)| !matches!(code, Code::Passed))
            .collect();
        entries.sort_by_key(|(id, _)| id.as_str());
        for (id, code) in entries {
            println!("{id}: {}", code.word());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtr_core::Flavour;

    fn id(name: &str) -> TestId {
        TestId::new(Flavour::new("vanilla"), PathBuf::from(name))
    }

    #[test]
    fn fresh_start_then_done_transition() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::new(dir.path().to_path_buf());
        let t = id("a.sh");
        journal.started(&t);
        assert!(!journal.is_done(&t));
        journal.done(&t, Code::Passed);
        assert!(journal.is_done(&t));
        assert_eq!(journal.count(Code::Passed), 1);
    }

    #[test]
    fn restarting_a_started_test_becomes_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::new(dir.path().to_path_buf());
        let t = id("a.sh");
        journal.started(&t);
        journal.started(&t);
        assert_eq!(journal.statuses.get(&t.to_string()), Some(&Code::Retried));
    }

    #[test]
    fn consecutive_timeouts_reset_on_other_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::new(dir.path().to_path_buf());
        journal.done(&id("a.sh"), Code::Timeout);
        journal.done(&id("b.sh"), Code::Timeout);
        assert_eq!(journal.consecutive_timeouts(), 2);
        journal.done(&id("c.sh"), Code::Passed);
        assert_eq!(journal.consecutive_timeouts(), 0);
    }

    #[test]
    fn resume_replays_journal_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = Journal::new(dir.path().to_path_buf());
            journal.started(&id("a.sh"));
            journal.done(&id("a.sh"), Code::Passed);
            journal.started(&id("b.sh"));
        }
        let mut resumed = Journal::new(dir.path().to_path_buf());
        resumed.read().unwrap();
        assert!(resumed.is_done(&id("a.sh")));
        assert!(!resumed.is_done(&id("b.sh")));
    }

    #[test]
    fn journal_monotonicity_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::new(dir.path().to_path_buf());
        journal.started(&id("a.sh"));
        journal.done(&id("a.sh"), Code::Failed);
        journal.started(&id("b.sh"));
        journal.done(&id("b.sh"), Code::Skipped);

        let mut replayed = Journal::new(dir.path().to_path_buf());
        replayed.read().unwrap();
        assert_eq!(replayed.statuses, journal.statuses);
    }

    #[test]
    fn unknown_word_parses_without_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("journal"), "x:y.sh garbage\n").unwrap();
        let mut journal = Journal::new(dir.path().to_path_buf());
        journal.read().unwrap();
        assert_eq!(journal.statuses.get("x:y.sh"), Some(&Code::Unknown));
    }
}
