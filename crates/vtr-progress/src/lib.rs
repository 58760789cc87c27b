//! Terminal/batch progress printer with per-slot backlog buffers so
//! parallel streams never interleave mid-line.

use std::io::{self, Write};

use vtr_core::UiMode;

/// Which part of a status line is being written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Starting a fresh line (e.g. "running: foo.sh").
    First,
    /// Overwriting the current line (interactive spinner/elapsed-time pulse).
    Update,
    /// The final result for a line (PASSED/FAILED/...).
    Last,
}

/// Routes per-slot status text to stdout according to `UiMode`, buffering
/// non-zero slots in batch/non-tty mode so their output only ever reaches
/// stdout a complete line at a time.
pub struct Progress {
    ui: UiMode,
    tty: bool,
    backlogs: Vec<String>,
}

impl Progress {
    pub fn new(ui: UiMode, jobs: usize) -> Self {
        Self {
            ui,
            tty: stdout_is_tty(),
            backlogs: vec![String::new(); jobs.max(1)],
        }
    }

    /// Build a `Progress` with an explicit tty override, for tests.
    pub fn with_tty(ui: UiMode, jobs: usize, tty: bool) -> Self {
        Self {
            ui,
            tty,
            backlogs: vec![String::new(); jobs.max(1)],
        }
    }

    pub fn emit(&mut self, slot: usize, phase: Phase, text: &str) {
        let interactive = matches!(self.ui, UiMode::Interactive) && self.tty;
        let batch = matches!(self.ui, UiMode::Batch) || !self.tty;

        if interactive {
            match phase {
                Phase::First | Phase::Last => print!("{text}"),
                Phase::Update => print!("\r{text}"),
            }
            let _ = io::stdout().flush();
        } else if batch {
            self.write_slot(slot, text);
        } else {
            match phase {
                Phase::First | Phase::Update => {}
                Phase::Last => self.write_slot(slot, text),
            }
        }
    }

    fn write_slot(&mut self, slot: usize, text: &str) {
        if slot == 0 {
            print!("{text}");
            let _ = io::stdout().flush();
        } else if let Some(backlog) = self.backlogs.get_mut(slot) {
            backlog.push_str(text);
        }
    }

    /// Promote every complete line from every slot's backlog to stdout,
    /// keeping each slot's trailing partial line for next time.
    pub fn flush(&mut self) {
        for slot in 1..self.backlogs.len() {
            let backlog = std::mem::take(&mut self.backlogs[slot]);
            match backlog.rfind('\n') {
                Some(pos) => {
                    let (complete, rest) = backlog.split_at(pos + 1);
                    print!("{complete}");
                    self.backlogs[slot] = rest.to_string();
                }
                None => self.backlogs[slot] = backlog,
            }
        }
        let _ = io::stdout().flush();
    }
}

fn stdout_is_tty() -> bool {
    // SAFETY: isatty(3) takes a plain fd and has no side effects.
    unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_mode_buffers_non_zero_slots_until_newline() {
        let mut progress = Progress::with_tty(UiMode::Batch, 2, false);
        progress.emit(1, Phase::First, "partial");
        assert_eq!(progress.backlogs[1], "partial");
        progress.emit(1, Phase::Last, " done\n");
        assert_eq!(progress.backlogs[1], "partial done\n");
    }

    #[test]
    fn flush_promotes_complete_lines_and_keeps_tail() {
        let mut progress = Progress::with_tty(UiMode::Batch, 2, false);
        progress.emit(1, Phase::First, "line one\nline two");
        progress.flush();
        assert_eq!(progress.backlogs[1], "line two");
    }

    #[test]
    fn non_interactive_non_batch_suppresses_first_and_update() {
        let mut progress = Progress::with_tty(UiMode::Plain, 2, true);
        progress.emit(1, Phase::First, "should not buffer");
        assert_eq!(progress.backlogs[1], "");
        progress.emit(1, Phase::Update, "still nothing");
        assert_eq!(progress.backlogs[1], "");
        progress.emit(1, Phase::Last, "final\n");
        assert_eq!(progress.backlogs[1], "final\n");
    }
}
