use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use regex::Regex;

/// A short tag naming a variant of the suite (e.g. `vanilla`).
///
/// Injected into the child's environment under a caller-configured variable
/// name (`Options::flavour_var`) so tests may adjust behavior per-flavour.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Flavour(pub String);

impl Flavour {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Flavour {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// `(flavour, path)`, flattened to `flavour:path` for display and journaling.
///
/// `path` is relative to the test directory; `/` is mapped to `_` when
/// forming the per-test log-file name via [`TestId::log_name`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId {
    pub flavour: Flavour,
    pub path: PathBuf,
}

impl TestId {
    pub fn new(flavour: Flavour, path: PathBuf) -> Self {
        Self { flavour, path }
    }

    /// `outdir/<flavour>:<path-with-slashes-as-underscores>.txt` stem,
    /// i.e. the `flavour:path` form with `/` replaced by `_`.
    pub fn log_name(&self) -> String {
        let path = self.path.to_string_lossy().replace('/', "_");
        format!("{}:{}", self.flavour, path)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.flavour, self.path.display())
    }
}

/// A journal result code. See the journal module for transition rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Started,
    Retried,
    Unknown,
    Failed,
    Interrupted,
    KnownFail,
    Passed,
    Skipped,
    Timeout,
    Warned,
}

impl Code {
    /// `done` is any code other than `STARTED` or `INTERRUPTED`.
    pub fn is_done(self) -> bool {
        !matches!(self, Code::Started | Code::Interrupted)
    }

    /// The word this code is written as in `journal`/`list`.
    ///
    /// `Retried` and `KnownFail` round-trip to `unknown` on write — the
    /// emitter only has words for the lower-cased enum names that are
    /// meant to survive a write/read cycle (see the journal's own code-word
    /// round-trip test, which intentionally excludes these two).
    pub fn word(self) -> &'static str {
        match self {
            Code::Started => "started",
            Code::Retried => "unknown",
            Code::Unknown => "unknown",
            Code::Failed => "failed",
            Code::Interrupted => "interrupted",
            Code::KnownFail => "unknown",
            Code::Passed => "passed",
            Code::Skipped => "skipped",
            Code::Timeout => "timeout",
            Code::Warned => "warnings",
        }
    }

    /// Parse a code word as read from `journal`/`list`. Unknown words fall
    /// back to `Unknown`, never error — the journal is a best-effort log.
    pub fn from_word(word: &str) -> Code {
        match word {
            "started" => Code::Started,
            "retried" => Code::Retried,
            "failed" => Code::Failed,
            "interrupted" => Code::Interrupted,
            "passed" => Code::Passed,
            "skipped" => Code::Skipped,
            "timeout" => Code::Timeout,
            "warnings" => Code::Warned,
            _ => Code::Unknown,
        }
    }
}

/// UI mode, resolved from `--batch`/`--verbose`/`--interactive` plus a tty
/// check of stdout. See `vtr-progress` for how each mode routes output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    Interactive,
    Verbose,
    Batch,
    Plain,
}

/// Fully resolved configuration, assembled from CLI flags plus the
/// environment-variable overrides. The sole input to `Supervisor::setup`.
#[derive(Clone, Debug)]
pub struct Options {
    pub testdir: PathBuf,
    pub outdir: PathBuf,
    pub workdir: PathBuf,
    pub continue_: bool,
    pub only: Vec<Regex>,
    pub skip: Vec<Regex>,
    pub flavours: Vec<Flavour>,
    pub flavour_filter: Option<Regex>,
    pub watch: Vec<PathBuf>,
    pub interpreters: HashMap<String, PathBuf>,
    pub sort_hints: Vec<Regex>,
    pub timeout: Duration,
    pub total_timeout: Duration,
    pub jobs: usize,
    pub ui_mode: UiMode,
    pub kmsg: bool,
    pub heartbeat: Option<PathBuf>,
    pub fatal_timeouts: bool,
    pub flavour_var: String,
}

impl Options {
    /// `only` passes iff empty or any regex matches; `skip` passes (i.e.
    /// survives) iff empty or no regex matches.
    pub fn passes_filters(&self, haystack: &str) -> bool {
        let include = self.only.is_empty() || self.only.iter().any(|r| r.is_match(haystack));
        let exclude = self.skip.iter().any(|r| r.is_match(haystack));
        include && !exclude
    }

    pub fn flavour_passes(&self, flavour: &Flavour) -> bool {
        match &self.flavour_filter {
            Some(re) => re.is_match(flavour.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_log_name() {
        let id = TestId::new(Flavour::new("vanilla"), PathBuf::from("net/dhcp.sh"));
        assert_eq!(id.to_string(), "vanilla:net/dhcp.sh");
        assert_eq!(id.log_name(), "vanilla:net_dhcp.sh");
    }

    #[test]
    fn test_code_word_round_trip_for_stable_words() {
        for code in [
            Code::Started,
            Code::Failed,
            Code::Interrupted,
            Code::Passed,
            Code::Skipped,
            Code::Timeout,
            Code::Warned,
        ] {
            let word = code.word();
            let parsed = Code::from_word(word);
            assert_eq!(parsed, code, "word {word:?} did not round-trip");
        }
    }

    #[test]
    fn test_code_retried_and_knownfail_emit_as_unknown() {
        assert_eq!(Code::Retried.word(), "unknown");
        assert_eq!(Code::KnownFail.word(), "unknown");
    }

    #[test]
    fn test_code_from_unrecognized_word_is_unknown() {
        assert_eq!(Code::from_word("bogus"), Code::Unknown);
    }

    #[test]
    fn test_code_is_done() {
        assert!(!Code::Started.is_done());
        assert!(!Code::Interrupted.is_done());
        assert!(Code::Passed.is_done());
        assert!(Code::Timeout.is_done());
    }

    #[test]
    fn test_options_filters() {
        let mut opts = blank_options();
        opts.only = vec![Regex::new("^net/").unwrap()];
        opts.skip = vec![Regex::new("slow").unwrap()];
        assert!(opts.passes_filters("net/dhcp.sh"));
        assert!(!opts.passes_filters("net/slow_dhcp.sh"));
        assert!(!opts.passes_filters("disk/io.sh"));
    }

    fn blank_options() -> Options {
        Options {
            testdir: PathBuf::new(),
            outdir: PathBuf::new(),
            workdir: PathBuf::new(),
            continue_: false,
            only: Vec::new(),
            skip: Vec::new(),
            flavours: vec![Flavour::new("vanilla")],
            flavour_filter: None,
            watch: Vec::new(),
            interpreters: HashMap::new(),
            sort_hints: Vec::new(),
            timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(10_800),
            jobs: 1,
            ui_mode: UiMode::Plain,
            kmsg: false,
            heartbeat: None,
            fatal_timeouts: false,
            flavour_var: "TEST_FLAVOUR".to_string(),
        }
    }
}
