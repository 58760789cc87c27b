//! `clap::Parser` front end mirroring the flag table one-to-one. Grounded on
//! the teacher's `cli-sub-agent::cli` derive style (long flags, `Option<T>`
//! for optional values, repeatable flags collected as `Vec<String>`).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vtr", version, about = "Supervising test runner for shell-based functional tests")]
pub struct Cli {
    /// Root of the test tree. REQUIRED, but validated as a `RunnerError`
    /// rather than a `clap` usage error so missing-testdir goes through the
    /// same configuration-error path as a malformed `--interpreter`.
    #[arg(long)]
    pub testdir: Option<PathBuf>,

    /// Where journal, list, heartbeat, and per-test `.txt` logs live.
    #[arg(long, default_value = "out")]
    pub outdir: PathBuf,

    /// Child's `chdir` target (default: testdir).
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Load the journal and skip tests already done.
    #[arg(long)]
    pub r#continue: bool,

    /// Comma-separated regexes; a test is included if any matches.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Comma-separated regexes; a test is excluded if any matches.
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Comma-separated flavour tags to run.
    #[arg(long, value_delimiter = ',', default_value = "vanilla")]
    pub flavours: Vec<String>,

    /// Comma-separated extra file paths watched per test.
    #[arg(long, value_delimiter = ',')]
    pub watch: Vec<PathBuf>,

    /// `ext:script` mapping; repeatable. Tests ending in `.ext` run via
    /// `<testdir>/<script> <file>`.
    #[arg(long = "interpreter")]
    pub interpreters: Vec<String>,

    /// Primary ordering regex; repeatable.
    #[arg(long = "sort-hint")]
    pub sort_hints: Vec<String>,

    /// Per-test inactivity timeout, in seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Total wall-clock budget, in seconds.
    #[arg(long = "total-timeout", default_value_t = 10_800)]
    pub total_timeout: u64,

    /// Parallel slots. Forces `--batch` if greater than 1.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Non-interactive, line-buffered-per-slot UI.
    #[arg(long)]
    pub batch: bool,

    /// Stream every slot's output live to stdout.
    #[arg(long)]
    pub verbose: bool,

    /// Attach the child directly to the controlling terminal.
    #[arg(long)]
    pub interactive: bool,

    /// Enable the kernel-log tap.
    #[arg(long)]
    pub kmsg: bool,

    /// Append `.` to this file every 20s while a test runs.
    #[arg(long)]
    pub heartbeat: Option<PathBuf>,

    /// Stop (after a long sleep) once two consecutive tests time out.
    #[arg(long = "fatal-timeouts")]
    pub fatal_timeouts: bool,

    /// Env var name used to pass the flavour tag to children.
    #[arg(long = "flavour-var", default_value = "TEST_FLAVOUR")]
    pub flavour_var: String,
}
