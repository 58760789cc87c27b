//! Assembles the fully resolved [`Options`] record from parsed CLI flags
//! plus the environment-variable overlay in SPEC_FULL.md §6. This is the
//! "thin shim" the distilled spec treats as an external collaborator,
//! reinstated here as a concrete module (§4.11).

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use vtr_core::{Flavour, Options, RunnerError, UiMode};

use crate::cli::Cli;

/// A variable counts as "set" only if present and neither empty nor `"0"`.
fn env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(v) if !v.is_empty() && v != "0" => Some(v),
        _ => None,
    }
}

fn compile_all(patterns: impl Iterator<Item = String>) -> Result<Vec<Regex>, RunnerError> {
    patterns
        .map(|p| Regex::new(&p).map_err(|source| RunnerError::BadRegex { pattern: p, source }))
        .collect()
}

fn parse_interpreters(entries: &[String]) -> Result<HashMap<String, PathBuf>, RunnerError> {
    let mut map = HashMap::new();
    for entry in entries {
        let Some((ext, script)) = entry.split_once(':') else {
            return Err(RunnerError::InvalidInterpreterMapping(entry.clone()));
        };
        if ext.is_empty() || script.is_empty() {
            return Err(RunnerError::InvalidInterpreterMapping(entry.clone()));
        }
        map.insert(ext.to_string(), PathBuf::from(script));
    }
    Ok(map)
}

fn resolve_ui_mode(cli: &Cli) -> UiMode {
    let explicit = if cli.interactive {
        Some(UiMode::Interactive)
    } else if cli.verbose {
        Some(UiMode::Verbose)
    } else if cli.batch {
        Some(UiMode::Batch)
    } else if env_var("INTERACTIVE").is_some() {
        Some(UiMode::Interactive)
    } else if env_var("VERBOSE").is_some() {
        Some(UiMode::Verbose)
    } else if env_var("BATCH").is_some() {
        Some(UiMode::Batch)
    } else {
        None
    };

    let jobs = resolve_jobs(cli);
    match explicit {
        Some(UiMode::Interactive) => UiMode::Interactive,
        Some(mode) if jobs <= 1 => mode,
        _ if jobs > 1 => UiMode::Batch,
        Some(mode) => mode,
        None => UiMode::Plain,
    }
}

fn resolve_jobs(cli: &Cli) -> usize {
    env_var("JOBS")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(cli.jobs)
        .max(1)
}

/// Parse `Options` out of `cli` plus the process environment. Configuration
/// errors (missing testdir is enforced by `clap` itself; malformed
/// `--interpreter`, bad regexes) surface as `RunnerError`.
pub fn from_cli_and_env(cli: Cli) -> Result<Options, RunnerError> {
    let testdir = cli.testdir.clone().ok_or(RunnerError::MissingTestDir)?;
    let workdir = cli.workdir.clone().unwrap_or_else(|| testdir.clone());

    let mut only_patterns = cli.only.clone();
    if let Some(extra) = env_var("T") {
        only_patterns.extend(extra.split(',').map(str::to_string));
    }
    let mut skip_patterns = cli.skip.clone();
    if let Some(extra) = env_var("S") {
        skip_patterns.extend(extra.split(',').map(str::to_string));
    }

    let only = compile_all(only_patterns.into_iter().filter(|p| !p.is_empty()))?;
    let skip = compile_all(skip_patterns.into_iter().filter(|p| !p.is_empty()))?;
    let sort_hints = compile_all(cli.sort_hints.iter().cloned())?;

    let flavour_filter = match env_var("F") {
        Some(pattern) => Some(Regex::new(&pattern).map_err(|source| RunnerError::BadRegex { pattern, source })?),
        None => None,
    };

    let flavours = cli
        .flavours
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| Flavour::new(f.clone()))
        .collect();

    let interpreters = parse_interpreters(&cli.interpreters)?;
    let jobs = resolve_jobs(&cli);
    let ui_mode = resolve_ui_mode(&cli);

    Ok(Options {
        testdir,
        outdir: cli.outdir,
        workdir,
        continue_: cli.r#continue,
        only,
        skip,
        flavours,
        flavour_filter,
        watch: cli.watch,
        interpreters,
        sort_hints,
        timeout: Duration::from_secs(cli.timeout),
        total_timeout: Duration::from_secs(cli.total_timeout),
        jobs,
        ui_mode,
        kmsg: cli.kmsg,
        heartbeat: cli.heartbeat,
        fatal_timeouts: cli.fatal_timeouts,
        flavour_var: cli.flavour_var,
    })
}
