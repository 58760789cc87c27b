//! Recursive directory listing, runnability/filter decisions, and sort-key
//! assembly: the "pure helper" and "thin shim" pieces the distilled spec
//! treats as external collaborators, reinstated here as a concrete module
//! because a runnable binary needs one (SPEC_FULL.md §4.9).

use std::fs;
use std::path::{Path, PathBuf};

use vtr_core::{Options, RunnerError, TestId};
use vtr_testcase::TestCase;

/// Sort-hint captures, then stem parts, then the bare filename — each level
/// compares as a unit so a shorter stem-part sequence (`test.sh`) always
/// sorts before one that extends it (`test-special.sh`), matching
/// SPEC_FULL.md §4.9. The filename only tiebreaks within one stem sequence.
type SortKey = (Vec<String>, Vec<String>, String);

/// Discover every runnable `(flavour, file)` pair under `options.testdir`,
/// apply the include/exclude/flavour filters, and return `TestCase`s in
/// final run order (sort key first, flavour tag as a tiebreaker for files
/// that run under more than one flavour).
pub fn discover(options: &Options) -> Result<Vec<TestCase>, RunnerError> {
    let files = list_files(&options.testdir)?;
    let mut keyed: Vec<(SortKey, String, TestCase)> = Vec::new();

    for file in &files {
        let rel = file
            .strip_prefix(&options.testdir)
            .unwrap_or(file)
            .to_path_buf();
        if under_excluded_dir(&rel) {
            continue;
        }
        let Some(interpreter) = runnable_interpreter(&rel, options) else {
            continue;
        };
        let haystack = rel.to_string_lossy();
        if !options.passes_filters(&haystack) {
            continue;
        }
        let key = sort_key(&rel, options);

        for flavour in &options.flavours {
            if !options.flavour_passes(flavour) {
                continue;
            }
            let id = TestId::new(flavour.clone(), rel.clone());
            let case = TestCase::new(id, file.clone(), interpreter.clone());
            keyed.push((key.clone(), flavour.as_str().to_string(), case));
        }
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(keyed.into_iter().map(|(_, _, case)| case).collect())
}

/// `lib/` and `data/` subtrees are never runnable, regardless of extension.
fn under_excluded_dir(rel: &Path) -> bool {
    rel.components().any(|c| {
        let s = c.as_os_str();
        s == "lib" || s == "data"
    })
}

/// `Some(None)` for a plain `.sh` test; `Some(Some(script))` for a file whose
/// extension matches a `--interpreter ext:script` mapping, where `script` is
/// resolved against `testdir`; `None` if the file isn't runnable at all.
fn runnable_interpreter(rel: &Path, options: &Options) -> Option<Option<PathBuf>> {
    let ext = rel.extension()?.to_str()?;
    if ext == "sh" {
        return Some(None);
    }
    options
        .interpreters
        .get(ext)
        .map(|script| Some(options.testdir.join(script)))
}

/// First captured group (or whole match, or empty) of each `--sort-hint`
/// regex against the relative path, then the filename stem's `[-_ .]`-split
/// parts, then the filename itself — as three separate fields compared in
/// that order, so e.g. `["test"]` (from `test.sh`) sorts before
/// `["test", "special"]` (from `test-special.sh`) regardless of what the
/// filename field of either entry contains.
fn sort_key(rel: &Path, options: &Options) -> SortKey {
    let haystack = rel.to_string_lossy();
    let mut hints = Vec::new();

    for hint in &options.sort_hints {
        match hint.captures(&haystack) {
            Some(caps) => {
                let piece = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                hints.push(piece.to_string());
            }
            None => hints.push(String::new()),
        }
    }

    let stem = rel
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem_parts: Vec<String> = stem
        .split(|c: char| "-_ .".contains(c))
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();

    let filename = rel
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    (hints, stem_parts, filename)
}

/// Every regular file under `root`, recursively, in no particular order
/// (callers sort by their own key). Directory-read failures are fatal,
/// matching §7's "directory-read errors during setup: fatal" contract.
fn list_files(root: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let mut out = Vec::new();
    list_files_into(root, &mut out)?;
    Ok(out)
}

fn list_files_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RunnerError> {
    let entries = fs::read_dir(dir).map_err(|source| RunnerError::DirectoryRead {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| RunnerError::DirectoryRead {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| RunnerError::DirectoryRead {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            list_files_into(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashMap;
    use std::time::Duration;
    use vtr_core::{Flavour, UiMode};

    fn opts(testdir: PathBuf) -> Options {
        Options {
            testdir,
            outdir: PathBuf::from("/tmp/out"),
            workdir: PathBuf::from("/tmp/work"),
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

    #[test]
    fn discovers_sh_files_and_skips_lib_and_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sh"), "exit 0\n").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/helper.sh"), "\n").unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/fixture.sh"), "\n").unwrap();
        std::fs::write(dir.path().join("README"), "not a test\n").unwrap();

        let cases = discover(&opts(dir.path().to_path_buf())).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id().path.as_os_str(), "a.sh");
    }

    #[test]
    fn interpreter_mapping_admits_non_sh_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.py"), "\n").unwrap();
        let mut options = opts(dir.path().to_path_buf());
        options
            .interpreters
            .insert("py".to_string(), PathBuf::from("run_py.sh"));

        let cases = discover(&options).unwrap();
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn one_test_case_per_passing_flavour() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sh"), "\n").unwrap();
        let mut options = opts(dir.path().to_path_buf());
        options.flavours = vec![Flavour::new("vanilla"), Flavour::new("fips")];

        let cases = discover(&options).unwrap();
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn only_and_skip_filters_apply_to_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("net/dhcp.sh"), "\n").unwrap();
        std::fs::create_dir(dir.path().join("disk")).unwrap();
        std::fs::write(dir.path().join("disk/io.sh"), "\n").unwrap();

        let mut options = opts(dir.path().to_path_buf());
        options.only = vec![Regex::new("^net/").unwrap()];

        let cases = discover(&options).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id().path, PathBuf::from("net/dhcp.sh"));
    }

    #[test]
    fn sort_places_plain_stem_before_hyphenated_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test-special.sh"), "\n").unwrap();
        std::fs::write(dir.path().join("test.sh"), "\n").unwrap();

        let cases = discover(&opts(dir.path().to_path_buf())).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.id().path.to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["test.sh", "test-special.sh"]);
    }

    #[test]
    fn sort_hint_capture_group_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("020-late.sh"), "\n").unwrap();
        std::fs::write(dir.path().join("010-early.sh"), "\n").unwrap();

        let mut options = opts(dir.path().to_path_buf());
        options.sort_hints = vec![Regex::new(r"^(\d+)-").unwrap()];

        let cases = discover(&options).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.id().path.to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["010-early.sh", "020-late.sh"]);
    }
}
