use std::time::Instant;

use crate::timed_buffer::TimedLine;

/// Recognizes in-band sentinel lines (`@TESTDIR=...`, `@PREFIX=...`) and
/// substitutes their keys (`@TESTDIR@`, `@PREFIX@`) into later output.
///
/// All known keys are replaced repeatedly, leftmost occurrence first, until
/// none remain — callers must not configure a value that itself contains a
/// key, or substitution would not terminate usefully (it still terminates,
/// since `find` always advances past a replaced span, but the result would
/// be surprising).
#[derive(Debug, Clone)]
pub struct Substitutor {
    map: Vec<(&'static str, String)>,
}

impl Default for Substitutor {
    fn default() -> Self {
        Self {
            map: vec![("@TESTDIR@", String::new()), ("@PREFIX@", String::new())],
        }
    }
}

impl Substitutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns `true` if the line was a directive (`@TESTDIR=`
    /// or `@PREFIX=`) and was consumed — such lines are never emitted.
    pub fn ingest(&mut self, line: &str) -> bool {
        if let Some(value) = line.strip_prefix("@TESTDIR=") {
            self.set("@TESTDIR@", value.trim_end_matches('\n'));
            true
        } else if let Some(value) = line.strip_prefix("@PREFIX=") {
            self.set("@PREFIX@", value.trim_end_matches('\n'));
            true
        } else {
            false
        }
    }

    fn set(&mut self, key: &'static str, value: &str) {
        if let Some(entry) = self.map.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.to_string();
        }
    }

    /// Replace every known key's leftmost occurrence, repeating until no key
    /// remains anywhere in the string.
    pub fn substitute(&self, input: &str) -> String {
        let mut out = input.to_string();
        loop {
            let mut earliest: Option<(usize, &str, &str)> = None;
            for (key, value) in &self.map {
                if let Some(pos) = out.find(key) {
                    if earliest.is_none_or(|(p, _, _)| pos < p) {
                        earliest = Some((pos, key, value.as_str()));
                    }
                }
            }
            match earliest {
                Some((pos, key, value)) => out.replace_range(pos..pos + key.len(), value),
                None => break,
            }
        }
        out
    }
}

/// Timestamps each [`TimedLine`] relative to a fixed test-start instant and
/// runs the line through a [`Substitutor`].
#[derive(Debug, Clone)]
pub struct Formatter {
    start: Instant,
    pub substitutor: Substitutor,
}

impl Formatter {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            substitutor: Substitutor::new(),
        }
    }

    /// Format one line. `suppress` is true when continuing a partial line
    /// already begun on a previous call — the `"[mm:ss] "` prefix is omitted,
    /// but any `\r` inside the line still gets a fresh prefix so progress
    /// bars redraw correctly under a terminal.
    ///
    /// Sentinel lines (`@TESTDIR=`/`@PREFIX=`) are consumed and formatted to
    /// an empty byte string — callers should skip writing an empty result.
    pub fn format(&mut self, line: &TimedLine, suppress: bool) -> Vec<u8> {
        let text = String::from_utf8_lossy(&line.bytes);
        if self.substitutor.ingest(&text) {
            return Vec::new();
        }
        let text = self.substitutor.substitute(&text);
        let prefix = self.prefix(line.stamp);

        let mut out = String::new();
        if suppress {
            for ch in text.chars() {
                out.push(ch);
                if ch == '\r' {
                    out.push_str(&prefix);
                }
            }
        } else {
            out.push_str(&prefix);
            out.push_str(&text);
        }
        out.into_bytes()
    }

    fn prefix(&self, at: Instant) -> String {
        let elapsed = at.saturating_duration_since(self.start);
        let secs = elapsed.as_secs();
        format!("[{:2}:{:02}] ", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutor_ignores_lines_before_directive() {
        let mut sub = Substitutor::new();
        assert_eq!(sub.substitute("hello @TESTDIR@"), "hello @TESTDIR@");
        assert!(sub.ingest("@TESTDIR=/tmp/x\n"));
        assert_eq!(sub.substitute("hello @TESTDIR@\n"), "hello /tmp/x\n");
    }

    #[test]
    fn substitutor_handles_both_keys_leftmost_first() {
        let mut sub = Substitutor::new();
        sub.ingest("@TESTDIR=/a");
        sub.ingest("@PREFIX=P");
        assert_eq!(sub.substitute("@PREFIX@/@TESTDIR@"), "P/a");
    }

    #[test]
    fn format_prepends_mmss_prefix() {
        let start = Instant::now();
        let mut fmt = Formatter::new(start);
        let line = TimedLine {
            stamp: start,
            bytes: b"hi\n".to_vec(),
        };
        let out = fmt.format(&line, false);
        assert_eq!(out, b"[ 0:00] hi\n");
    }

    #[test]
    fn format_suppresses_prefix_on_continuation() {
        let start = Instant::now();
        let mut fmt = Formatter::new(start);
        let line = TimedLine {
            stamp: start,
            bytes: b"partial".to_vec(),
        };
        let out = fmt.format(&line, true);
        assert_eq!(out, b"partial");
    }

    #[test]
    fn format_consumes_sentinel_lines() {
        let start = Instant::now();
        let mut fmt = Formatter::new(start);
        let line = TimedLine {
            stamp: start,
            bytes: b"@TESTDIR=/tmp/x\n".to_vec(),
        };
        let out = fmt.format(&line, false);
        assert!(out.is_empty());
    }

    #[test]
    fn format_restamps_carriage_return_when_suppressed() {
        let start = Instant::now();
        let mut fmt = Formatter::new(start);
        let line = TimedLine {
            stamp: start,
            bytes: b"a\rb".to_vec(),
        };
        let out = fmt.format(&line, true);
        assert_eq!(out, b"a\r[ 0:00] b");
    }
}
