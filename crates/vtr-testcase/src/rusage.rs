//! Formats the one-line rusage summary printed after a `PASSED` batch result:
//! `mm:ss wall mm:ss user mm:ss sys   NNNM RSS | IOPS: X.Y K in X.Y K out`.

use std::time::Duration;

fn timefmt(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:2}:{:02}", secs / 60, secs % 60)
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}

fn thousands(n: i64) -> String {
    format!("{:.1}", n as f64 / 1000.0)
}

/// `elapsed` is the wall-clock duration of the whole test; `usage` is the
/// `rusage` snapshot captured at reap time. `ru_maxrss` is kibibytes on
/// Linux; divided by 1024 for a MiB figure. `ru_inblock`/`ru_oublock` are
/// printed in thousands with one decimal place.
pub fn format_rusage_line(elapsed: Duration, usage: &libc::rusage) -> String {
    let user = timeval_to_duration(usage.ru_utime);
    let sys = timeval_to_duration(usage.ru_stime);
    let rss_mb = usage.ru_maxrss / 1024;
    format!(
        "{} wall {} user {} sys   {}M RSS | IOPS: {} K in {} K out",
        timefmt(elapsed),
        timefmt(user),
        timefmt(sys),
        rss_mb,
        thousands(usage.ru_inblock),
        thousands(usage.ru_oublock),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_usage() -> libc::rusage {
        // SAFETY: `rusage` is a plain-old-data struct; all-zero is valid.
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn formats_zeroed_usage() {
        let usage = zeroed_usage();
        let line = format_rusage_line(Duration::from_secs(5), &usage);
        assert_eq!(line, " 0:05 wall  0:00 user  0:00 sys   0M RSS | IOPS: 0.0 K in 0.0 K out");
    }

    #[test]
    fn rss_divides_kib_to_mib_and_blocks_to_thousands() {
        let mut usage = zeroed_usage();
        usage.ru_maxrss = 20_480;
        usage.ru_inblock = 1500;
        usage.ru_oublock = 2500;
        let line = format_rusage_line(Duration::from_secs(0), &usage);
        assert!(line.contains("20M RSS"));
        assert!(line.contains("IOPS: 1.5 K in 2.5 K out"));
    }
}
