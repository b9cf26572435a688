//! ProcTable reader: enumerates per-process kernel stats.
//!
//! Produces a `(pid, ppid, cpu_time_s, rss_bytes)` tuple for every process
//! currently visible under `/proc`, following the fixed-position record
//! layout `/proc/<pid>/stat` exposes: pid (0), ppid (3), stime-jiffies (13),
//! utime-jiffies (14), resident pages (23). Parse failures on an individual
//! record are silently skipped — the next sample tick re-reads.

use std::fs;

/// One process's raw kernel-reported stats for this sample tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub pid: i32,
    pub ppid: i32,
    pub cpu_time_s: f64,
    pub rss_bytes: u64,
}

const PID_POS: usize = 0;
const PPID_POS: usize = 3;
const STIME_POS: usize = 13;
const UTIME_POS: usize = 14;
const RSS_POS: usize = 23;
const MAX_POS: usize = RSS_POS;

/// Reads every process currently visible in `/proc`, for pids in
/// `[1, pid_max)`. Returns the tuples read; the count is `result.len()`.
/// I/O errors opening the directory itself are propagated; failures on
/// individual entries (transient death, malformed records) are skipped.
pub fn read_all(
    pid_max: i32,
    clock_ticks_per_sec: u64,
    page_size_bytes: u64,
) -> std::io::Result<Vec<ProcessSample>> {
    let mut out = Vec::new();

    for entry in fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
            continue;
        }
        let Ok(dir_pid) = name.parse::<i32>() else {
            continue;
        };
        if dir_pid <= 0 || dir_pid >= pid_max {
            continue;
        }

        let path = format!("/proc/{name}/stat");
        let Ok(content) = fs::read_to_string(&path) else {
            // Transient process death between readdir and open: not
            // observed this tick, next sample will retry.
            continue;
        };

        if let Some(sample) = parse_stat_record(
            &content,
            dir_pid,
            pid_max,
            clock_ticks_per_sec,
            page_size_bytes,
        ) {
            out.push(sample);
        }
    }

    Ok(out)
}

/// Parses one `/proc/<pid>/stat` record's whitespace-separated fields.
///
/// `dir_pid` is the pid implied by the directory entry name; a record whose
/// self-reported pid (field 0) disagrees is discarded, since that indicates
/// the pid was reused between listing the directory and opening the file.
fn parse_stat_record(
    content: &str,
    dir_pid: i32,
    pid_max: i32,
    clock_ticks_per_sec: u64,
    page_size_bytes: u64,
) -> Option<ProcessSample> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() <= MAX_POS {
        return None;
    }

    let pid: i32 = fields[PID_POS].parse().ok()?;
    if pid != dir_pid {
        return None;
    }

    let ppid: i32 = fields[PPID_POS].parse().ok()?;
    if ppid < 0 || ppid >= pid_max {
        return None;
    }

    let stime_jiffies: u64 = fields[STIME_POS].parse().ok()?;
    let utime_jiffies: u64 = fields[UTIME_POS].parse().ok()?;
    let rss_pages: u64 = fields[RSS_POS].parse().ok()?;

    let cpu_time_s = (utime_jiffies + stime_jiffies) as f64 / clock_ticks_per_sec as f64;
    let rss_bytes = rss_pages * page_size_bytes;

    Some(ProcessSample {
        pid,
        ppid,
        cpu_time_s,
        rss_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_record(pid: i32, ppid: i32, utime: u64, stime: u64, rss_pages: u64) -> String {
        // Real stat records have 52+ fields; only positions up to 23 matter
        // here, padded with placeholder values elsewhere.
        let mut fields = vec!["0".to_string(); MAX_POS + 1];
        fields[PID_POS] = pid.to_string();
        fields[1] = "(cat)".to_string();
        fields[2] = "R".to_string();
        fields[PPID_POS] = ppid.to_string();
        fields[UTIME_POS] = utime.to_string();
        fields[STIME_POS] = stime.to_string();
        fields[RSS_POS] = rss_pages.to_string();
        fields.join(" ")
    }

    #[test]
    fn parses_well_formed_record() {
        let record = synthetic_record(42, 7, 100, 50, 256);
        let sample = parse_stat_record(&record, 42, 32768, 100, 4096).unwrap();
        assert_eq!(sample.pid, 42);
        assert_eq!(sample.ppid, 7);
        assert_eq!(sample.cpu_time_s, 1.5);
        assert_eq!(sample.rss_bytes, 256 * 4096);
    }

    #[test]
    fn mismatched_directory_pid_is_discarded() {
        let record = synthetic_record(42, 7, 100, 50, 256);
        assert!(parse_stat_record(&record, 99, 32768, 100, 4096).is_none());
    }

    #[test]
    fn ppid_outside_range_is_discarded() {
        let record = synthetic_record(42, 40000, 100, 50, 256);
        assert!(parse_stat_record(&record, 42, 32768, 100, 4096).is_none());
    }

    #[test]
    fn truncated_record_is_discarded() {
        assert!(parse_stat_record("42 (cat) R 7", 42, 32768, 100, 4096).is_none());
    }

    #[test]
    fn repeated_parse_is_idempotent() {
        let record = synthetic_record(1234, 1, 10, 5, 64);
        let a = parse_stat_record(&record, 1234, 32768, 100, 4096).unwrap();
        let b = parse_stat_record(&record, 1234, 32768, 100, 4096).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reads_self_from_live_proc() {
        let samples = read_all(4 * 1024 * 1024, 100, 4096).expect("read /proc");
        let me = std::process::id() as i32;
        assert!(samples.iter().any(|s| s.pid == me));
    }
}
