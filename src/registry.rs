//! Process registry: a sparse table of pids currently live under
//! supervision, their last-observed stats, and per-sample freshness.
//!
//! Implemented as a `HashMap<pid, ProcessRecord>` rather than a
//! `pid_max`-sized flat array (see spec.md's Design Notes / REDESIGN FLAGS):
//! it scales with the number of processes actually observed instead of the
//! kernel's configured pid ceiling, and needs no intrusive active-list to
//! get O(active) iteration — map iteration already is.

use std::collections::HashMap;

/// An entry tracked for one pid. Tree links are non-owning (plain pids) and
/// are rebuilt from scratch every sample by the tree builder.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub active: bool,
    pub pid: i32,
    pub ppid: i32,
    pub cpu_time_s: f64,
    /// Monotone peak resident memory for this pid, in megabytes, while
    /// `active` remains true.
    pub rss_mb: f64,
    pub last_sample_seq: u64,

    pub parent: Option<i32>,
    pub first_child: Option<i32>,
    pub next_sibling: Option<i32>,

    /// Per-traversal cycle guards, reset at the start of each walk.
    pub visiting_sample: bool,
    pub visiting_kill: bool,
}

impl ProcessRecord {
    fn new(pid: i32, ppid: i32, cpu_time_s: f64, rss_mb: f64, seq: u64) -> Self {
        ProcessRecord {
            active: true,
            pid,
            ppid,
            cpu_time_s,
            rss_mb,
            last_sample_seq: seq,
            parent: None,
            first_child: None,
            next_sibling: None,
            visiting_sample: false,
            visiting_kill: false,
        }
    }

    /// Clears the rebuilt-per-sample tree links (tree builder pass 1).
    pub fn clear_tree_links(&mut self) {
        self.parent = None;
        self.first_child = None;
        self.next_sibling = None;
    }
}

/// The live registry plus lifetime bookkeeping.
pub struct Registry {
    records: HashMap<i32, ProcessRecord>,
    /// CPU seconds contributed by descendants that have since exited —
    /// diagnostic continuity only, never consulted by limit checks.
    pub accumulated_time_s: f64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            records: HashMap::new(),
            accumulated_time_s: 0.0,
        }
    }

    pub fn get(&self, pid: i32) -> Option<&ProcessRecord> {
        self.records.get(&pid)
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut ProcessRecord> {
        self.records.get_mut(&pid)
    }

    pub fn contains_active(&self, pid: i32) -> bool {
        self.records.get(&pid).is_some_and(|r| r.active)
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.values().filter(|r| r.active)
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.records.values_mut().filter(|r| r.active)
    }

    /// Creates a new active entry or updates an existing one: `rss_mb`
    /// takes the running max, `cpu_time_s` is overwritten with the latest
    /// observation. Marks the record fresh for sequence `seq`.
    pub fn record_observation(&mut self, pid: i32, ppid: i32, cpu_time_s: f64, rss_mb: f64, seq: u64) {
        match self.records.get_mut(&pid) {
            Some(existing) if existing.active => {
                existing.ppid = ppid;
                existing.cpu_time_s = cpu_time_s;
                if rss_mb > existing.rss_mb {
                    existing.rss_mb = rss_mb;
                }
                existing.last_sample_seq = seq;
            }
            _ => {
                self.records
                    .insert(pid, ProcessRecord::new(pid, ppid, cpu_time_s, rss_mb, seq));
            }
        }
    }

    /// Removes every active record whose `last_sample_seq != seq`, folding
    /// its latest `cpu_time_s` into `accumulated_time_s`. Returns the count
    /// flushed.
    pub fn flush_stale(&mut self, seq: u64) -> u64 {
        let stale_pids: Vec<i32> = self
            .records
            .iter()
            .filter(|(_, r)| r.active && r.last_sample_seq != seq)
            .map(|(pid, _)| *pid)
            .collect();

        for pid in &stale_pids {
            if let Some(record) = self.records.get_mut(pid) {
                self.accumulated_time_s += record.cpu_time_s;
                record.active = false;
            }
        }

        stale_pids.len() as u64
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_observation_creates_then_updates() {
        let mut reg = Registry::new();
        reg.record_observation(10, 1, 1.0, 5.0, 1);
        let r = reg.get(10).unwrap();
        assert!(r.active);
        assert_eq!(r.cpu_time_s, 1.0);
        assert_eq!(r.rss_mb, 5.0);

        reg.record_observation(10, 1, 2.0, 3.0, 2);
        let r = reg.get(10).unwrap();
        // cpu_time_s is overwritten...
        assert_eq!(r.cpu_time_s, 2.0);
        // ...but rss_mb takes the max, never decreasing.
        assert_eq!(r.rss_mb, 5.0);
        assert_eq!(r.last_sample_seq, 2);
    }

    #[test]
    fn rss_is_monotone_while_active() {
        let mut reg = Registry::new();
        reg.record_observation(1, 0, 0.0, 10.0, 1);
        reg.record_observation(1, 0, 0.0, 50.0, 2);
        reg.record_observation(1, 0, 0.0, 20.0, 3);
        assert_eq!(reg.get(1).unwrap().rss_mb, 50.0);
    }

    #[test]
    fn flush_stale_deactivates_and_accumulates() {
        let mut reg = Registry::new();
        reg.record_observation(1, 0, 3.5, 1.0, 1);
        reg.record_observation(2, 1, 2.0, 1.0, 1);
        reg.record_observation(1, 0, 4.0, 1.0, 2); // still fresh at seq 2
                                                    // pid 2 not re-observed at seq 2: stale

        let flushed = reg.flush_stale(2);
        assert_eq!(flushed, 1);
        assert!(!reg.get(2).unwrap().active);
        assert!(reg.get(1).unwrap().active);
        assert_eq!(reg.accumulated_time_s, 2.0);
    }

    #[test]
    fn reactivating_a_flushed_pid_is_active_again() {
        let mut reg = Registry::new();
        reg.record_observation(5, 1, 1.0, 1.0, 1);
        reg.flush_stale(2); // pid 5 is stale at seq 2, deactivated
        assert!(!reg.contains_active(5));

        reg.record_observation(5, 1, 0.5, 0.5, 3);
        assert!(reg.contains_active(5));
    }
}
