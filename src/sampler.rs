//! Sampler: one execution of the periodic scan, numbered by a monotonic
//! sequence — read the proctable, rebuild the tree, sum the subtree, flush
//! exited pids, and report the tick's aggregates back to the supervisor.

use crate::eventlog::EventLog;
use crate::proctable;
use crate::registry::Registry;
use crate::tree;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of one sample tick, consumed by the supervisor's limit check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleTick {
    pub sampled_time_s: f64,
    pub sampled_memory_mb: f64,
    pub read_count: usize,
}

/// Drives one tick of the sampling algorithm against a shared registry.
pub struct Sampler {
    registry: Mutex<Registry>,
    /// Distinct pids ever observed structurally inside the supervised
    /// subtree (see `tree::walk_sample`'s `visited` output) — the scope
    /// the lifetime `children` counter is defined over, as opposed to every
    /// pid the ProcTable reader happens to see elsewhere on the host.
    subtree_pids: Mutex<HashSet<i32>>,
    pid_max: i32,
    clock_ticks_per_sec: u64,
    page_size_bytes: u64,
}

impl Sampler {
    pub fn new(pid_max: i32, clock_ticks_per_sec: u64, page_size_bytes: u64) -> Self {
        Sampler {
            registry: Mutex::new(Registry::new()),
            subtree_pids: Mutex::new(HashSet::new()),
            pid_max,
            clock_ticks_per_sec,
            page_size_bytes,
        }
    }

    /// Executes steps 1-4 of spec.md §4.4 under the registry lock, for
    /// sequence number `seq`, rooted at `root_pid` (the launched child).
    pub fn tick<W: Write>(&self, seq: u64, root_pid: i32, log: &mut EventLog<W>) -> SampleTick {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");

        let samples = match proctable::read_all(self.pid_max, self.clock_ticks_per_sec, self.page_size_bytes)
        {
            Ok(samples) => samples,
            Err(_) => Vec::new(),
        };
        let read_count = samples.len();
        log.message("read", read_count.to_string());

        for sample in &samples {
            registry.record_observation(
                sample.pid,
                sample.ppid,
                sample.cpu_time_s,
                sample.rss_bytes as f64 / BYTES_PER_MB,
                seq,
            );
        }

        tree::rebuild(&mut registry);

        let (sampled_time_s, sampled_memory_mb) = if read_count > 0 {
            let (time, memory, sampled, visited) = tree::walk_sample(&mut registry, root_pid, seq, log);
            log.message("sampled", sampled.to_string());
            let mut subtree_pids = self.subtree_pids.lock().expect("subtree pid set mutex poisoned");
            subtree_pids.extend(visited);
            (time, memory)
        } else {
            (0.0, 0.0)
        };

        let flushed = registry.flush_stale(seq);
        log.message("flushed", flushed.to_string());

        SampleTick {
            sampled_time_s,
            sampled_memory_mb,
            read_count,
        }
    }

    pub fn accumulated_time_s(&self) -> f64 {
        self.registry.lock().expect("registry mutex poisoned").accumulated_time_s
    }

    /// Lifetime count of distinct pids observed in the supervised subtree.
    pub fn children(&self) -> u64 {
        self.subtree_pids.lock().expect("subtree pid set mutex poisoned").len() as u64
    }

    pub(crate) fn registry(&self) -> &Mutex<Registry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::sink;

    #[test]
    fn tick_against_live_proc_finds_self() {
        let sampler = Sampler::new(4 * 1024 * 1024, 100, 4096);
        let me = std::process::id() as i32;
        let mut log = EventLog::new(sink());
        let tick = sampler.tick(1, me, &mut log);
        assert!(tick.read_count > 0);
        assert!(tick.sampled_time_s >= 0.0);
        assert!(tick.sampled_memory_mb > 0.0);
    }

    #[test]
    fn children_counts_only_the_supervised_subtree() {
        let sampler = Sampler::new(4 * 1024 * 1024, 100, 4096);
        let me = std::process::id() as i32;
        let mut log = EventLog::new(sink());
        sampler.tick(1, me, &mut log);
        let children_after_first_tick = sampler.children();
        assert!(children_after_first_tick >= 1);

        // A pid elsewhere on the host, unrelated to our subtree, must never
        // be walked from `me` and so must never inflate the counter.
        {
            let mut registry = sampler.registry.lock().unwrap();
            registry.record_observation(999_999, 1, 0.0, 0.0, 1);
        }
        sampler.tick(2, me, &mut log);
        assert_eq!(
            sampler.children(),
            children_after_first_tick,
            "a pid outside the supervised subtree must not be counted"
        );
    }

    #[test]
    fn flush_rolls_exited_time_into_accumulated() {
        let sampler = Sampler::new(32768, 100, 4096);
        {
            let mut registry = sampler.registry.lock().unwrap();
            registry.record_observation(1, 0, 2.0, 1.0, 1);
        }
        // Next tick's read won't re-observe the synthetic pid 1 (it isn't a
        // real process), so it should be flushed and folded in.
        let mut log = EventLog::new(sink());
        sampler.tick(2, 1, &mut log);
        assert!(sampler.accumulated_time_s() >= 2.0);
    }
}
