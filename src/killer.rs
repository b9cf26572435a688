//! Killer: escalating termination of a process subtree.
//!
//! Mirrors the original's `kill_all_child_processes` escalation: up to ten
//! rounds, starting with SIGTERM and a 160ms pause between rounds, halving
//! the pause each round, switching to SIGKILL once the pause drops to 2ms or
//! below. Each round re-reads the proctable so newly-forked grandchildren
//! are caught too.

use crate::eventlog::EventLog;
use crate::proctable;
use crate::registry::Registry;
use crate::tree;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

const MAX_ROUNDS: u32 = 10;
const INITIAL_SLEEP_MS: u64 = 160;
const HARD_SWITCH_SLEEP_MS: u64 = 2;

/// Serializes concurrent subtree-kill attempts (self signal handling vs. a
/// limit breach discovered mid-sample). Never held across an `.await`.
pub struct Killer {
    lock: Mutex<()>,
}

impl Killer {
    pub fn new() -> Self {
        Killer { lock: Mutex::new(()) }
    }

    /// Escalates against the subtree rooted at `root_pid`, re-sampling the
    /// proctable each round. `self_pid` is never signalled. Returns the
    /// total number of signal deliveries attempted across all rounds.
    pub fn kill_subtree<W: Write>(
        &self,
        registry: &Mutex<Registry>,
        kernel: &crate::types::KernelConfig,
        root_pid: i32,
        self_pid: i32,
        log: &mut EventLog<W>,
    ) -> u64 {
        let _killer_guard = self.lock.lock().expect("killer mutex poisoned");

        let mut sleep_ms = INITIAL_SLEEP_MS;
        let mut total_signalled = 0;

        for round in 0..MAX_ROUNDS {
            std::thread::sleep(Duration::from_millis(sleep_ms));

            let signal = if sleep_ms > HARD_SWITCH_SLEEP_MS {
                Signal::SIGTERM
            } else {
                Signal::SIGKILL
            };

            let signalled = {
                let mut registry = registry.lock().expect("registry mutex poisoned");

                // Re-observe the subtree before each round so freshly-forked
                // descendants are linked in before we walk.
                if let Ok(samples) =
                    proctable::read_all(kernel.pid_max, kernel.clock_ticks_per_sec, kernel.page_size_bytes)
                {
                    let seq = round as u64 + 1;
                    for sample in &samples {
                        registry.record_observation(
                            sample.pid,
                            sample.ppid,
                            sample.cpu_time_s,
                            sample.rss_bytes as f64 / (1024.0 * 1024.0),
                            seq,
                        );
                    }
                    tree::rebuild(&mut registry);
                }

                tree::walk_kill(&mut registry, root_pid, self_pid, log, |pid| {
                    let _ = signal::kill(Pid::from_raw(pid), signal);
                })
            };
            total_signalled += signalled;

            if signalled == 0 {
                break;
            }

            sleep_ms = (sleep_ms / 2).max(1);
        }

        total_signalled
    }
}

impl Default for Killer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::io::sink;

    #[test]
    fn kill_subtree_on_absent_root_stops_immediately() {
        let killer = Killer::new();
        let registry = Mutex::new(Registry::new());
        let kernel = crate::types::KernelConfig {
            pid_max: 32768,
            page_size_bytes: 4096,
            clock_ticks_per_sec: 100,
            host_name: "test".to_string(),
        };
        let mut log = EventLog::new(sink());
        let start = std::time::Instant::now();
        let count = killer.kill_subtree(&registry, &kernel, 999_999, 1, &mut log);
        assert_eq!(count, 0);
        // An empty subtree signals zero on round one and must break out
        // instead of running all ten rounds of escalation.
        assert!(start.elapsed() < Duration::from_millis(INITIAL_SLEEP_MS * 2));
    }
}
