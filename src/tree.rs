//! Tree builder: reconstructs parent→child links among active registry
//! records from `ppid`, and walks the subtree rooted at the launched child.

use crate::eventlog::EventLog;
use crate::registry::Registry;
use std::io::Write;

/// Rebuilds `parent`/`first_child`/`next_sibling` across every active
/// record. Two passes: clear stale links, then relink. A record's parent
/// pid need not itself be active — inactive parents are tolerated, the
/// subtree walk below simply starts at the launched child and ignores
/// unreachable branches.
pub fn rebuild(registry: &mut Registry) {
    let active_pids: Vec<i32> = registry.iter_active().map(|r| r.pid).collect();

    for &pid in &active_pids {
        if let Some(r) = registry.get_mut(pid) {
            r.clear_tree_links();
        }
    }

    for &pid in &active_pids {
        let ppid = match registry.get(pid) {
            Some(r) => r.ppid,
            None => continue,
        };

        if let Some(r) = registry.get_mut(pid) {
            r.parent = Some(ppid);
        }

        // Link into the parent's child list, head-insert (order among
        // siblings is not spec-significant).
        let existing_head = registry.get(ppid).and_then(|p| p.first_child);
        if let Some(r) = registry.get_mut(pid) {
            r.next_sibling = existing_head;
        }
        if let Some(parent) = registry.get_mut(ppid) {
            parent.first_child = Some(pid);
        }
    }
}

/// Sums CPU time and memory over the subtree rooted at `root_pid`, counting
/// only records whose `last_sample_seq == seq` (freshly observed this
/// tick). Returns `(sampled_time_s, sampled_memory_mb, count, visited)`,
/// where `visited` lists every pid structurally reachable from `root_pid`
/// this tick (fresh or not) — the set the spec's lifetime `children` counter
/// is scoped to, as opposed to every pid the ProcTable reader happens to see
/// elsewhere on the host.
///
/// Guards against cycles with a per-traversal mark; on a cycle, logs a
/// warning and stops descending that branch.
pub fn walk_sample<W: Write>(
    registry: &mut Registry,
    root_pid: i32,
    seq: u64,
    log: &mut EventLog<W>,
) -> (f64, f64, u64, Vec<i32>) {
    let mut time = 0.0;
    let mut memory = 0.0;
    let mut count = 0;
    let mut visited = Vec::new();
    sample_recursively(registry, root_pid, seq, &mut time, &mut memory, &mut count, &mut visited, log);
    (time, memory, count, visited)
}

#[allow(clippy::too_many_arguments)]
fn sample_recursively<W: Write>(
    registry: &mut Registry,
    pid: i32,
    seq: u64,
    time: &mut f64,
    memory: &mut f64,
    count: &mut u64,
    visited: &mut Vec<i32>,
    log: &mut EventLog<W>,
) {
    let Some(record) = registry.get_mut(pid) else {
        return;
    };
    if record.visiting_sample {
        log.warning("cyclic process dependencies during sampling");
        return;
    }

    visited.push(pid);
    if record.last_sample_seq == seq {
        *time += record.cpu_time_s;
        *memory += record.rss_mb;
        *count += 1;
    }
    record.visiting_sample = true;

    let mut child = record.first_child;
    while let Some(child_pid) = child {
        sample_recursively(registry, child_pid, seq, time, memory, count, visited, log);
        child = registry.get(child_pid).and_then(|c| c.next_sibling);
    }

    if let Some(record) = registry.get_mut(pid) {
        record.visiting_sample = false;
    }
}

/// Depth-first, post-order walk of the subtree rooted at `root_pid`,
/// invoking `signal_fn(pid)` on every descendant and finally on the root
/// itself — except `self_pid` (the supervisor's own pid), which is never
/// signalled. Pauses ~100 microseconds between a node and its parent so a
/// terminating parent has a chance to reap before the parent itself is
/// walked. Returns the number of pids signalled.
pub fn walk_kill<W: Write>(
    registry: &mut Registry,
    root_pid: i32,
    self_pid: i32,
    log: &mut EventLog<W>,
    mut signal_fn: impl FnMut(i32),
) -> u64 {
    kill_recursively(registry, root_pid, self_pid, log, &mut signal_fn)
}

fn kill_recursively<W: Write>(
    registry: &mut Registry,
    pid: i32,
    self_pid: i32,
    log: &mut EventLog<W>,
    signal_fn: &mut impl FnMut(i32),
) -> u64 {
    let Some(record) = registry.get_mut(pid) else {
        return 0;
    };
    if record.visiting_kill {
        log.warning("cyclic process dependencies during killing");
        return 0;
    }
    record.visiting_kill = true;

    let mut count = 0;
    let mut child = record.first_child;
    while let Some(child_pid) = child {
        count += kill_recursively(registry, child_pid, self_pid, log, signal_fn);
        child = registry.get(child_pid).and_then(|c| c.next_sibling);
    }

    if let Some(record) = registry.get_mut(pid) {
        record.visiting_kill = false;
    }

    std::thread::sleep(std::time::Duration::from_micros(100));

    if pid != self_pid {
        signal_fn(pid);
        count += 1;
    }

    count
}
