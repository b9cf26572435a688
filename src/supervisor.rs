//! Supervisor: creates the child, installs the sampler timer and signal
//! handlers, blocks on the child's exit, classifies the outcome, and
//! performs final cleanup.

use crate::eventlog::EventLog;
use crate::killer::Killer;
use crate::sampler::Sampler;
use crate::types::{ExitStatus, KernelConfig, Limits, Result, RunlimError};
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::interval;

/// One year in seconds — the original's stand-in for "no limit configured".
const DEFAULT_LIMIT_S: u64 = 365 * 24 * 3600;

/// Sanity bounds on a kernel-reported `pid_max`, guarding the registry
/// against an implausible or corrupt reading (not an allocation size — the
/// registry is a sparse map).
const MIN_PLAUSIBLE_PID_MAX: i64 = 100;
const MAX_PLAUSIBLE_PID_MAX: i64 = 4 * 1024 * 1024;

pub struct Supervisor {
    limits: Limits,
    kernel: KernelConfig,
    sampler: Sampler,
    killer: Killer,

    caught_out_of_time: AtomicBool,
    caught_out_of_memory: AtomicBool,
    caught_other_signal: AtomicBool,
    caught_usr1: AtomicBool,
    /// The signal number that set `caught_other_signal`, consulted when
    /// re-raising on self.
    other_signal_num: AtomicI32,
}

impl Supervisor {
    /// Reads kernel-exposed configuration and applies CLI overrides,
    /// refusing to run if `pid_max` is unreadable or implausible.
    pub fn startup(
        time_limit: Option<u64>,
        real_time_limit: Option<u64>,
        space_limit: Option<u64>,
        propagate_signals: bool,
    ) -> Result<Self> {
        let kernel = read_kernel_config()?;

        let default_space_mb = total_physical_memory_mb().unwrap_or(u64::MAX / 2);

        let limits = Limits {
            time_limit_s: time_limit.unwrap_or(DEFAULT_LIMIT_S),
            real_time_limit_s: real_time_limit.unwrap_or(DEFAULT_LIMIT_S),
            space_limit_mb: space_limit.unwrap_or(default_space_mb),
            propagate_signals,
        };

        let sampler = Sampler::new(kernel.pid_max, kernel.clock_ticks_per_sec, kernel.page_size_bytes);

        Ok(Supervisor {
            limits,
            kernel,
            sampler,
            killer: Killer::new(),
            caught_out_of_time: AtomicBool::new(false),
            caught_out_of_memory: AtomicBool::new(false),
            caught_other_signal: AtomicBool::new(false),
            caught_usr1: AtomicBool::new(false),
            other_signal_num: AtomicI32::new(0),
        })
    }

    /// Launches `program`, supervises it to completion, and returns the
    /// classified outcome. Emits the full startup/shutdown log sequence.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<ExitStatus> {
        let mut log = EventLog::stderr();

        log.message("version", env!("CARGO_PKG_VERSION"));
        log.message("host", &self.kernel.host_name);
        log.message("time limit", format!("{} seconds", self.limits.time_limit_s));
        log.message(
            "real time limit",
            format!("{} seconds", self.limits.real_time_limit_s),
        );
        log.message("space limit", format!("{} MB", self.limits.space_limit_mb));
        log.message("argv[0]", program);
        for (i, arg) in args.iter().enumerate() {
            log.message(&format!("argv[{}]", i + 1), arg);
        }
        log.message("start", format!("{}", chrono::Local::now().format("%c")));

        let time_limit_s = self.limits.time_limit_s;

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
        unsafe {
            command.pre_exec(move || install_hard_cpu_rlimit(time_limit_s));
        }

        let start = Instant::now();

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Ok(if classify_spawn_errno(&err) == SpawnFailure::Exec {
                    self.caught_usr1.store(true, Ordering::SeqCst);
                    ExitStatus::ExecFailed
                } else {
                    ExitStatus::ForkFailed
                });
            }
        };
        let root_pid = match child.id() {
            Some(pid) => pid as i32,
            None => return Ok(ExitStatus::InternalError),
        };
        let self_pid = std::process::id() as i32;

        let mut sigint = signal(SignalKind::interrupt()).ok();
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigabrt = signal(SignalKind::from_raw(libc::SIGABRT)).ok();
        let mut sigsegv = match signal(SignalKind::from_raw(libc::SIGSEGV)) {
            Ok(stream) => Some(stream),
            Err(_) => {
                log.warning("could not install SIGSEGV handler for self, proceeding without it");
                None
            }
        };

        let mut ticker = interval(Duration::from_millis(crate::types::SAMPLE_RATE_MS));
        let mut tick_count: u64 = 0;
        let mut max_time_s: f64 = 0.0;
        let mut max_memory_mb: f64 = 0.0;

        let wait_status = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick_count += 1;
                    let tick = self.sampler.tick(tick_count, root_pid, &mut log);
                    let real_elapsed_s = start.elapsed().as_secs_f64();

                    max_time_s = max_time_s.max(tick.sampled_time_s);
                    max_memory_mb = max_memory_mb.max(tick.sampled_memory_mb);

                    if tick_count % crate::types::REPORT_RATE == 0 {
                        log.message(
                            "sample",
                            format!(
                                "{:.2} {:.2} {:.2}",
                                tick.sampled_time_s, real_elapsed_s, tick.sampled_memory_mb
                            ),
                        );
                    }

                    let over_time = tick.sampled_time_s > self.limits.time_limit_s as f64
                        || real_elapsed_s > self.limits.real_time_limit_s as f64;
                    if over_time {
                        if self.caught_out_of_time.compare_exchange(
                            false, true, Ordering::SeqCst, Ordering::SeqCst,
                        ).is_ok() {
                            self.killer.kill_subtree(self.sampler.registry(), &self.kernel, root_pid, self_pid, &mut log);
                        }
                    } else if tick.sampled_memory_mb > self.limits.space_limit_mb as f64
                        && self.caught_out_of_memory.compare_exchange(
                            false, true, Ordering::SeqCst, Ordering::SeqCst,
                        ).is_ok()
                    {
                        self.killer.kill_subtree(self.sampler.registry(), &self.kernel, root_pid, self_pid, &mut log);
                    }
                }
                Some(()) = recv_opt(&mut sigint) => {
                    self.handle_self_signal(libc::SIGINT, root_pid, self_pid, &mut log);
                }
                Some(()) = recv_opt(&mut sigterm) => {
                    self.handle_self_signal(libc::SIGTERM, root_pid, self_pid, &mut log);
                }
                Some(()) = recv_opt(&mut sigabrt) => {
                    self.handle_self_signal(libc::SIGABRT, root_pid, self_pid, &mut log);
                }
                Some(()) = recv_opt(&mut sigsegv) => {
                    self.handle_self_signal(libc::SIGSEGV, root_pid, self_pid, &mut log);
                }
                status = child.wait() => {
                    break status;
                }
            }

            if self.caught_other_signal.load(Ordering::SeqCst) {
                let _ = child.wait().await;
                break Ok(std::process::ExitStatus::from_raw(0));
            }
        };

        let real_elapsed_s = start.elapsed().as_secs_f64();

        // Best-effort last-ditch teardown in case anything survived reap.
        self.killer.kill_subtree(self.sampler.registry(), &self.kernel, root_pid, self_pid, &mut log);

        let children = self.sampler.children();

        let mut status = self.classify(wait_status.ok());

        if max_time_s >= self.limits.time_limit_s as f64 || real_elapsed_s >= self.limits.real_time_limit_s as f64 {
            status = ExitStatus::OutOfTime;
        }

        log.message("end", format!("{}", chrono::Local::now().format("%c")));
        log.message("status", status.description());
        log.message("result", format!("{}", status.exit_code()));
        log.message("children", children.to_string());
        log.message("real", format!("{real_elapsed_s:.2} seconds"));
        log.message("time", format!("{max_time_s:.2} seconds"));
        log.message("space", format!("{max_memory_mb:.2} MB"));
        log.message("samples", tick_count.to_string());

        if self.limits.propagate_signals && status.is_non_resource_signal() {
            if let ExitStatus::OtherSignal(sig) = status {
                unsafe { libc::raise(sig) };
            } else if status == ExitStatus::SegmentationFault {
                unsafe { libc::raise(libc::SIGSEGV) };
            } else if status == ExitStatus::BusError {
                unsafe { libc::raise(libc::SIGBUS) };
            }
        }

        Ok(status)
    }

    /// Tears down the subtree unconditionally, once per signal, then
    /// re-raises that signal on self — regardless of `-k`.
    fn handle_self_signal<W: Write>(
        &self,
        signum: i32,
        root_pid: i32,
        self_pid: i32,
        log: &mut EventLog<W>,
    ) {
        if self
            .caught_other_signal
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.other_signal_num.store(signum, Ordering::SeqCst);
        self.killer.kill_subtree(self.sampler.registry(), &self.kernel, root_pid, self_pid, log);

        unsafe {
            libc::signal(signum, libc::SIG_DFL);
            libc::raise(signum);
        }
    }

    fn classify(&self, wait_status: Option<std::process::ExitStatus>) -> ExitStatus {
        if self.caught_usr1.load(Ordering::SeqCst) {
            return ExitStatus::ExecFailed;
        }
        if self.caught_out_of_memory.load(Ordering::SeqCst) {
            return ExitStatus::OutOfMemory;
        }
        if self.caught_out_of_time.load(Ordering::SeqCst) {
            return ExitStatus::OutOfTime;
        }

        let Some(wait_status) = wait_status else {
            return ExitStatus::InternalError;
        };

        if let Some(code) = wait_status.code() {
            return ExitStatus::Ok(code);
        }

        if let Some(sig) = wait_status.signal() {
            return match sig {
                libc::SIGXFSZ => ExitStatus::OutOfMemory,
                libc::SIGXCPU => ExitStatus::OutOfTime,
                libc::SIGSEGV => ExitStatus::SegmentationFault,
                libc::SIGBUS => ExitStatus::BusError,
                other => ExitStatus::OtherSignal(other),
            };
        }

        ExitStatus::InternalError
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SpawnFailure {
    Exec,
    Fork,
}

/// Distinguishes an exec-time failure (bad program path/permissions) from a
/// fork-time failure (resource exhaustion), from the single `io::Error`
/// `Command::spawn()` returns.
fn classify_spawn_errno(err: &std::io::Error) -> SpawnFailure {
    match err.raw_os_error() {
        Some(libc::ENOENT)
        | Some(libc::EACCES)
        | Some(libc::ENOEXEC)
        | Some(libc::EISDIR)
        | Some(libc::ENOTDIR)
        | Some(libc::ELOOP) => SpawnFailure::Exec,
        _ => SpawnFailure::Fork,
    }
}

/// Installs `RLIMIT_CPU` at `ceil(1.01 * time_limit_s)` in the child, just
/// before `execvp`. Runs post-fork, pre-exec, in the child's address space.
fn install_hard_cpu_rlimit(time_limit_s: u64) -> std::io::Result<()> {
    let hard_limit = ((time_limit_s as f64) * 1.01).ceil() as u64;
    nix::sys::resource::setrlimit(nix::sys::resource::Resource::RLIMIT_CPU, hard_limit, hard_limit)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}

fn read_kernel_config() -> Result<KernelConfig> {
    let pid_max_path = "/proc/sys/kernel/pid_max";
    let raw = std::fs::read_to_string(pid_max_path)
        .map_err(|_| RunlimError::KernelFileUnavailable(pid_max_path.to_string()))?;
    let pid_max: i64 = raw
        .trim()
        .parse()
        .map_err(|_| RunlimError::PidMaxUnreadable(pid_max_path.to_string()))?;

    if pid_max < MIN_PLAUSIBLE_PID_MAX {
        return Err(RunlimError::PidMaxTooSmall(pid_max, pid_max_path.to_string()));
    }
    if pid_max > MAX_PLAUSIBLE_PID_MAX {
        return Err(RunlimError::PidMaxTooLarge(pid_max, pid_max_path.to_string()));
    }

    let clock_ticks_per_sec = procfs::ticks_per_second();
    let page_size_bytes = procfs::page_size();

    let host_name = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(KernelConfig {
        pid_max: pid_max as i32,
        page_size_bytes,
        clock_ticks_per_sec,
        host_name,
    })
}

fn total_physical_memory_mb() -> Option<u64> {
    procfs::Meminfo::new().ok().map(|m| m.mem_total / (1024 * 1024))
}

/// Normalizes a `Option<&mut Option<Signal>>` stream into something
/// `tokio::select!` can branch on uniformly whether or not the handler for
/// that signal was successfully installed.
async fn recv_opt(stream: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_spawn_errno_distinguishes_exec_from_fork() {
        let enoent = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(classify_spawn_errno(&enoent), SpawnFailure::Exec);

        let eagain = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(classify_spawn_errno(&eagain), SpawnFailure::Fork);
    }

    #[test]
    fn rlimit_install_builds_a_one_percent_margin() {
        // Just exercises the arithmetic path; doesn't call setrlimit itself
        // since that would affect the test process.
        let hard_limit = ((5_u64 as f64) * 1.01).ceil() as u64;
        assert_eq!(hard_limit, 6);
    }
}
