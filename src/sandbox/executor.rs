use futures::stream::{FuturesUnordered, StreamExt};
use std::os::unix::process::ExitStatusExt;
use std::time::{Duration, Instant};

use super::limits::{ExecLimit, ExecutionPreferences};
use super::process::ProcessRunner;
use super::{Command, CommandResult, ProcessStatus};

/// Signals that indicate the process exceeded its CPU limit rather
/// than crashing: SIGKILL (hard rlimit) and SIGXCPU (soft rlimit).
const CPU_LIMIT_SIGNALS: [i32; 2] = [libc::SIGKILL, libc::SIGXCPU];

/// Supervises one sandboxed process per command, polling for
/// completion and enforcing a wall-clock ceiling independent of the
/// CPU-time limit. The ceiling catches processes that sleep, block
/// on I/O, or spin without consuming CPU.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    poll_interval: Duration,
    wall_clock_multiplier: u64,
    default_wall_clock: Duration,
}

impl CommandExecutor {
    pub fn new(
        poll_interval: Duration,
        wall_clock_multiplier: u64,
        default_wall_clock: Duration,
    ) -> Self {
        Self {
            poll_interval,
            wall_clock_multiplier: wall_clock_multiplier.max(1),
            default_wall_clock,
        }
    }

    fn wall_clock_ceiling(&self, prefs: &ExecutionPreferences) -> Duration {
        match prefs.get(ExecLimit::CpuTimeSec) {
            Some(cpu_secs) => Duration::from_secs(cpu_secs * self.wall_clock_multiplier)
                .max(self.default_wall_clock),
            None => self.default_wall_clock,
        }
    }

    /// Run one command to completion, or kill it at the wall-clock
    /// ceiling. Never returns an error: every failure mode maps to a
    /// `CommandResult` status.
    pub async fn execute(
        &self,
        command: &Command,
        stdin: &str,
        prefs: &ExecutionPreferences,
    ) -> CommandResult {
        let runner = ProcessRunner::new(prefs.clone());
        let mut child = match runner.spawn(command, stdin) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(argv = ?command.argv, error = %e, "failed to start test process");
                return CommandResult::abnormal(ProcessStatus::CouldNotStart, e.to_string());
            }
        };

        let ceiling = self.wall_clock_ceiling(prefs);
        let started = Instant::now();
        let mut timed_out = false;

        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "error polling test process");
                    child.kill_group();
                    let (_, stdout, stderr) = child.finish().await;
                    let mut result =
                        CommandResult::abnormal(ProcessStatus::CouldNotStart, e.to_string());
                    result.stdout = stdout.lines;
                    result.stderr = stderr.lines;
                    return result;
                }
            }
            if started.elapsed() >= ceiling {
                timed_out = true;
                child.kill_group();
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let (status, stdout, stderr) = child.finish().await;
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return CommandResult::abnormal(
                    ProcessStatus::CouldNotStart,
                    format!("failed to reap test process: {}", e),
                );
            }
        };

        if timed_out {
            let mut result = CommandResult::abnormal(
                ProcessStatus::TimedOut,
                format!("killed after {:?} of wall-clock time", ceiling),
            );
            result.stdout = stdout.lines;
            result.stderr = stderr.lines;
            return result;
        }

        match (status.code(), status.signal()) {
            (Some(code), _) => CommandResult::exited(code, stdout.lines, stderr.lines),
            (None, Some(sig)) if CPU_LIMIT_SIGNALS.contains(&sig) => {
                let mut result = CommandResult::abnormal(
                    ProcessStatus::TimedOut,
                    format!("killed by signal {} (CPU limit exceeded)", sig),
                );
                result.signal = Some(sig);
                result.stdout = stdout.lines;
                result.stderr = stderr.lines;
                result
            }
            (None, Some(sig)) => {
                let mut result = CommandResult::abnormal(
                    ProcessStatus::KilledBySignal,
                    format!("killed by signal {}", sig),
                );
                result.signal = Some(sig);
                result.stdout = stdout.lines;
                result.stderr = stderr.lines;
                result
            }
            (None, None) => CommandResult::abnormal(
                ProcessStatus::CouldNotStart,
                "exit status unknown".to_string(),
            ),
        }
    }

    /// Execute one command per test case concurrently, preserving
    /// input order in the result vector regardless of completion order.
    pub async fn run_all(
        &self,
        commands: &[(Command, String)],
        prefs: &ExecutionPreferences,
    ) -> Vec<CommandResult> {
        let mut futures = FuturesUnordered::new();
        for (idx, (command, stdin)) in commands.iter().enumerate() {
            futures.push(async move { (idx, self.execute(command, stdin, prefs).await) });
        }

        let mut results: Vec<Option<CommandResult>> = vec![None; commands.len()];
        while let Some((idx, result)) = futures.next().await {
            results[idx] = Some(result);
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    CommandResult::abnormal(ProcessStatus::CouldNotStart, "executor lost result")
                })
            })
            .collect()
    }
}
