use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::limits::{ExecLimit, ExecutionPreferences};
use super::Command;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not start process: {msg}")]
    CouldNotStart { msg: String },
}

/// Captured output of one stream, line-oriented and truncated once
/// the configured caps are exceeded.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    pub lines: Vec<String>,
    pub truncated: bool,
}

/// Spawns a single child process in its own process group with
/// rlimits applied, stdin fed from a string, and stdout/stderr
/// captured incrementally under byte/line caps.
///
/// If applying a limit fails the child still runs; the command
/// executor's wall-clock supervision is the backstop.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    prefs: ExecutionPreferences,
}

impl ProcessRunner {
    pub fn new(prefs: ExecutionPreferences) -> Self {
        Self { prefs }
    }

    pub fn spawn(&self, command: &Command, stdin: &str) -> Result<SandboxedChild, RunnerError> {
        if command.argv.is_empty() {
            return Err(RunnerError::CouldNotStart {
                msg: "empty argv".to_string(),
            });
        }

        let mut cmd = tokio::process::Command::new(&command.argv[0]);
        cmd.args(&command.argv[1..])
            .current_dir(&command.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &command.env {
            cmd.env(k, v);
        }

        let prefs = self.prefs.clone();
        unsafe {
            cmd.pre_exec(move || {
                // Own process group, so a timeout kill reaps any
                // children the test process managed to create.
                libc::setpgid(0, 0);
                apply_rlimits(&prefs);
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| RunnerError::CouldNotStart {
            msg: e.to_string(),
        })?;

        let pgid = child.id().map(|id| id as i32).unwrap_or(0);

        // Feed stdin and close it to signal EOF. A child that never
        // reads is fine; broken pipes are expected.
        if let Some(mut stdin_handle) = child.stdin.take() {
            let input = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = stdin_handle.write_all(&input).await;
                let _ = stdin_handle.shutdown().await;
            });
        }

        let max_bytes = self.prefs.get(ExecLimit::OutputMaxBytes);
        let max_lines = self.prefs.get(ExecLimit::OutputMaxLines);
        let max_line_chars = self.prefs.get(ExecLimit::OutputLineMaxChars);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            match stdout {
                Some(r) => collect_limited(r, max_bytes, max_lines, max_line_chars).await,
                None => CapturedOutput::default(),
            }
        });
        let stderr_task = tokio::spawn(async move {
            match stderr {
                Some(r) => collect_limited(r, max_bytes, max_lines, max_line_chars).await,
                None => CapturedOutput::default(),
            }
        });

        Ok(SandboxedChild {
            child,
            pgid,
            stdout_task,
            stderr_task,
        })
    }
}

/// A running sandboxed process. Must be finished (or killed and then
/// finished) so the child is reaped and its output collected.
pub struct SandboxedChild {
    child: Child,
    pgid: i32,
    stdout_task: JoinHandle<CapturedOutput>,
    stderr_task: JoinHandle<CapturedOutput>,
}

impl SandboxedChild {
    /// Non-blocking completion check.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// SIGKILL the whole process group, falling back to the direct
    /// child if the group kill fails.
    pub fn kill_group(&mut self) {
        if self.pgid > 0 {
            unsafe {
                libc::kill(-self.pgid, libc::SIGKILL);
                libc::kill(self.pgid, libc::SIGKILL);
            }
        }
    }

    /// Reap the child and collect its captured output.
    pub async fn finish(mut self) -> (std::io::Result<ExitStatus>, CapturedOutput, CapturedOutput) {
        let status = self.child.wait().await;
        let stdout = self.stdout_task.await.unwrap_or_default();
        let stderr = self.stderr_task.await.unwrap_or_default();
        (status, stdout, stderr)
    }
}

fn apply_rlimits(prefs: &ExecutionPreferences) {
    if let Some(secs) = prefs.get(ExecLimit::CpuTimeSec) {
        // Hard limit one second above soft: SIGXCPU first, then SIGKILL.
        set_rlimit(libc::RLIMIT_CPU, secs, secs + 1);
    }
    if let Some(kb) = prefs.get(ExecLimit::StackSizeKb) {
        set_rlimit(libc::RLIMIT_STACK, kb * 1024, kb * 1024);
    }
    if let Some(kb) = prefs.get(ExecLimit::AddressSpaceKb) {
        set_rlimit(libc::RLIMIT_AS, kb * 1024, kb * 1024);
    }
    if let Some(kb) = prefs.get(ExecLimit::FileSizeKb) {
        set_rlimit(libc::RLIMIT_FSIZE, kb * 1024, kb * 1024);
    }
    if let Some(n) = prefs.get(ExecLimit::Processes) {
        set_rlimit(libc::RLIMIT_NPROC, n, n);
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) {
    let lim = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard.max(soft) as libc::rlim_t,
    };
    // Failure is tolerated: wall-clock supervision still applies.
    unsafe {
        libc::setrlimit(resource, &lim);
    }
}

/// Read a stream to EOF, keeping at most the configured number of
/// bytes/lines and truncating long lines. Keeps draining after the
/// caps are hit so a flooding child is not blocked on a full pipe.
async fn collect_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: Option<u64>,
    max_lines: Option<u64>,
    max_line_chars: Option<u64>,
) -> CapturedOutput {
    let mut out = CapturedOutput::default();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut total_bytes: u64 = 0;
    let mut chunk = [0u8; 4096];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };

        if out.truncated {
            continue;
        }

        for &b in &chunk[..n] {
            total_bytes += 1;
            if max_bytes.is_some_and(|cap| total_bytes > cap) {
                out.truncated = true;
                break;
            }
            if b == b'\n' {
                push_line(&mut out, &mut line_buf, max_line_chars);
                if max_lines.is_some_and(|cap| out.lines.len() as u64 >= cap) {
                    out.truncated = true;
                    break;
                }
            } else {
                line_buf.push(b);
            }
        }
    }

    if !out.truncated && !line_buf.is_empty() {
        push_line(&mut out, &mut line_buf, max_line_chars);
    }
    out
}

fn push_line(out: &mut CapturedOutput, line_buf: &mut Vec<u8>, max_line_chars: Option<u64>) {
    let mut line = String::from_utf8_lossy(line_buf).into_owned();
    if let Some(cap) = max_line_chars {
        if line.chars().count() as u64 > cap {
            line = line.chars().take(cap as usize).collect();
            out.truncated = true;
        }
    }
    out.lines.push(line);
    line_buf.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> Command {
        Command::new(
            vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            PathBuf::from("/tmp"),
        )
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = ProcessRunner::new(ExecutionPreferences::unbounded());
        let child = runner.spawn(&sh("echo hello; echo world"), "").unwrap();
        let (status, stdout, _) = child.finish().await;
        assert_eq!(status.unwrap().code(), Some(0));
        assert_eq!(stdout.lines, vec!["hello", "world"]);
        assert!(!stdout.truncated);
    }

    #[tokio::test]
    async fn test_stdin_is_fed_to_child() {
        let runner = ProcessRunner::new(ExecutionPreferences::unbounded());
        let child = runner.spawn(&sh("cat"), "line one\nline two\n").unwrap();
        let (status, stdout, _) = child.finish().await;
        assert_eq!(status.unwrap().code(), Some(0));
        assert_eq!(stdout.lines, vec!["line one", "line two"]);
    }

    #[tokio::test]
    async fn test_output_line_cap_truncates() {
        let mut prefs = ExecutionPreferences::unbounded();
        prefs.set(ExecLimit::OutputMaxLines, 3);
        let runner = ProcessRunner::new(prefs);
        let child = runner
            .spawn(&sh("i=0; while [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done"), "")
            .unwrap();
        let (_, stdout, _) = child.finish().await;
        assert_eq!(stdout.lines.len(), 3);
        assert!(stdout.truncated);
    }

    #[tokio::test]
    async fn test_output_byte_cap_truncates_flood() {
        let mut prefs = ExecutionPreferences::unbounded();
        prefs.set(ExecLimit::OutputMaxBytes, 1000);
        let runner = ProcessRunner::new(prefs);
        // 10 MB of output; capture must stay bounded and the child
        // must still run to completion without blocking.
        let child = runner
            .spawn(&sh("head -c 10000000 /dev/zero | tr '\\0' 'x'"), "")
            .unwrap();
        let (status, stdout, _) = child.finish().await;
        assert!(status.is_ok());
        assert!(stdout.truncated);
        let total: usize = stdout.lines.iter().map(|l| l.len()).sum();
        assert!(total <= 1000);
    }

    #[tokio::test]
    async fn test_long_line_truncated() {
        let mut prefs = ExecutionPreferences::unbounded();
        prefs.set(ExecLimit::OutputLineMaxChars, 10);
        let runner = ProcessRunner::new(prefs);
        let child = runner.spawn(&sh("echo 0123456789abcdef"), "").unwrap();
        let (_, stdout, _) = child.finish().await;
        assert_eq!(stdout.lines[0], "0123456789");
        assert!(stdout.truncated);
    }

    #[tokio::test]
    async fn test_could_not_start() {
        let runner = ProcessRunner::new(ExecutionPreferences::unbounded());
        let cmd = Command::new(
            vec!["/nonexistent/binary".to_string()],
            PathBuf::from("/tmp"),
        );
        assert!(matches!(
            runner.spawn(&cmd, ""),
            Err(RunnerError::CouldNotStart { .. })
        ));
    }

    #[tokio::test]
    async fn test_kill_group_terminates_children() {
        let runner = ProcessRunner::new(ExecutionPreferences::unbounded());
        let mut child = runner
            .spawn(&sh("sleep 30 & sleep 30 & wait"), "")
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(child.try_wait().unwrap().is_none());
        child.kill_group();
        let (status, _, _) = child.finish().await;
        assert!(status.unwrap().code().is_none());
    }
}
