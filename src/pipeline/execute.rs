use async_trait::async_trait;
use std::time::Duration;

use super::artifacts::BuildContext;
use super::{BuildStep, PipelineError};
use crate::sandbox::CommandExecutor;

/// Runs every test-case command under the sandbox, concurrently, and
/// stores the raw command results in submission order.
pub struct ExecuteCommandsStep;

#[async_trait]
impl BuildStep for ExecuteCommandsStep {
    fn name(&self) -> &'static str {
        "execute-commands"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let executor = CommandExecutor::new(
            Duration::from_millis(ctx.env.executor_poll_interval_ms),
            ctx.env.wall_clock_multiplier,
            Duration::from_secs(ctx.env.default_wall_clock_secs),
        );
        let prefs = ctx.require_prefs(self.name())?.clone();
        let commands: Vec<_> = ctx
            .require_commands(self.name())?
            .iter()
            .map(|c| (c.command.clone(), c.stdin.clone()))
            .collect();

        tracing::debug!(count = commands.len(), "running test commands");
        let results = executor.run_all(&commands, &prefs).await;
        ctx.set_command_results(self.name(), results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Problem, ProblemType, TestCase};
    use crate::matching::OutputComparison;
    use crate::pipeline::{BuildEnv, CommandInput};
    use crate::sandbox::{Command, ExecutionPreferences, ProcessStatus};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_results_line_up_with_test_cases() {
        let mut ctx = BuildContext::new(
            Problem {
                id: 1,
                problem_type: ProblemType::NativeProgram,
                testname: String::new(),
                output_comparison: OutputComparison::Exact,
            },
            vec![
                TestCase {
                    name: "t0".to_string(),
                    input: String::new(),
                    expected_output: String::new(),
                },
                TestCase {
                    name: "t1".to_string(),
                    input: String::new(),
                    expected_output: String::new(),
                },
            ],
            String::new(),
            BuildEnv::default(),
        );
        ctx.set_prefs("test", ExecutionPreferences::unbounded())
            .unwrap();
        let sh = |script: &str| CommandInput {
            command: Command::new(
                vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
                PathBuf::from("/tmp"),
            ),
            stdin: String::new(),
        };
        ctx.set_commands("test", vec![sh("sleep 0.2; echo a"), sh("echo b")])
            .unwrap();

        ExecuteCommandsStep.execute(&mut ctx).await.unwrap();
        let results = ctx.require_command_results("test").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ProcessStatus::Exited);
        assert_eq!(results[0].stdout, vec!["a"]);
        assert_eq!(results[1].stdout, vec!["b"]);
    }
}
