use async_trait::async_trait;

use super::artifacts::BuildContext;
use super::scaffold::UNKNOWN_TEST_CASE_CODE;
use super::{BuildStep, PipelineError};
use crate::domain::{TestOutcome, TestResult};
use crate::matching::output_matches;
use crate::sandbox::{CommandResult, ProcessStatus};

/// Maps an abnormally-terminated command to a test result. Returns
/// None when the process exited normally and the caller must judge
/// the exit itself.
fn abnormal_result(result: &CommandResult) -> Option<TestResult> {
    let test_result = match result.status {
        ProcessStatus::Exited => return None,
        ProcessStatus::TimedOut => TestResult::new(TestOutcome::FailedFromTimeout, "timeout"),
        ProcessStatus::KilledBySignal if result.signal == Some(libc::SIGXFSZ) => TestResult::new(
            TestOutcome::FailedBySandbox,
            format!("File size limit exceeded - {}", result.status_message),
        ),
        ProcessStatus::KilledBySignal => TestResult::new(
            TestOutcome::FailedWithException,
            format!("Exception ({})", result.status_message),
        ),
        ProcessStatus::CouldNotStart => {
            TestResult::new(TestOutcome::InternalError, "The test failed to execute")
        }
    };
    Some(test_result.with_output(&result.stdout, &result.stderr))
}

/// Judges function-style test runs by exit code: the harness exits
/// with one of the per-submission secret codes, so any other code
/// means the student's function crashed or called exit() itself.
pub struct CheckExitCodesStep;

#[async_trait]
impl BuildStep for CheckExitCodesStep {
    fn name(&self) -> &'static str {
        "check-exit-codes"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let codes = ctx.require_secret_codes(self.name())?;
        let results = ctx.require_command_results(self.name())?;

        let test_results = ctx
            .test_cases
            .iter()
            .zip(results)
            .map(|(test, result)| {
                if let Some(abnormal) = abnormal_result(result) {
                    return abnormal;
                }
                let verdict = match result.exit_code {
                    Some(code) if code == codes.success => {
                        TestResult::new(TestOutcome::Passed, format!("{} passed", test.name))
                    }
                    Some(code) if code == codes.failure => TestResult::new(
                        TestOutcome::FailedAssertion,
                        format!("{} produced the wrong return value", test.name),
                    ),
                    Some(UNKNOWN_TEST_CASE_CODE) => {
                        TestResult::new(TestOutcome::InternalError, "The test failed to execute")
                    }
                    Some(code) => TestResult::new(
                        TestOutcome::FailedWithException,
                        format!("abnormal exit (code {})", code),
                    ),
                    None => {
                        TestResult::new(TestOutcome::InternalError, "The test failed to execute")
                    }
                };
                verdict.with_output(&result.stdout, &result.stderr)
            })
            .collect();
        ctx.set_test_results(self.name(), test_results)
    }
}

/// Judges program-style test runs by comparing captured stdout to the
/// expected output, using the comparison configured on the problem.
pub struct CheckOutputStep;

#[async_trait]
impl BuildStep for CheckOutputStep {
    fn name(&self) -> &'static str {
        "check-output"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let results = ctx.require_command_results(self.name())?;
        let comparison = ctx.problem.output_comparison;

        let test_results = ctx
            .test_cases
            .iter()
            .zip(results)
            .map(|(test, result)| {
                if let Some(abnormal) = abnormal_result(result) {
                    return abnormal;
                }
                let verdict = if output_matches(&comparison, &test.expected_output, &result.stdout)
                {
                    TestResult::new(TestOutcome::Passed, format!("{} passed", test.name))
                } else {
                    TestResult::new(
                        TestOutcome::FailedAssertion,
                        format!("{} produced the wrong output", test.name),
                    )
                };
                verdict.with_output(&result.stdout, &result.stderr)
            })
            .collect();
        ctx.set_test_results(self.name(), test_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Problem, ProblemType, TestCase};
    use crate::matching::OutputComparison;
    use crate::pipeline::{BuildEnv, SecretCodes};

    fn test_case(name: &str, input: &str, expected: &str) -> TestCase {
        TestCase {
            name: name.to_string(),
            input: input.to_string(),
            expected_output: expected.to_string(),
        }
    }

    fn ctx(
        problem_type: ProblemType,
        comparison: OutputComparison,
        test_cases: Vec<TestCase>,
    ) -> BuildContext {
        BuildContext::new(
            Problem {
                id: 1,
                problem_type,
                testname: "sq".to_string(),
                output_comparison: comparison,
            },
            test_cases,
            String::new(),
            BuildEnv::default(),
        )
    }

    #[tokio::test]
    async fn test_exit_codes_mapped_to_outcomes() {
        let mut c = ctx(
            ProblemType::NativeFunction,
            OutputComparison::Exact,
            vec![
                test_case("t0", "", ""),
                test_case("t1", "", ""),
                test_case("t2", "", ""),
                test_case("t3", "", ""),
            ],
        );
        c.set_secret_codes(
            "test",
            SecretCodes {
                success: 42,
                failure: 17,
            },
        )
        .unwrap();
        c.set_command_results(
            "test",
            vec![
                CommandResult::exited(42, vec![], vec![]),
                CommandResult::exited(17, vec![], vec![]),
                CommandResult::exited(UNKNOWN_TEST_CASE_CODE, vec![], vec![]),
                CommandResult::exited(1, vec!["noise".to_string()], vec![]),
            ],
        )
        .unwrap();

        CheckExitCodesStep.execute(&mut c).await.unwrap();
        let results = c.require_test_results("test").unwrap();
        assert_eq!(results[0].outcome, TestOutcome::Passed);
        assert_eq!(results[1].outcome, TestOutcome::FailedAssertion);
        assert_eq!(results[2].outcome, TestOutcome::InternalError);
        assert_eq!(results[3].outcome, TestOutcome::FailedWithException);
        assert_eq!(results[3].stdout, "noise");
    }

    #[tokio::test]
    async fn test_timeout_and_signal_mapping() {
        let mut c = ctx(
            ProblemType::NativeFunction,
            OutputComparison::Exact,
            vec![
                test_case("t0", "", ""),
                test_case("t1", "", ""),
                test_case("t2", "", ""),
            ],
        );
        c.set_secret_codes(
            "test",
            SecretCodes {
                success: 42,
                failure: 17,
            },
        )
        .unwrap();

        let timed_out = CommandResult::abnormal(ProcessStatus::TimedOut, "wall clock");
        let mut file_size = CommandResult::abnormal(ProcessStatus::KilledBySignal, "signal 25");
        file_size.signal = Some(libc::SIGXFSZ);
        let mut segv = CommandResult::abnormal(ProcessStatus::KilledBySignal, "signal 11");
        segv.signal = Some(libc::SIGSEGV);
        c.set_command_results("test", vec![timed_out, file_size, segv])
            .unwrap();

        CheckExitCodesStep.execute(&mut c).await.unwrap();
        let results = c.require_test_results("test").unwrap();
        assert_eq!(results[0].outcome, TestOutcome::FailedFromTimeout);
        assert_eq!(results[0].message, "timeout");
        assert_eq!(results[1].outcome, TestOutcome::FailedBySandbox);
        assert!(results[1].message.starts_with("File size limit exceeded"));
        assert_eq!(results[2].outcome, TestOutcome::FailedWithException);
    }

    #[tokio::test]
    async fn test_output_compared_per_test_case() {
        let mut c = ctx(
            ProblemType::ScriptProgram,
            OutputComparison::Exact,
            vec![test_case("t0", "5", "25"), test_case("t1", "6", "36")],
        );
        c.set_command_results(
            "test",
            vec![
                CommandResult::exited(0, vec!["25".to_string()], vec![]),
                CommandResult::exited(0, vec!["35".to_string()], vec![]),
            ],
        )
        .unwrap();

        CheckOutputStep.execute(&mut c).await.unwrap();
        let results = c.require_test_results("test").unwrap();
        assert_eq!(results[0].outcome, TestOutcome::Passed);
        assert_eq!(results[1].outcome, TestOutcome::FailedAssertion);
        assert_eq!(results[1].stdout, "35");
    }

    #[tokio::test]
    async fn test_could_not_start_is_internal_error() {
        let mut c = ctx(
            ProblemType::ScriptProgram,
            OutputComparison::Exact,
            vec![test_case("t0", "", "")],
        );
        c.set_command_results(
            "test",
            vec![CommandResult::abnormal(
                ProcessStatus::CouldNotStart,
                "no such file",
            )],
        )
        .unwrap();

        CheckOutputStep.execute(&mut c).await.unwrap();
        let results = c.require_test_results("test").unwrap();
        assert_eq!(results[0].outcome, TestOutcome::InternalError);
        assert_eq!(results[0].message, "The test failed to execute");
    }
}
