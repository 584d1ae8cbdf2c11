use async_trait::async_trait;

use super::artifacts::BuildContext;
use super::{BuildStep, PipelineError};
use crate::domain::{CompilationResult, SubmissionResult};

/// Final step of every tester pipeline: folds the per-test results
/// into the submission result. Reaching this step means compilation
/// succeeded; compile failures short-circuit earlier.
pub struct CreateSubmissionResultStep;

#[async_trait]
impl BuildStep for CreateSubmissionResultStep {
    fn name(&self) -> &'static str {
        "create-submission-result"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let test_results = ctx.require_test_results(self.name())?.to_vec();
        let result = SubmissionResult::new(CompilationResult::success(), test_results);
        tracing::info!(
            problem_id = ctx.problem.id,
            passed = result.num_tests_passed(),
            total = result.test_results.len(),
            "submission tested"
        );
        ctx.submission_result = Some(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Problem, ProblemType, TestCase, TestOutcome, TestResult};
    use crate::matching::OutputComparison;
    use crate::pipeline::BuildEnv;

    #[tokio::test]
    async fn test_folds_results_into_submission_result() {
        let mut ctx = BuildContext::new(
            Problem {
                id: 1,
                problem_type: ProblemType::NativeProgram,
                testname: String::new(),
                output_comparison: OutputComparison::Exact,
            },
            vec![TestCase {
                name: "t0".to_string(),
                input: String::new(),
                expected_output: String::new(),
            }],
            String::new(),
            BuildEnv::default(),
        );
        ctx.set_test_results(
            "test",
            vec![
                TestResult::new(TestOutcome::Passed, "ok"),
                TestResult::new(TestOutcome::FailedAssertion, "wrong"),
            ],
        )
        .unwrap();

        CreateSubmissionResultStep.execute(&mut ctx).await.unwrap();
        let result = ctx.submission_result.unwrap();
        assert!(result.is_compiled());
        assert_eq!(result.num_tests_passed(), 1);
        assert_eq!(result.test_results.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_test_results_is_an_error() {
        let mut ctx = BuildContext::new(
            Problem {
                id: 1,
                problem_type: ProblemType::NativeProgram,
                testname: String::new(),
                output_comparison: OutputComparison::Exact,
            },
            vec![],
            String::new(),
            BuildEnv::default(),
        );
        assert!(matches!(
            CreateSubmissionResultStep.execute(&mut ctx).await,
            Err(PipelineError::MissingArtifact { .. })
        ));
    }
}
