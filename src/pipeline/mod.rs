pub mod artifacts;
pub mod check;
pub mod commands;
pub mod compile;
pub mod execute;
pub mod finish;
pub mod scaffold;

use async_trait::async_trait;
use thiserror::Error;

pub use artifacts::{
    BuildContext, BuildEnv, CommandInput, Executable, ProgramSource, SecretCodes,
};

/// Pipeline-internal faults. These are programmer errors in the
/// pipeline configuration or genuine builder failures; they are never
/// surfaced to the student as their own fault.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step {step}: required artifact missing: {artifact}")]
    MissingArtifact {
        step: &'static str,
        artifact: &'static str,
    },
    #[error("step {step}: artifact {artifact} already present")]
    DuplicateArtifact {
        step: &'static str,
        artifact: &'static str,
    },
    #[error("step {step}: {msg}")]
    StepFailed { step: &'static str, msg: String },
    #[error("pipeline finished without producing a submission result")]
    NoResult,
}

/// One stateless build step. All per-submission state lives in the
/// `BuildContext`, so unrelated submissions can be processed
/// concurrently with no shared locking.
#[async_trait]
pub trait BuildStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError>;
}

/// An ordered chain of build steps transforming a submission into a
/// `SubmissionResult`. A step may short-circuit the rest of the chain
/// by storing a terminal result (e.g. on compile failure).
pub struct Pipeline {
    steps: Vec<Box<dyn BuildStep>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn BuildStep>>) -> Self {
        Self { steps }
    }

    /// Run all steps in order. Cleanup actions are NOT run here; the
    /// caller must invoke `ctx.run_cleanup()` whether or not this
    /// returns an error.
    pub async fn run(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        for step in &self.steps {
            if ctx.submission_result.is_some() {
                tracing::debug!(step = step.name(), "skipping, submission already complete");
                continue;
            }
            tracing::debug!(step = step.name(), "executing build step");
            step.execute(ctx).await?;
        }
        if ctx.submission_result.is_none() {
            return Err(PipelineError::NoResult);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CompilationResult, Problem, ProblemType, SubmissionResult, TestCase,
    };
    use crate::matching::OutputComparison;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_problem() -> Problem {
        Problem {
            id: 1,
            problem_type: ProblemType::NativeProgram,
            testname: String::new(),
            output_comparison: OutputComparison::LineRegex,
        }
    }

    fn test_ctx() -> BuildContext {
        BuildContext::new(
            test_problem(),
            vec![TestCase {
                name: "t0".to_string(),
                input: String::new(),
                expected_output: String::new(),
            }],
            "int main() { return 0; }".to_string(),
            BuildEnv::default(),
        )
    }

    struct CountingStep {
        counter: Arc<AtomicUsize>,
        complete: bool,
    }

    #[async_trait]
    impl BuildStep for CountingStep {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.complete {
                ctx.submission_result =
                    Some(SubmissionResult::new(CompilationResult::success(), vec![]));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order_until_complete() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            Box::new(CountingStep {
                counter: counter.clone(),
                complete: false,
            }),
            Box::new(CountingStep {
                counter: counter.clone(),
                complete: true,
            }),
            // Must be skipped: the submission is already complete.
            Box::new(CountingStep {
                counter: counter.clone(),
                complete: false,
            }),
        ]);

        let mut ctx = test_ctx();
        pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(ctx.submission_result.is_some());
    }

    #[tokio::test]
    async fn test_pipeline_without_result_is_an_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![Box::new(CountingStep {
            counter,
            complete: false,
        })]);
        let mut ctx = test_ctx();
        assert!(matches!(
            pipeline.run(&mut ctx).await,
            Err(PipelineError::NoResult)
        ));
    }
}
