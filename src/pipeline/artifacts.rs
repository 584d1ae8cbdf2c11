use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::PipelineError;
use crate::domain::{Problem, SubmissionResult, TestCase, TestResult};
use crate::sandbox::{Command, CommandResult, ExecutionPreferences};

/// Build-time settings; re-exported under the name the pipeline uses.
pub type BuildEnv = crate::config::BuildConfig;

/// Program source at some stage of scaffolding. `prologue_lines` /
/// `epilogue_lines` record how many generated lines surround the
/// student's code, so compiler diagnostics can be mapped back.
#[derive(Clone, Debug)]
pub struct ProgramSource {
    pub text: String,
    pub prologue_lines: u32,
    pub epilogue_lines: u32,
}

impl ProgramSource {
    pub fn new(text: String) -> Self {
        Self {
            text,
            prologue_lines: 0,
            epilogue_lines: 0,
        }
    }

    pub fn scaffolded(text: String, prologue_lines: u32, epilogue_lines: u32) -> Self {
        Self {
            text,
            prologue_lines,
            epilogue_lines,
        }
    }
}

/// The built test executable.
#[derive(Clone, Debug)]
pub enum Executable {
    /// A native binary, run directly.
    Native(PathBuf),
    /// A script file, run through the configured interpreter.
    Script(PathBuf),
}

/// Randomized exit-code pair for function-style problems. Secret per
/// submission so students cannot game the exit status.
#[derive(Clone, Copy, Debug)]
pub struct SecretCodes {
    pub success: i32,
    pub failure: i32,
}

/// One test-case invocation: the command plus what to feed its stdin.
#[derive(Clone, Debug)]
pub struct CommandInput {
    pub command: Command,
    pub stdin: String,
}

/// An action run after the pipeline finishes (success or failure),
/// e.g. deleting a scratch directory.
pub trait CleanupAction: Send {
    fn cleanup(&mut self);
}

/// A hook run on the final result before it is returned, e.g. to
/// attach coverage data as an annotation.
pub trait ResultHook: Send {
    fn annotate(&self, result: &mut SubmissionResult);
}

struct ScratchDirCleanup {
    dir: Option<TempDir>,
}

impl CleanupAction for ScratchDirCleanup {
    fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch dir");
            }
        }
    }
}

/// Per-submission artifact bag. Each artifact is write-once per
/// pipeline run; the one sanctioned replacement is scaffolding
/// swapping out the program source. Never shared across submissions,
/// so no locking is needed.
pub struct BuildContext {
    pub env: BuildEnv,
    pub problem: Problem,
    pub test_cases: Vec<TestCase>,

    program_source: ProgramSource,
    scratch_dir: Option<PathBuf>,
    executable: Option<Executable>,
    prefs: Option<ExecutionPreferences>,
    secret_codes: Option<SecretCodes>,
    commands: Option<Vec<CommandInput>>,
    command_results: Option<Vec<CommandResult>>,
    test_results: Option<Vec<TestResult>>,
    pub submission_result: Option<SubmissionResult>,

    cleanup_actions: Vec<Box<dyn CleanupAction>>,
    result_hooks: Vec<Box<dyn ResultHook>>,
}

impl BuildContext {
    pub fn new(
        problem: Problem,
        test_cases: Vec<TestCase>,
        program_text: String,
        env: BuildEnv,
    ) -> Self {
        Self {
            env,
            problem,
            test_cases,
            program_source: ProgramSource::new(program_text),
            scratch_dir: None,
            executable: None,
            prefs: None,
            secret_codes: None,
            commands: None,
            command_results: None,
            test_results: None,
            submission_result: None,
            cleanup_actions: Vec::new(),
            result_hooks: Vec::new(),
        }
    }

    pub fn program_source(&self) -> &ProgramSource {
        &self.program_source
    }

    /// Scaffolding replaces the program source wholesale.
    pub fn replace_program_source(&mut self, source: ProgramSource) {
        self.program_source = source;
    }

    /// Create the scratch working directory for this submission and
    /// register its deletion as a cleanup action.
    pub fn create_scratch_dir(&mut self, step: &'static str) -> Result<PathBuf, PipelineError> {
        if self.scratch_dir.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "scratch_dir",
            });
        }
        let dir = match &self.env.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| PipelineError::StepFailed {
                    step,
                    msg: format!("cannot create scratch root: {}", e),
                })?;
                TempDir::with_prefix_in("grader-", root)
            }
            None => TempDir::with_prefix("grader-"),
        }
        .map_err(|e| PipelineError::StepFailed {
            step,
            msg: format!("cannot create scratch dir: {}", e),
        })?;

        let path = dir.path().to_path_buf();
        self.scratch_dir = Some(path.clone());
        self.cleanup_actions
            .push(Box::new(ScratchDirCleanup { dir: Some(dir) }));
        Ok(path)
    }

    pub fn require_scratch_dir(&self, step: &'static str) -> Result<&Path, PipelineError> {
        self.scratch_dir
            .as_deref()
            .ok_or(PipelineError::MissingArtifact {
                step,
                artifact: "scratch_dir",
            })
    }

    pub fn set_executable(
        &mut self,
        step: &'static str,
        exe: Executable,
    ) -> Result<(), PipelineError> {
        if self.executable.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "executable",
            });
        }
        self.executable = Some(exe);
        Ok(())
    }

    pub fn require_executable(&self, step: &'static str) -> Result<&Executable, PipelineError> {
        self.executable
            .as_ref()
            .ok_or(PipelineError::MissingArtifact {
                step,
                artifact: "executable",
            })
    }

    pub fn set_prefs(
        &mut self,
        step: &'static str,
        prefs: ExecutionPreferences,
    ) -> Result<(), PipelineError> {
        if self.prefs.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "execution_preferences",
            });
        }
        self.prefs = Some(prefs);
        Ok(())
    }

    pub fn require_prefs(
        &self,
        step: &'static str,
    ) -> Result<&ExecutionPreferences, PipelineError> {
        self.prefs.as_ref().ok_or(PipelineError::MissingArtifact {
            step,
            artifact: "execution_preferences",
        })
    }

    pub fn set_secret_codes(
        &mut self,
        step: &'static str,
        codes: SecretCodes,
    ) -> Result<(), PipelineError> {
        if self.secret_codes.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "secret_codes",
            });
        }
        self.secret_codes = Some(codes);
        Ok(())
    }

    pub fn require_secret_codes(&self, step: &'static str) -> Result<SecretCodes, PipelineError> {
        self.secret_codes.ok_or(PipelineError::MissingArtifact {
            step,
            artifact: "secret_codes",
        })
    }

    pub fn set_commands(
        &mut self,
        step: &'static str,
        commands: Vec<CommandInput>,
    ) -> Result<(), PipelineError> {
        if self.commands.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "commands",
            });
        }
        self.commands = Some(commands);
        Ok(())
    }

    pub fn require_commands(&self, step: &'static str) -> Result<&[CommandInput], PipelineError> {
        self.commands
            .as_deref()
            .ok_or(PipelineError::MissingArtifact {
                step,
                artifact: "commands",
            })
    }

    pub fn set_command_results(
        &mut self,
        step: &'static str,
        results: Vec<CommandResult>,
    ) -> Result<(), PipelineError> {
        if self.command_results.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "command_results",
            });
        }
        self.command_results = Some(results);
        Ok(())
    }

    pub fn require_command_results(
        &self,
        step: &'static str,
    ) -> Result<&[CommandResult], PipelineError> {
        self.command_results
            .as_deref()
            .ok_or(PipelineError::MissingArtifact {
                step,
                artifact: "command_results",
            })
    }

    pub fn set_test_results(
        &mut self,
        step: &'static str,
        results: Vec<TestResult>,
    ) -> Result<(), PipelineError> {
        if self.test_results.is_some() {
            return Err(PipelineError::DuplicateArtifact {
                step,
                artifact: "test_results",
            });
        }
        self.test_results = Some(results);
        Ok(())
    }

    pub fn require_test_results(&self, step: &'static str) -> Result<&[TestResult], PipelineError> {
        self.test_results
            .as_deref()
            .ok_or(PipelineError::MissingArtifact {
                step,
                artifact: "test_results",
            })
    }

    pub fn add_cleanup_action(&mut self, action: Box<dyn CleanupAction>) {
        self.cleanup_actions.push(action);
    }

    pub fn add_result_hook(&mut self, hook: Box<dyn ResultHook>) {
        self.result_hooks.push(hook);
    }

    /// Run every registered cleanup action, in registration order.
    /// Must be called exactly once per pipeline run, on every path.
    pub fn run_cleanup(&mut self) {
        for mut action in self.cleanup_actions.drain(..) {
            action.cleanup();
        }
    }

    /// Run the registered result hooks against the final result.
    pub fn apply_result_hooks(&mut self) {
        if let Some(result) = self.submission_result.as_mut() {
            for hook in &self.result_hooks {
                hook.annotate(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProblemType;
    use crate::matching::OutputComparison;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> BuildContext {
        BuildContext::new(
            Problem {
                id: 7,
                problem_type: ProblemType::NativeFunction,
                testname: "sq".to_string(),
                output_comparison: OutputComparison::Exact,
            },
            vec![],
            "code".to_string(),
            BuildEnv::default(),
        )
    }

    struct CountCleanup {
        counter: Arc<AtomicUsize>,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl CleanupAction for CountCleanup {
        fn cleanup(&mut self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn test_missing_artifact_is_diagnostic() {
        let c = ctx();
        let err = c.require_executable("compile").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingArtifact {
                step: "compile",
                artifact: "executable"
            }
        ));
    }

    #[test]
    fn test_write_once_enforced() {
        let mut c = ctx();
        c.set_prefs("a", ExecutionPreferences::limited()).unwrap();
        let err = c.set_prefs("b", ExecutionPreferences::limited()).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateArtifact { .. }));
    }

    #[test]
    fn test_program_source_replacement_allowed() {
        let mut c = ctx();
        assert_eq!(c.program_source().text, "code");
        c.replace_program_source(ProgramSource::scaffolded("wrapped".to_string(), 3, 10));
        assert_eq!(c.program_source().text, "wrapped");
        assert_eq!(c.program_source().prologue_lines, 3);
    }

    #[test]
    fn test_cleanup_runs_in_registration_order_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut c = ctx();
        c.add_cleanup_action(Box::new(CountCleanup {
            counter: counter.clone(),
            order: order.clone(),
            tag: "first",
        }));
        c.add_cleanup_action(Box::new(CountCleanup {
            counter: counter.clone(),
            order: order.clone(),
            tag: "second",
        }));

        c.run_cleanup();
        c.run_cleanup(); // second call is a no-op
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_scratch_dir_removed_by_cleanup() {
        let mut c = ctx();
        let path = c.create_scratch_dir("compile").unwrap();
        assert!(path.exists());
        c.run_cleanup();
        assert!(!path.exists());
    }

    struct TagHook;

    impl ResultHook for TagHook {
        fn annotate(&self, result: &mut crate::domain::SubmissionResult) {
            result.annotate("coverage", "87");
        }
    }

    #[test]
    fn test_result_hooks_annotate_final_result() {
        use crate::domain::{CompilationResult, SubmissionResult};
        let mut c = ctx();
        c.add_result_hook(Box::new(TagHook));
        c.submission_result = Some(SubmissionResult::new(CompilationResult::success(), vec![]));
        c.apply_result_hooks();
        assert_eq!(
            c.submission_result.unwrap().annotations.get("coverage"),
            Some(&"87".to_string())
        );
    }
}
