use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::artifacts::{BuildContext, Executable};
use super::{BuildStep, PipelineError};
use crate::domain::{CompilationResult, CompilerDiagnostic, SubmissionResult};
use crate::sandbox::{Command, CommandExecutor, ExecutionPreferences, ProcessStatus};

/// `file.c:12:5: error: expected ';'` and the fatal variant.
static NATIVE_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^:]+:(\d+):(\d+):\s*(?:fatal\s+)?error:\s*(.*)$").unwrap()
});

/// `  File "submission.py", line 12` from a syntax-check traceback.
static SCRIPT_DIAGNOSTIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*File "[^"]*", line (\d+)"#).unwrap());

fn compile_executor(ctx: &BuildContext) -> CommandExecutor {
    CommandExecutor::new(
        Duration::from_millis(ctx.env.executor_poll_interval_ms),
        1,
        Duration::from_millis(ctx.env.compile_timeout_ms),
    )
}

fn fail_compilation(ctx: &mut BuildContext, mut diagnostics: Vec<CompilerDiagnostic>) {
    let prologue = ctx.program_source().prologue_lines;
    for d in &mut diagnostics {
        d.adjust_for_prologue(prologue);
    }
    ctx.submission_result = Some(SubmissionResult::new(
        CompilationResult::failure(diagnostics),
        Vec::new(),
    ));
}

/// Writes the (possibly scaffolded) C source into the scratch
/// directory and compiles it. A failed compile short-circuits the
/// pipeline with the parsed diagnostics; a compiler that cannot be
/// started at all is the builder's fault, not the student's.
pub struct NativeCompileStep;

#[async_trait]
impl BuildStep for NativeCompileStep {
    fn name(&self) -> &'static str {
        "native-compile"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let scratch = ctx.create_scratch_dir(self.name())?;
        let source_path = scratch.join("submission.c");
        let exe_path = scratch.join("submission");
        std::fs::write(&source_path, &ctx.program_source().text).map_err(|e| {
            PipelineError::StepFailed {
                step: self.name(),
                msg: format!("cannot write source file: {}", e),
            }
        })?;

        let command = Command::new(
            vec![
                ctx.env.compiler_path.to_string_lossy().into_owned(),
                "-o".to_string(),
                exe_path.to_string_lossy().into_owned(),
                source_path.to_string_lossy().into_owned(),
                "-lm".to_string(),
            ],
            scratch.clone(),
        );

        let result = compile_executor(ctx)
            .execute(&command, "", &ExecutionPreferences::unbounded())
            .await;

        match result.status {
            ProcessStatus::Exited if result.exit_code == Some(0) => {
                tracing::debug!(exe = %exe_path.display(), "compilation succeeded");
                ctx.set_executable(self.name(), Executable::Native(exe_path))?;
                Ok(())
            }
            ProcessStatus::Exited => {
                let diagnostics = parse_native_diagnostics(&result.stderr);
                tracing::debug!(count = diagnostics.len(), "compilation failed");
                fail_compilation(ctx, diagnostics);
                Ok(())
            }
            _ => Err(PipelineError::StepFailed {
                step: self.name(),
                msg: format!("compiler did not run: {}", result.status_message),
            }),
        }
    }
}

/// Writes the script into the scratch directory and runs the
/// interpreter's syntax check over it, so broken submissions are
/// reported as compile failures instead of one exception per test.
pub struct ScriptPrepareStep;

#[async_trait]
impl BuildStep for ScriptPrepareStep {
    fn name(&self) -> &'static str {
        "script-prepare"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let scratch = ctx.create_scratch_dir(self.name())?;
        let script_path = scratch.join("submission.py");
        std::fs::write(&script_path, &ctx.program_source().text).map_err(|e| {
            PipelineError::StepFailed {
                step: self.name(),
                msg: format!("cannot write script file: {}", e),
            }
        })?;

        let command = Command::new(
            vec![
                ctx.env.interpreter_path.to_string_lossy().into_owned(),
                "-m".to_string(),
                "py_compile".to_string(),
                script_path.to_string_lossy().into_owned(),
            ],
            scratch.clone(),
        );

        let result = compile_executor(ctx)
            .execute(&command, "", &ExecutionPreferences::unbounded())
            .await;

        match result.status {
            ProcessStatus::Exited if result.exit_code == Some(0) => {
                ctx.set_executable(self.name(), Executable::Script(script_path))?;
                Ok(())
            }
            ProcessStatus::Exited => {
                let diagnostics = parse_script_diagnostics(&result.stderr);
                fail_compilation(ctx, diagnostics);
                Ok(())
            }
            _ => Err(PipelineError::StepFailed {
                step: self.name(),
                msg: format!("interpreter did not run: {}", result.status_message),
            }),
        }
    }
}

/// Fails function-style script submissions that never define the
/// function under test, before any test case runs against them.
pub struct ScriptFunctionPresentStep;

#[async_trait]
impl BuildStep for ScriptFunctionPresentStep {
    fn name(&self) -> &'static str {
        "script-function-present"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let needle = format!("def {}", ctx.problem.testname);
        if !ctx.program_source().text.contains(&needle) {
            fail_compilation(
                ctx,
                vec![CompilerDiagnostic::new(
                    1,
                    1,
                    format!("missing function {}", ctx.problem.testname),
                )],
            );
        }
        Ok(())
    }
}

fn parse_native_diagnostics(stderr: &[String]) -> Vec<CompilerDiagnostic> {
    let mut diagnostics: Vec<CompilerDiagnostic> = stderr
        .iter()
        .filter_map(|line| {
            let caps = NATIVE_DIAGNOSTIC.captures(line)?;
            let line_no: u32 = caps[1].parse().ok()?;
            let col: u32 = caps[2].parse().ok()?;
            Some(CompilerDiagnostic::new(line_no, col, &caps[3]))
        })
        .collect();

    if diagnostics.is_empty() {
        // Some failure modes (linker errors, dead compiler) produce no
        // parseable location; report the raw output at line 1.
        diagnostics.push(CompilerDiagnostic::new(1, 1, stderr.join("\n")));
    }
    diagnostics
}

fn parse_script_diagnostics(stderr: &[String]) -> Vec<CompilerDiagnostic> {
    let mut line_no = 1;
    let mut message = String::new();
    for line in stderr {
        if let Some(caps) = SCRIPT_DIAGNOSTIC.captures(line) {
            if let Ok(n) = caps[1].parse() {
                line_no = n;
            }
        } else if line.contains("Error") {
            message = line.trim().to_string();
        }
    }
    if message.is_empty() {
        message = stderr.join("\n");
    }
    vec![CompilerDiagnostic::new(line_no, 1, message)]
}
