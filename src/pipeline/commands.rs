use async_trait::async_trait;
use rand::Rng;

use super::artifacts::{BuildContext, CommandInput, Executable, SecretCodes};
use super::scaffold::UNKNOWN_TEST_CASE_CODE;
use super::{BuildStep, PipelineError};
use crate::domain::ProblemType;
use crate::sandbox::{Command, ExecutionPreferences};

/// Installs the default resource limits every test process runs
/// under; interpreted problems get the roomier script profile.
pub struct CreatePreferencesStep;

#[async_trait]
impl BuildStep for CreatePreferencesStep {
    fn name(&self) -> &'static str {
        "create-preferences"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let prefs = match ctx.problem.problem_type {
            ProblemType::NativeProgram | ProblemType::NativeFunction => {
                ExecutionPreferences::limited()
            }
            ProblemType::ScriptProgram | ProblemType::ScriptFunction => {
                ExecutionPreferences::limited_script()
            }
        };
        ctx.set_prefs(self.name(), prefs)
    }
}

/// Picks the per-submission secret exit-code pair for function-style
/// problems. Codes 0 and 1 are excluded because interpreters and C
/// runtimes exit with them on their own; the unknown-test-case code
/// is reserved too.
pub struct CreateSecretCodesStep;

#[async_trait]
impl BuildStep for CreateSecretCodesStep {
    fn name(&self) -> &'static str {
        "create-secret-codes"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let mut rng = rand::thread_rng();
        let success = rng.gen_range(2..UNKNOWN_TEST_CASE_CODE);
        let failure = loop {
            let candidate = rng.gen_range(2..UNKNOWN_TEST_CASE_CODE);
            if candidate != success {
                break candidate;
            }
        };
        ctx.set_secret_codes(self.name(), SecretCodes { success, failure })
    }
}

fn base_argv(ctx: &BuildContext, step: &'static str) -> Result<Vec<String>, PipelineError> {
    Ok(match ctx.require_executable(step)? {
        Executable::Native(path) => vec![path.to_string_lossy().into_owned()],
        Executable::Script(path) => vec![
            ctx.env.interpreter_path.to_string_lossy().into_owned(),
            path.to_string_lossy().into_owned(),
        ],
    })
}

/// Builds one command per test case for function-style problems: the
/// test case name and the secret codes travel on the command line,
/// and stdin stays empty.
pub struct FunctionCommandsStep;

#[async_trait]
impl BuildStep for FunctionCommandsStep {
    fn name(&self) -> &'static str {
        "function-commands"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let argv = base_argv(ctx, self.name())?;
        let codes = ctx.require_secret_codes(self.name())?;
        let dir = ctx.require_scratch_dir(self.name())?.to_path_buf();

        let commands = ctx
            .test_cases
            .iter()
            .map(|t| {
                let mut argv = argv.clone();
                argv.push(t.name.clone());
                argv.push(codes.success.to_string());
                argv.push(codes.failure.to_string());
                CommandInput {
                    command: Command::new(argv, dir.clone()),
                    stdin: String::new(),
                }
            })
            .collect();
        ctx.set_commands(self.name(), commands)
    }
}

/// Builds one command per test case for program-style problems: no
/// extra arguments, the test case input arrives on stdin.
pub struct ProgramCommandsStep;

#[async_trait]
impl BuildStep for ProgramCommandsStep {
    fn name(&self) -> &'static str {
        "program-commands"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let argv = base_argv(ctx, self.name())?;
        let dir = ctx.require_scratch_dir(self.name())?.to_path_buf();

        let commands = ctx
            .test_cases
            .iter()
            .map(|t| CommandInput {
                command: Command::new(argv.clone(), dir.clone()),
                stdin: t.input.clone(),
            })
            .collect();
        ctx.set_commands(self.name(), commands)
    }
}
