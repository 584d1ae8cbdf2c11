//! Assembles the tester pipeline for each problem type.

use crate::domain::ProblemType;
use crate::pipeline::check::{CheckExitCodesStep, CheckOutputStep};
use crate::pipeline::commands::{
    CreatePreferencesStep, CreateSecretCodesStep, FunctionCommandsStep, ProgramCommandsStep,
};
use crate::pipeline::compile::{NativeCompileStep, ScriptFunctionPresentStep, ScriptPrepareStep};
use crate::pipeline::execute::ExecuteCommandsStep;
use crate::pipeline::finish::CreateSubmissionResultStep;
use crate::pipeline::scaffold::{NativeFunctionScaffoldStep, ScriptFunctionScaffoldStep};
use crate::pipeline::Pipeline;

/// Build the pipeline that tests submissions of the given type.
pub fn tester_for(problem_type: ProblemType) -> Pipeline {
    match problem_type {
        ProblemType::NativeProgram => Pipeline::new(vec![
            Box::new(CreatePreferencesStep),
            Box::new(NativeCompileStep),
            Box::new(ProgramCommandsStep),
            Box::new(ExecuteCommandsStep),
            Box::new(CheckOutputStep),
            Box::new(CreateSubmissionResultStep),
        ]),
        ProblemType::NativeFunction => Pipeline::new(vec![
            Box::new(CreatePreferencesStep),
            Box::new(CreateSecretCodesStep),
            Box::new(NativeFunctionScaffoldStep),
            Box::new(NativeCompileStep),
            Box::new(FunctionCommandsStep),
            Box::new(ExecuteCommandsStep),
            Box::new(CheckExitCodesStep),
            Box::new(CreateSubmissionResultStep),
        ]),
        ProblemType::ScriptProgram => Pipeline::new(vec![
            Box::new(CreatePreferencesStep),
            Box::new(ScriptPrepareStep),
            Box::new(ProgramCommandsStep),
            Box::new(ExecuteCommandsStep),
            Box::new(CheckOutputStep),
            Box::new(CreateSubmissionResultStep),
        ]),
        ProblemType::ScriptFunction => Pipeline::new(vec![
            Box::new(CreatePreferencesStep),
            Box::new(CreateSecretCodesStep),
            // Presence is checked against the student's code, before
            // the scaffolding driver is appended.
            Box::new(ScriptFunctionPresentStep),
            Box::new(ScriptFunctionScaffoldStep),
            Box::new(ScriptPrepareStep),
            Box::new(FunctionCommandsStep),
            Box::new(ExecuteCommandsStep),
            Box::new(CheckExitCodesStep),
            Box::new(CreateSubmissionResultStep),
        ]),
    }
}
