use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::matching::OutputComparison;

/// Kind of problem being tested. Determines which tester pipeline
/// is used on the builder side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemType {
    /// A complete natively-compiled program reading stdin and writing stdout.
    NativeProgram,
    /// A single natively-compiled function checked against expected return values.
    NativeFunction,
    /// A complete interpreted program reading stdin and writing stdout.
    ScriptProgram,
    /// A single interpreted function checked against expected return values.
    ScriptFunction,
}

/// An instructor-defined problem: the test harness metadata needed to
/// build and test submitted program text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub id: i32,
    pub problem_type: ProblemType,
    /// Name of the function under test (function-style problems only).
    pub testname: String,
    /// How program-style stdout is compared against the expected output.
    pub output_comparison: OutputComparison,
}

/// One input/expected-output pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub input: String,
    pub expected_output: String,
}

/// A student program plus the problem and test cases it must satisfy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub problem: Problem,
    pub test_cases: Vec<TestCase>,
    pub program_text: String,
}

/// Outcome of running one test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    Passed,
    FailedAssertion,
    FailedWithException,
    FailedFromTimeout,
    FailedBySandbox,
    InternalError,
}

/// Result of one test case: the outcome plus whatever the test
/// process produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub outcome: TestOutcome,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl TestResult {
    pub fn new(outcome: TestOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_output(mut self, stdout: &[String], stderr: &[String]) -> Self {
        self.stdout = stdout.join("\n");
        self.stderr = stderr.join("\n");
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilationOutcome {
    Success,
    Failure,
    /// The builder itself failed; not the student's fault.
    BuilderError,
}

/// A single compiler diagnostic with 1-based line/column positions
/// relative to the code the student actually submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompilerDiagnostic {
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub message: String,
}

impl CompilerDiagnostic {
    pub fn new(line: u32, col: u32, message: impl Into<String>) -> Self {
        Self {
            start_line: line,
            end_line: line,
            start_col: col,
            end_col: col,
            message: message.into(),
        }
    }

    /// Shift line numbers to account for scaffolding prologue lines
    /// inserted before the student's code.
    pub fn adjust_for_prologue(&mut self, prologue_lines: u32) {
        self.start_line = self.start_line.saturating_sub(prologue_lines).max(1);
        self.end_line = self.end_line.saturating_sub(prologue_lines).max(1);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilationResult {
    pub outcome: CompilationOutcome,
    pub diagnostics: Vec<CompilerDiagnostic>,
}

impl CompilationResult {
    pub fn success() -> Self {
        Self {
            outcome: CompilationOutcome::Success,
            diagnostics: Vec::new(),
        }
    }

    pub fn failure(diagnostics: Vec<CompilerDiagnostic>) -> Self {
        Self {
            outcome: CompilationOutcome::Failure,
            diagnostics,
        }
    }

    pub fn builder_error() -> Self {
        Self {
            outcome: CompilationOutcome::BuilderError,
            diagnostics: Vec::new(),
        }
    }
}

/// The final result of building and testing one submission, as sent
/// back from the builder over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub compilation: CompilationResult,
    pub test_results: Vec<TestResult>,
    pub annotations: HashMap<String, String>,
    /// When the builder finished testing this submission.
    pub tested_at: chrono::DateTime<chrono::Utc>,
}

impl SubmissionResult {
    pub fn new(compilation: CompilationResult, test_results: Vec<TestResult>) -> Self {
        Self {
            compilation,
            test_results,
            annotations: HashMap::new(),
            tested_at: chrono::Utc::now(),
        }
    }

    /// A result reporting an internal builder failure, with no test results.
    pub fn builder_error() -> Self {
        Self::new(CompilationResult::builder_error(), Vec::new())
    }

    pub fn is_compiled(&self) -> bool {
        self.compilation.outcome == CompilationOutcome::Success
    }

    pub fn num_tests_passed(&self) -> usize {
        self.test_results
            .iter()
            .filter(|r| r.outcome == TestOutcome::Passed)
            .count()
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }
}
