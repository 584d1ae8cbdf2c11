use async_trait::async_trait;

use super::artifacts::{BuildContext, ProgramSource};
use super::{BuildStep, PipelineError};

/// Exit code the generated harness returns for an unrecognized test
/// case name. Reserved; the secret success/failure pair never uses it.
pub const UNKNOWN_TEST_CASE_CODE: i32 = 99;

fn count_lines(text: &str) -> u32 {
    text.lines().count() as u32
}

fn ensure_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

/// Wraps a submitted C function in a generated main() that runs one
/// test case per invocation. argv[1] names the test case; argv[2] and
/// argv[3] carry the secret exit codes for "return value matched" /
/// "did not match", and are zeroed immediately so the tested code
/// cannot read them back.
pub struct NativeFunctionScaffoldStep;

#[async_trait]
impl BuildStep for NativeFunctionScaffoldStep {
    fn name(&self) -> &'static str {
        "native-function-scaffold"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let program_text = ensure_trailing_newline(&ctx.program_source().text);
        let student_lines = count_lines(&program_text);
        let prologue_lines = 3;

        let mut text = String::new();
        text.push_str("#include <string.h>\n");
        text.push_str("#include <stdlib.h>\n");
        text.push_str("#include <stdio.h>\n");
        text.push_str(&program_text);
        text.push_str("#undef eq\n");
        text.push_str("#define eq(a,b) ((a) == (b))\n");
        text.push_str("int main(int argc, char ** argv) {\n");
        text.push_str("  int rcIfEqual = atoi(argv[2]);\n");
        text.push_str("  int rcIfNotEqual = atoi(argv[3]);\n");
        text.push_str("  argv[2] = 0;\n");
        text.push_str("  argv[3] = 0;\n");
        for t in &ctx.test_cases {
            text.push_str(&format!(
                "  if (strcmp(argv[1], \"{}\") == 0) {{\n",
                t.name
            ));
            text.push_str(&format!(
                "    return eq({}({}), ({})) ? rcIfEqual : rcIfNotEqual;\n",
                ctx.problem.testname, t.input, t.expected_output
            ));
            text.push_str("  }\n");
        }
        text.push_str(&format!("  return {};\n", UNKNOWN_TEST_CASE_CODE));
        text.push_str("}\n");

        let epilogue_lines = count_lines(&text) - student_lines - prologue_lines;
        ctx.replace_program_source(ProgramSource::scaffolded(
            text,
            prologue_lines,
            epilogue_lines,
        ));
        Ok(())
    }
}

/// The interpreted-language counterpart. The prologue reads the
/// secret codes out of argv and zeroes them *before* the student's
/// module-level code runs, so top-level code can only ever see "0"
/// there; the harness variables carry a random per-submission suffix
/// so their names cannot be guessed either. Exceptions in the
/// student's code propagate to the interpreter, which exits
/// abnormally.
pub struct ScriptFunctionScaffoldStep;

#[async_trait]
impl BuildStep for ScriptFunctionScaffoldStep {
    fn name(&self) -> &'static str {
        "script-function-scaffold"
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<(), PipelineError> {
        let program_text = ensure_trailing_newline(&ctx.program_source().text);
        let student_lines = count_lines(&program_text);
        let tag: u32 = rand::random();
        let rc_eq = format!("__rc_eq_{:08x}", tag);
        let rc_ne = format!("__rc_ne_{:08x}", tag);
        let run_case = format!("__run_case_{:08x}", tag);
        let prologue_lines = 5;

        let mut text = String::new();
        text.push_str("import sys\n");
        text.push_str(&format!("{} = int(sys.argv[2])\n", rc_eq));
        text.push_str(&format!("{} = int(sys.argv[3])\n", rc_ne));
        text.push_str("sys.argv[2] = \"0\"\n");
        text.push_str("sys.argv[3] = \"0\"\n");
        text.push_str(&program_text);
        text.push_str(&format!("def {}(name, rc_eq, rc_ne):\n", run_case));
        for t in &ctx.test_cases {
            text.push_str(&format!("    if name == \"{}\":\n", t.name));
            text.push_str(&format!(
                "        return rc_eq if (({}({})) == ({})) else rc_ne\n",
                ctx.problem.testname, t.input, t.expected_output
            ));
        }
        text.push_str(&format!("    return {}\n", UNKNOWN_TEST_CASE_CODE));
        text.push_str("if __name__ == \"__main__\":\n");
        text.push_str(&format!(
            "    sys.exit({}(sys.argv[1], {}, {}))\n",
            run_case, rc_eq, rc_ne
        ));

        let epilogue_lines = count_lines(&text) - student_lines - prologue_lines;
        ctx.replace_program_source(ProgramSource::scaffolded(
            text,
            prologue_lines,
            epilogue_lines,
        ));
        Ok(())
    }
}
