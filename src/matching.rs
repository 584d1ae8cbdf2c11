use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// How a program-style problem's captured stdout is compared against
/// the expected output of a test case.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutputComparison {
    /// Entire trimmed output must equal the trimmed expected text.
    Exact,
    /// Output parsed as a floating-point number, compared within epsilon.
    FloatTolerance { epsilon: f64 },
    /// Expected text is a regular expression; at least one output line
    /// must match it. A trailing `$i` makes the match case-insensitive,
    /// `$j` joins all output lines into one before matching.
    LineRegex,
}

impl Default for OutputComparison {
    fn default() -> Self {
        OutputComparison::LineRegex
    }
}

/// Check captured stdout lines against the expected output.
/// Invalid regexes and unparseable floats count as a failed match
/// rather than an error; the expected output is instructor data,
/// not student data.
pub fn output_matches(
    comparison: &OutputComparison,
    expected: &str,
    stdout_lines: &[String],
) -> bool {
    // Empty output may legitimately match an expected blank line,
    // so treat no output as one empty line.
    let lines: Vec<String> = if stdout_lines.is_empty() {
        vec![String::new()]
    } else {
        stdout_lines.to_vec()
    };

    match comparison {
        OutputComparison::Exact => lines.join("\n").trim() == expected.trim(),
        OutputComparison::FloatTolerance { epsilon } => {
            let Ok(want) = expected.trim().parse::<f64>() else {
                return false;
            };
            lines.iter().any(|line| {
                line.trim()
                    .parse::<f64>()
                    .map(|got| (got - want).abs() <= *epsilon)
                    .unwrap_or(false)
            })
        }
        OutputComparison::LineRegex => regex_matches(expected, &lines),
    }
}

fn regex_matches(expected: &str, lines: &[String]) -> bool {
    let (pattern, case_insensitive, join_lines) = parse_regex_options(expected);

    let lines: Vec<String> = if join_lines {
        vec![
            lines
                .iter()
                .map(|l| l.trim())
                .collect::<Vec<_>>()
                .join(" "),
        ]
    } else {
        lines.to_vec()
    };

    let Ok(re) = RegexBuilder::new(&anchor(pattern))
        .case_insensitive(case_insensitive)
        .build()
    else {
        tracing::warn!(pattern, "invalid test case output regex");
        return false;
    };

    lines.iter().any(|line| re.is_match(line))
}

/// Whole-line match semantics: the pattern must cover the entire line.
fn anchor(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

/// Split a trailing `$i`/`$j`/`$ij` option suffix off the pattern.
fn parse_regex_options(expected: &str) -> (&str, bool, bool) {
    let options_re = Regex::new(r"\$([ij]+)$").unwrap();
    if let Some(m) = options_re.captures(expected) {
        let options = m.get(1).unwrap().as_str();
        let end = m.get(0).unwrap().start();
        (
            &expected[..end],
            options.contains('i'),
            options.contains('j'),
        )
    } else {
        (expected, false, false)
    }
}
