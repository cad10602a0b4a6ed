//! Unstructured validation stages.
//!
//! Each stage looks at the raw agent output independently and returns a score
//! in `[0, 1]` with a details map and improvement suggestions.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::StageWeights;
use crate::utils::{count_word_hits, significant_words};

use super::types::{Stage, StageReport};

const ERROR_PHRASES: &[&str] = &[
    "traceback",
    "syntaxerror",
    "syntax error",
    "error:",
    "exception:",
    "panicked at",
    "failed to compile",
    "compilation failed",
];

const STUB_CALLS: &[&str] = &[
    "notimplementederror",
    "unimplemented!(",
    "todo!(",
    "not implemented",
];

const ERROR_HANDLING: &[&str] = &[
    "try", "catch", "except", "result", "map_err", "raise", "throw", "err", "finally", "rescue",
];

const EDGE_CASE_TERMS: &[&str] = &[
    "edge", "empty", "null", "none", "boundary", "invalid", "overflow", "zero", "negative",
    "missing", "error", "limit",
];

const GENERIC_NAMES: &[&str] = &[
    "tmp", "temp", "foo", "bar", "baz", "data", "val", "obj", "thing", "stuff", "res", "ret",
];

const CONVENTIONAL_SHORT: &[&str] = &["i", "j", "k", "n", "x", "y", "id", "ok", "io", "db"];

const LANGUAGE_KEYWORDS: &[&str] = &[
    "fn", "let", "mut", "if", "else", "for", "in", "while", "loop", "return", "def", "class",
    "pub", "use", "mod", "impl", "self", "as", "is", "or", "and", "not", "var", "const",
];

const MAX_NESTING: usize = 3;
const SHORT_OUTPUT_CHARS: usize = 50;
const BRIEF_OUTPUT_CHARS: usize = 200;

static TEST_FN_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static ASSERTION_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static IDENTIFIER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn test_fn_pattern() -> Option<&'static Regex> {
    TEST_FN_PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?m)^\s*(#\[(tokio::)?test\]|(async\s+)?def\s+test_|(pub\s+)?(async\s+)?fn\s+test_|func\s+Test|@Test\b|(it|test|describe)\s*\()",
            )
            .ok()
        })
        .as_ref()
}

fn assertion_pattern() -> Option<&'static Regex> {
    ASSERTION_PATTERN
        .get_or_init(|| {
            Regex::new(r"\b(assert\w*!?|expect\s*\(|assertEquals|assertThat|should\.)").ok()
        })
        .as_ref()
}

fn identifier_pattern() -> Option<&'static Regex> {
    IDENTIFIER_PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?m)\b(?:let(?:\s+mut)?|var|const|def|fn)\s+([A-Za-z_][A-Za-z0-9_]*)|^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=[^=>]",
            )
            .ok()
        })
        .as_ref()
}

/// Fenced code blocks and whether the final fence was left open.
pub(crate) fn code_blocks(output: &str) -> (Vec<&str>, bool) {
    let mut blocks = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        match body.find("```") {
            Some(end) => {
                blocks.push(&body[..end]);
                rest = &body[end + 3..];
            }
            None => return (blocks, true),
        }
    }
    (blocks, false)
}

/// Text outside code fences.
fn prose(output: &str) -> String {
    output
        .split("```")
        .step_by(2)
        .collect::<Vec<_>>()
        .join("\n")
}

fn looks_like_source(text: &str) -> bool {
    let markers = ["fn ", "def ", "class ", "function ", "import ", "=>", "};", "):"];
    let hits = markers.iter().filter(|m| text.contains(*m)).count();
    hits >= 2 || text.lines().filter(|l| l.trim_end().ends_with(';')).count() >= 3
}

/// Code under inspection: fenced blocks, or the whole output if it reads like source.
fn source_text(output: &str) -> Option<String> {
    let (blocks, _) = code_blocks(output);
    if !blocks.is_empty() {
        return Some(blocks.join("\n"));
    }
    looks_like_source(output).then(|| output.to_string())
}

fn delimiters_balanced(code: &str) -> bool {
    let mut stack = Vec::new();
    for line in code.lines() {
        let line = strip_line_comment(line);
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        for c in line.chars() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }
            match c {
                '"' | '`' => in_string = Some(c),
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    stack.is_empty()
}

fn strip_line_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with('#') {
        ""
    } else {
        line
    }
}

fn todo_markers(text: &str) -> usize {
    text.matches("TODO").count() + text.matches("FIXME").count()
}

fn nesting_depth(code: &str) -> usize {
    let mut depth = 0usize;
    let mut max_brace = 0usize;
    for c in code.chars() {
        match c {
            '{' => {
                depth += 1;
                max_brace = max_brace.max(depth);
            }
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    let max_indent = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let spaces: usize = l
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum();
            spaces / 4
        })
        .max()
        .unwrap_or(0);

    // The enclosing function body is not counted.
    max_brace.max(max_indent).saturating_sub(1)
}

fn is_low_entropy(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if CONVENTIONAL_SHORT.contains(&lower.as_str()) || lower.starts_with('_') {
        return false;
    }
    lower.chars().count() <= 2
        || GENERIC_NAMES.contains(&lower.as_str())
        || (lower.trim_end_matches(|c: char| c.is_ascii_digit()).len() < lower.len()
            && lower.chars().count() <= 4)
}

pub fn syntax_stage(output: &str) -> StageReport {
    let mut report = StageReport::new(Stage::Syntax);
    let mut score: f64 = 1.0;

    let (blocks, unterminated) = code_blocks(output);
    let unbalanced = match source_text(output) {
        Some(_) if !blocks.is_empty() => blocks.iter().filter(|b| !delimiters_balanced(b)).count(),
        Some(code) => usize::from(!delimiters_balanced(&code)),
        None => 0,
    };
    report.detail("code_blocks", blocks.len());
    report.detail("unbalanced_blocks", unbalanced);
    report.detail("unterminated_fence", unterminated);
    if unbalanced > 0 {
        score -= (0.3 * unbalanced as f64).min(0.6);
        report.suggest(format!(
            "Fix unbalanced brackets in {unbalanced} code block(s)"
        ));
    }
    if unterminated {
        score -= 0.2;
        report.suggest("Close the unterminated code fence");
    }

    let todos = todo_markers(output);
    report.detail("todo_markers", todos);
    if todos > 0 {
        score -= (0.1 * todos as f64).min(0.3);
        report.suggest(format!("Resolve {todos} TODO/FIXME marker(s)"));
    }

    let prose_lower = prose(output).to_lowercase();
    let errors: Vec<&str> = ERROR_PHRASES
        .iter()
        .copied()
        .filter(|p| prose_lower.contains(p))
        .collect();
    report.detail("error_keywords", errors.len());
    if !errors.is_empty() {
        score -= (0.15 * errors.len() as f64).min(0.45);
        report.suggest(format!(
            "Address the errors reported in the output ({})",
            errors.join(", ")
        ));
    }

    report.finish(score)
}

pub fn requirements_stage(output: &str, task: &str) -> StageReport {
    let mut report = StageReport::new(Stage::Requirements);
    let mut penalty: f64 = 0.0;
    let lower = output.to_lowercase();

    let bare_stubs = output
        .lines()
        .map(str::trim)
        .filter(|l| *l == "pass" || *l == "...")
        .count();
    let stub_calls: usize = STUB_CALLS.iter().map(|s| lower.matches(s).count()).sum();
    let stubs = bare_stubs + stub_calls;
    report.detail("stub_markers", stubs);
    if stubs > 0 {
        penalty += (0.2 * stubs as f64).min(0.6);
        report.suggest(format!(
            "Replace {stubs} stub placeholder(s) with real implementations"
        ));
    }

    let length = output.trim().chars().count();
    report.detail("length", length);
    if length < SHORT_OUTPUT_CHARS {
        penalty += 0.4;
        report.suggest("Output is very short; provide a complete implementation");
    } else if length < BRIEF_OUTPUT_CHARS {
        penalty += 0.2;
        report.suggest("Output is brief; expand on the requested changes");
    }

    let terms = significant_words(task, 4);
    let missing: Vec<&str> = terms
        .iter()
        .map(String::as_str)
        .filter(|t| !lower.contains(t))
        .collect();
    let coverage = if terms.is_empty() {
        1.0
    } else {
        (terms.len() - missing.len()) as f64 / terms.len() as f64
    };
    report.detail("keyword_coverage", coverage);
    if !missing.is_empty() && coverage < 0.8 {
        let shown: Vec<&str> = missing.iter().copied().take(5).collect();
        report.suggest(format!(
            "Cover task requirements not addressed: {}",
            shown.join(", ")
        ));
    }

    report.finish((1.0 - penalty).max(0.0) * 0.6 + coverage * 0.4)
}

pub fn quality_stage(output: &str) -> StageReport {
    let mut report = StageReport::new(Stage::Quality);
    let mut score: f64 = 0.6;
    let code = source_text(output);
    let text = code.as_deref().unwrap_or(output);
    let lower = text.to_lowercase();

    let handles_errors = count_word_hits(&lower, ERROR_HANDLING) > 0 || text.contains("?;");
    report.detail("error_handling", handles_errors);
    if handles_errors {
        score += 0.2;
    } else {
        report.suggest("Add error handling for failure paths");
    }

    let doc_lines = text
        .lines()
        .map(str::trim_start)
        .filter(|l| {
            l.starts_with("///")
                || l.starts_with("//")
                || l.starts_with("/*")
                || l.starts_with("\"\"\"")
                || l.starts_with("# ")
                || l.starts_with("* ")
        })
        .count();
    report.detail("documentation_lines", doc_lines);
    if doc_lines > 0 {
        score += 0.2;
    } else {
        report.suggest("Document the public functions and non-obvious logic");
    }

    if let Some(code) = code.as_deref() {
        let depth = nesting_depth(code);
        report.detail("nesting_depth", depth);
        if depth > MAX_NESTING {
            score -= (0.1 * (depth - MAX_NESTING) as f64).min(0.3);
            report.suggest(format!(
                "Reduce nesting depth from {depth} to at most {MAX_NESTING}"
            ));
        }

        let names: Vec<&str> = identifier_pattern()
            .map(|re| {
                re.captures_iter(code)
                    .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str()))
                    .filter(|n| !LANGUAGE_KEYWORDS.contains(n))
                    .collect()
            })
            .unwrap_or_default();
        let vague: Vec<&str> = names.iter().copied().filter(|n| is_low_entropy(n)).collect();
        let ratio = if names.is_empty() {
            0.0
        } else {
            vague.len() as f64 / names.len() as f64
        };
        report.detail("vague_identifier_ratio", ratio);
        if ratio > 0.3 {
            score -= 0.2;
        } else if ratio > 0.15 {
            score -= 0.1;
        }
        if ratio > 0.15 {
            let mut shown = vague.clone();
            shown.sort_unstable();
            shown.dedup();
            shown.truncate(5);
            report.suggest(format!("Use descriptive names instead of {}", shown.join(", ")));
        }
    }

    report.finish(score)
}

pub fn testing_stage(output: &str) -> StageReport {
    let mut report = StageReport::new(Stage::Testing);
    let mut score: f64 = 0.0;

    let tests = test_fn_pattern()
        .map(|re| re.find_iter(output).count())
        .unwrap_or(0);
    report.detail("test_functions", tests);
    if tests > 0 {
        score += 0.4;
    } else {
        report.suggest("Add tests covering the new behavior");
    }

    let assertions = assertion_pattern()
        .map(|re| re.find_iter(output).count())
        .unwrap_or(0);
    report.detail("assertions", assertions);
    if assertions > 0 {
        score += 0.3;
    } else {
        report.suggest("Add assertions that check the expected results");
    }

    let edge_terms = count_word_hits(&output.to_lowercase(), EDGE_CASE_TERMS);
    report.detail("edge_case_terms", edge_terms);
    match edge_terms {
        0 => report.suggest("Test edge cases such as empty, invalid and boundary inputs"),
        1 => score += 0.15,
        _ => score += 0.3,
    }

    report.finish(score)
}

/// Run all four stages in order.
pub fn run_stages(output: &str, task: &str) -> Vec<StageReport> {
    vec![
        syntax_stage(output),
        requirements_stage(output, task),
        quality_stage(output),
        testing_stage(output),
    ]
}

/// Weighted sum of stage scores, normalised by the total weight and clamped to `[0, 1]`.
///
/// Out-of-range stage inputs are clamped first, and missing stages count as 0.
pub fn calculate_quality_score(stage_scores: &BTreeMap<String, f64>, weights: &StageWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = Stage::ALL
        .iter()
        .map(|stage| {
            let score = stage_scores
                .get(stage.as_str())
                .copied()
                .filter(|s| s.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            score * stage.weight(weights)
        })
        .sum();
    (weighted / total).clamp(0.0, 1.0)
}
