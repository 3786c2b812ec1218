//! Declarative, deterministic scoring rubric for a Worker Loop candidate
//! (§4.E). Pure function of the candidate text and task prompt: no network
//! calls, no randomness.

use serde::{Deserialize, Serialize};

const DOMAIN_KEYWORDS: &[&str] = &["phaser", "game"];
const CODE_INTRODUCERS: &[&str] = &[
    "class ", "function ", "const ", "let ", "var ", "def ", "fn ", "import ", "export ",
];
const REQUIRED_LIFECYCLE_METHODS: &[&str] = &["preload", "create", "update"];
const ANTI_PATTERN_CDN: &[&str] = &["cdn.jsdelivr", "unpkg.com", "<script src=\"http"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub cleaned_code: String,
    pub issues: Vec<Issue>,
    pub feedback: Vec<String>,
}

/// Extract the inner body of the first fenced code block, if any.
fn strip_markdown(candidate: &str) -> String {
    if let Some(start) = candidate.find("```") {
        let after_fence = &candidate[start + 3..];
        // Skip an optional language tag up to the first newline.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
        return body.trim().to_string();
    }
    candidate.trim().to_string()
}

fn is_code(cleaned: &str) -> bool {
    let lower = cleaned.to_ascii_lowercase();
    CODE_INTRODUCERS.iter().any(|tok| lower.contains(tok))
}

fn matches_domain(task_prompt: &str) -> bool {
    let lower = task_prompt.to_ascii_lowercase();
    DOMAIN_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn domain_score(cleaned: &str, issues: &mut Vec<Issue>) -> i32 {
    let lower = cleaned.to_ascii_lowercase();
    let mut score = 0;

    // (a) proper module-system imports, up to +20.
    if lower.contains("import ") || lower.contains("export ") {
        score += 20;
    } else {
        issues.push(Issue {
            code: "missing_module_imports".to_string(),
            message: "no ES module import/export found".to_string(),
        });
    }

    // (b) required lifecycle methods present, up to +20.
    let present = REQUIRED_LIFECYCLE_METHODS
        .iter()
        .filter(|m| lower.contains(&format!("{m}(")) || lower.contains(&format!("{m} (")))
        .count();
    score += (present as i32 * 20 / REQUIRED_LIFECYCLE_METHODS.len() as i32).min(20);
    if present < REQUIRED_LIFECYCLE_METHODS.len() {
        issues.push(Issue {
            code: "missing_lifecycle_methods".to_string(),
            message: format!(
                "missing {} of the required lifecycle methods",
                REQUIRED_LIFECYCLE_METHODS.len() - present
            ),
        });
    }

    // (c) physics/input scaffolding, up to +10.
    if lower.contains("physics") || lower.contains("this.input") || lower.contains("cursor") {
        score += 10;
    }

    // Anti-pattern deductions.
    if ANTI_PATTERN_CDN.iter().any(|p| lower.contains(p)) {
        score -= 15;
        issues.push(Issue {
            code: "cdn_usage".to_string(),
            message: "loads dependencies from a CDN instead of the module system".to_string(),
        });
    }
    if lower.contains("function exportmodule") || lower.contains("window.exports") {
        score -= 15;
        issues.push(Issue {
            code: "wrapper_export".to_string(),
            message: "uses a wrapper-function export instead of a module export".to_string(),
        });
    }

    score.clamp(-30, 50)
}

/// Best-effort syntax check: balanced braces/parens/brackets and no stray
/// markdown fences left in the body. Stands in for a real language parser
/// since the scorer must stay deterministic and dependency-free here.
fn syntax_parses(cleaned: &str, issues: &mut Vec<Issue>) -> bool {
    let mut stack = Vec::new();
    for c in cleaned.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    issues.push(Issue {
                        code: "syntax_error".to_string(),
                        message: "unbalanced parenthesis".to_string(),
                    });
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    issues.push(Issue {
                        code: "syntax_error".to_string(),
                        message: "unbalanced bracket".to_string(),
                    });
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    issues.push(Issue {
                        code: "syntax_error".to_string(),
                        message: "unbalanced brace".to_string(),
                    });
                    return false;
                }
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        issues.push(Issue {
            code: "syntax_error".to_string(),
            message: "unclosed bracket/brace/parenthesis".to_string(),
        });
        return false;
    }
    true
}

struct StructuralTest {
    name: &'static str,
    check: fn(&str) -> bool,
}

const STRUCTURAL_TESTS: &[StructuralTest] = &[
    StructuralTest {
        name: "has_required_exports",
        check: |c| c.to_ascii_lowercase().contains("export"),
    },
    StructuralTest {
        name: "no_markdown_residue",
        check: |c| !c.contains("```"),
    },
    StructuralTest {
        name: "uses_module_imports",
        check: |c| c.to_ascii_lowercase().contains("import "),
    },
    StructuralTest {
        name: "nonempty_body",
        check: |c| c.trim().len() > 10,
    },
];

/// Score a candidate against a task prompt, per the §4.E rubric. Clamped to
/// `[0, 100]`.
pub fn score(candidate: &str, task_prompt: &str) -> ScoreResult {
    let cleaned = strip_markdown(candidate);
    let mut issues = Vec::new();
    let mut feedback = Vec::new();
    let mut total: i32 = 0;

    if cleaned.is_empty() || !is_code(&cleaned) && strip_code_tokens(&cleaned).is_empty() {
        return ScoreResult {
            score: 0,
            cleaned_code: cleaned,
            issues: vec![Issue {
                code: "no_code".to_string(),
                message: "no code-like tokens found after stripping markdown".to_string(),
            }],
            feedback: vec!["response did not contain any code".to_string()],
        };
    }

    if is_code(&cleaned) {
        total += 15;
    } else {
        issues.push(Issue {
            code: "not_code".to_string(),
            message: "no declarative code introducers (class/function/const/let/...) found"
                .to_string(),
        });
    }

    if matches_domain(task_prompt) {
        total += domain_score(&cleaned, &mut issues);
    }

    if syntax_parses(&cleaned, &mut issues) {
        total += 15;
    }

    if total >= 40 {
        let passed = STRUCTURAL_TESTS
            .iter()
            .filter(|t| (t.check)(&cleaned))
            .count();
        total += (passed as i32 * 5).min(20);
        for t in STRUCTURAL_TESTS.iter().filter(|t| !(t.check)(&cleaned)) {
            feedback.push(format!("failed structural test: {}", t.name));
        }
    }

    let score = total.clamp(0, 100) as u8;
    for issue in &issues {
        feedback.push(issue.message.clone());
    }

    ScoreResult {
        score,
        cleaned_code: cleaned,
        issues,
        feedback,
    }
}

fn strip_code_tokens(cleaned: &str) -> String {
    // Conservative fallback: anything with typical source punctuation
    // counts as "code-like" even without a recognized introducer keyword.
    let has_punct = cleaned.contains('{') || cleaned.contains(';') || cleaned.contains("=>");
    if has_punct {
        cleaned.to_string()
    } else {
        String::new()
    }
}

/// Build the next iteration's prompt by appending structured feedback,
/// trimming the oldest feedback block once within 20% of `context_window`
/// characters (a conservative proxy for tokens).
pub fn append_feedback(
    base_prompt: &str,
    previous_feedback_blocks: &mut Vec<String>,
    result: &ScoreResult,
    context_window_chars: usize,
) -> String {
    let issues_text = result
        .issues
        .iter()
        .map(|i| format!("- {}", i.message))
        .collect::<Vec<_>>()
        .join("\n");
    let block = format!(
        "\nPREVIOUS ATTEMPT FEEDBACK (score {}):\nISSUES:\n{}\nFIX THESE ISSUES IN THE NEXT ATTEMPT.\n",
        result.score, issues_text
    );
    previous_feedback_blocks.push(block);

    let threshold = context_window_chars * 8 / 10; // within 20% of the window
    loop {
        let total_len: usize =
            base_prompt.len() + previous_feedback_blocks.iter().map(|b| b.len()).sum::<usize>();
        if total_len <= threshold || previous_feedback_blocks.len() <= 1 {
            break;
        }
        previous_feedback_blocks.remove(0);
    }

    let mut prompt = base_prompt.to_string();
    for block in previous_feedback_blocks.iter() {
        prompt.push_str(block);
    }
    prompt
}
