//! Task decomposition (§4.F): a pure, deterministic function of the task
//! prompt, the declared technologies, and the specialization tags a tier
//! assigns. Tool-specific decomposition heuristics live above this crate;
//! this is just the shared shape every tool-layer caller can rely on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub specialization_tag: String,
    pub prompt: String,
    pub test_intents: Vec<String>,
}

/// One subtask per specialization tag, each carrying the same base prompt
/// and declared technologies plus a tag-specific framing and test-intent
/// list. Length-one decomposition (a single tag) is the degenerate case,
/// not a special path.
pub fn decompose(base_prompt: &str, technologies: &[String], tags: &[String]) -> Vec<Subtask> {
    let trimmed = base_prompt.trim();
    tags.iter()
        .map(|tag| {
            let mut prompt = format!("[{tag}] {trimmed}");
            if !technologies.is_empty() {
                prompt.push_str(&format!("\nTechnologies: {}", technologies.join(", ")));
            }
            Subtask {
                specialization_tag: tag.clone(),
                prompt,
                test_intents: test_intents_for(tag, technologies),
            }
        })
        .collect()
}

fn test_intents_for(tag: &str, technologies: &[String]) -> Vec<String> {
    let mut intents = match tag {
        "frontend" => vec![
            "renders without a runtime error".to_string(),
            "exposes the documented UI entry point".to_string(),
        ],
        "backend" | "api" => vec![
            "exposes the documented API endpoints".to_string(),
            "returns a well-formed response for the happy path".to_string(),
        ],
        "tests" => vec!["covers the primary user-facing behavior".to_string()],
        "docs" => vec!["documents setup and usage instructions".to_string()],
        "devops" => vec!["provides a working start script".to_string()],
        other => vec![format!("implements the {other} facet of the task")],
    };
    for tech in technologies {
        intents.push(format!("integrates with {tech} as declared"));
    }
    intents
}
