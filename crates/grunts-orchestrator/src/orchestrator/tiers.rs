//! Tier Profile table (§3, §4.F "Tier selection"). A tier name resolves to
//! an ordered, immutable list of worker templates; an unknown tier falls
//! back to `medium`, never errors.

use serde::{Deserialize, Serialize};

/// One worker's static shape before launch-time assignment of `worker_id`,
/// `port`, and `workspace_dir` — those are filled in by the lifecycle once
/// a concrete Orchestration Run exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTemplate {
    pub specialization_tag: String,
    pub model_name: String,
    pub fallback_model_name: String,
    pub max_iterations: u32,
}

/// Every recognized tier name, `medium` included, for callers that need to
/// enumerate the full candidate-model universe (e.g. Registry bootstrap).
pub const TIER_NAMES: [&str; 4] = ["ultralight", "light", "medium", "high"];

fn template(tag: &str, model: &str, fallback: &str) -> WorkerTemplate {
    WorkerTemplate {
        specialization_tag: tag.to_string(),
        model_name: model.to_string(),
        fallback_model_name: fallback.to_string(),
        max_iterations: 10,
    }
}

/// Resolve a tier name to its worker templates. Unknown tier → `medium`.
pub fn tier_profile(tier: &str) -> Vec<WorkerTemplate> {
    match tier.to_ascii_lowercase().as_str() {
        "ultralight" => vec![
            template("frontend", "gpt-5-mini", "gpt-5-nano"),
            template("backend", "gpt-5-mini", "gpt-5-nano"),
        ],
        "light" => vec![
            template("frontend", "gpt-5", "gpt-5-mini"),
            template("backend", "gpt-5", "gpt-5-mini"),
            template("tests", "gpt-5-mini", "gpt-5-nano"),
        ],
        "high" => vec![
            template("frontend", "gpt-5", "gpt-5-mini"),
            template("backend", "gpt-5", "gpt-5-mini"),
            template("api", "gpt-5", "gpt-5-mini"),
            template("tests", "gpt-5-mini", "gpt-5-nano"),
            template("docs", "gpt-5-mini", "gpt-5-nano"),
            template("devops", "gpt-5-mini", "gpt-5-nano"),
        ],
        // "medium" and anything unrecognized.
        _ => vec![
            template("frontend", "gpt-5", "gpt-5-mini"),
            template("backend", "gpt-5", "gpt-5-mini"),
            template("tests", "gpt-5-mini", "gpt-5-nano"),
            template("docs", "gpt-5-mini", "gpt-5-nano"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ultralight_launches_exactly_two_workers() {
        assert_eq!(tier_profile("ultralight").len(), 2);
    }

    #[test]
    fn unknown_tier_falls_back_to_medium() {
        assert_eq!(tier_profile("nonsense"), tier_profile("medium"));
    }

    #[test]
    fn tier_lookup_is_case_insensitive() {
        assert_eq!(tier_profile("HIGH").len(), tier_profile("high").len());
    }
}
