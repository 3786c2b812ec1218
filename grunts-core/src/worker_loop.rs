//! Worker Loop iteration accounting and abort-trigger engine (§4.E).
//!
//! Adapts the deterministic-trigger shape of a cross-tier escalation engine
//! down to a single worker's continue/complete/abort decision: there is no
//! escalation to another tier here, only "keep iterating", "accept this
//! candidate", or "give up with a reason".

use serde::{Deserialize, Serialize};

use crate::scorer::ScoreResult;
use crate::similarity::similarity;

pub const EXCELLENT_THRESHOLD: u8 = 90;
pub const SIMILARITY_THRESHOLD: f64 = 0.80;
pub const SIMILARITY_ABORT_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbortReason {
    MaxIterationsExceeded,
    SimilarConsecutiveFailures,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopDecision {
    Continue,
    Complete,
    Abort(AbortReason),
}

/// Running state of one worker's generate/validate loop. Owned and mutated
/// only by the worker itself, per the Status Plane's single-writer rule.
#[derive(Debug, Clone)]
pub struct WorkerLoopState {
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub best_score: u8,
    pub best_code: String,
    pub consecutive_failures: u32,
    pub observed_issue_texts: Vec<String>,
}

impl WorkerLoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            current_iteration: 0,
            max_iterations,
            best_score: 0,
            best_code: String::new(),
            consecutive_failures: 0,
            observed_issue_texts: Vec::new(),
        }
    }

    fn issue_text(result: &ScoreResult) -> String {
        result
            .issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn is_similar_to_any_previous(&self, issue_text: &str) -> bool {
        self.observed_issue_texts
            .iter()
            .any(|prev| similarity(prev, issue_text) >= SIMILARITY_THRESHOLD)
    }

    /// Record one iteration's result and decide the next edge. Mutates
    /// `best_score`/`best_code`/`consecutive_failures` per §4.E's iteration
    /// accounting rules, then evaluates completion and abort edges in order.
    pub fn record_iteration(&mut self, cancelled: bool, result: &ScoreResult) -> LoopDecision {
        self.current_iteration += 1;

        let issue_text = Self::issue_text(result);
        let improved = result.score > self.best_score;
        // A "failure" toward the abort counter is no score improvement AND
        // the issue text being similar to one already seen — a genuinely
        // novel issue, even without improvement, doesn't count as stalling.
        let similar_failure =
            !improved && !issue_text.is_empty() && self.is_similar_to_any_previous(&issue_text);

        if improved {
            self.best_score = result.score;
            self.best_code = result.cleaned_code.clone();
            self.consecutive_failures = 0;
        } else if similar_failure {
            self.consecutive_failures += 1;
        }
        if !issue_text.is_empty() {
            self.observed_issue_texts.push(issue_text);
        }

        if cancelled {
            return LoopDecision::Abort(AbortReason::Cancelled);
        }
        if result.score >= EXCELLENT_THRESHOLD {
            return LoopDecision::Complete;
        }
        if self.current_iteration >= self.max_iterations {
            return LoopDecision::Abort(AbortReason::MaxIterationsExceeded);
        }
        if self.consecutive_failures >= SIMILARITY_ABORT_THRESHOLD {
            return LoopDecision::Abort(AbortReason::SimilarConsecutiveFailures);
        }
        LoopDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::Issue;

    fn result_with_score(score: u8, issue: &str) -> ScoreResult {
        ScoreResult {
            score,
            cleaned_code: format!("code-{score}"),
            issues: vec![Issue {
                code: "x".to_string(),
                message: issue.to_string(),
            }],
            feedback: vec![],
        }
    }

    #[test]
    fn best_score_is_non_decreasing_across_iterations() {
        let mut state = WorkerLoopState::new(10);
        state.record_iteration(false, &result_with_score(10, "a"));
        state.record_iteration(false, &result_with_score(40, "b"));
        assert_eq!(state.best_score, 40);
        state.record_iteration(false, &result_with_score(20, "c"));
        assert_eq!(state.best_score, 40);
    }

    #[test]
    fn completes_once_score_crosses_excellent_threshold() {
        let mut state = WorkerLoopState::new(10);
        let decision = state.record_iteration(false, &result_with_score(95, "none"));
        assert_eq!(decision, LoopDecision::Complete);
    }

    #[test]
    fn aborts_after_max_iterations() {
        let mut state = WorkerLoopState::new(2);
        state.record_iteration(false, &result_with_score(10, "a"));
        let decision = state.record_iteration(false, &result_with_score(5, "b"));
        assert_eq!(decision, LoopDecision::Abort(AbortReason::MaxIterationsExceeded));
    }

    #[test]
    fn aborts_after_similarity_threshold_consecutive_failures() {
        let mut state = WorkerLoopState::new(100);
        let mut last = LoopDecision::Continue;
        for _ in 0..10 {
            last = state.record_iteration(false, &result_with_score(10, "syntax error at line 4"));
        }
        assert_eq!(
            last,
            LoopDecision::Abort(AbortReason::SimilarConsecutiveFailures)
        );
        assert_eq!(state.consecutive_failures, 10);
    }

    #[test]
    fn nine_similar_failures_then_a_tenth_crosses_to_abort() {
        let mut state = WorkerLoopState::new(100);
        for _ in 0..9 {
            let d = state.record_iteration(false, &result_with_score(10, "missing semicolon"));
            assert_ne!(d, LoopDecision::Abort(AbortReason::SimilarConsecutiveFailures));
        }
        assert_eq!(state.consecutive_failures, 9);
        let d = state.record_iteration(false, &result_with_score(10, "missing semicolon"));
        assert_eq!(d, LoopDecision::Abort(AbortReason::SimilarConsecutiveFailures));
    }

    #[test]
    fn cancellation_aborts_immediately() {
        let mut state = WorkerLoopState::new(10);
        let decision = state.record_iteration(true, &result_with_score(50, "irrelevant"));
        assert_eq!(decision, LoopDecision::Abort(AbortReason::Cancelled));
    }
}
