//! Worker Loop state machine (§4.E): `initializing → analyzing → coding ⇄
//! validating → completed | failed`, enforced as an explicit legal-transition
//! table rather than left to the caller's discipline.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The full phase vocabulary named in the Worker Status data model (§3).
///
/// Only `Initializing`, `Analyzing`, `Coding`, `Validating`, `Completed`, and
/// `Failed` are reachable through [`WorkerStateMachine::advance`] in this
/// implementation — `Testing`, `Optimizing`, and `Deploying` are carried as
/// reserved variants for tool-specific extensions the core loop (§4.E) never
/// itself drives into or out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Initializing,
    Analyzing,
    Coding,
    Testing,
    Optimizing,
    Deploying,
    Validating,
    Completed,
    Failed,
}

impl WorkerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Completed | WorkerPhase::Failed)
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerPhase::Initializing => "initializing",
            WorkerPhase::Analyzing => "analyzing",
            WorkerPhase::Coding => "coding",
            WorkerPhase::Testing => "testing",
            WorkerPhase::Optimizing => "optimizing",
            WorkerPhase::Deploying => "deploying",
            WorkerPhase::Validating => "validating",
            WorkerPhase::Completed => "completed",
            WorkerPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Legal-transition table for the Worker Loop (§4.E):
///
/// ```text
/// initializing → analyzing → coding ⇄ validating
///                                    ↘ completed
///                                    ↘ failed
/// ```
///
/// Any non-terminal phase may transition to `failed` (abort edge); nothing
/// transitions out of a terminal phase.
fn is_legal_transition(from: WorkerPhase, to: WorkerPhase) -> bool {
    use WorkerPhase::*;
    if from.is_terminal() {
        return false;
    }
    if to == Failed {
        return true;
    }
    matches!(
        (from, to),
        (Initializing, Analyzing)
            | (Analyzing, Coding)
            | (Coding, Validating)
            | (Validating, Coding)
            | (Validating, Completed)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkerPhase,
    pub to: WorkerPhase,
    pub iteration: u32,
    pub elapsed_ms: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: WorkerPhase,
    pub to: WorkerPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal worker phase transition: {} -> {}",
            self.from, self.to
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Owns the current phase plus a transition log, mirroring the lineage's
/// typed `StateMachine::advance` shape but remapped onto the Worker Loop's
/// own six reachable phases.
#[derive(Debug, Clone)]
pub struct WorkerStateMachine {
    current: WorkerPhase,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl WorkerStateMachine {
    pub fn new() -> Self {
        Self {
            current: WorkerPhase::Initializing,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkerPhase {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Advance to `to`, rejecting any edge not in the legal-transition table.
    pub fn advance(
        &mut self,
        to: WorkerPhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "worker phase transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Convenience: transition to `Failed` from any non-terminal phase.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkerPhase::Failed, Some(reason))
    }

    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut s = format!(
            "{} -> {} ({}ms, {} transitions)",
            WorkerPhase::Initializing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !path.is_empty() {
            s.push_str(&format!(" [{}]", path.join(" -> ")));
        }
        s
    }
}

impl Default for WorkerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_completed() {
        let mut m = WorkerStateMachine::new();
        m.advance(WorkerPhase::Analyzing, None).unwrap();
        m.advance(WorkerPhase::Coding, None).unwrap();
        m.advance(WorkerPhase::Validating, None).unwrap();
        m.advance(WorkerPhase::Coding, Some("needs another pass"))
            .unwrap();
        m.advance(WorkerPhase::Validating, None).unwrap();
        m.advance(WorkerPhase::Completed, Some("score 95")).unwrap();
        assert_eq!(m.current(), WorkerPhase::Completed);
        assert!(m.is_terminal());
    }

    #[test]
    fn rejects_skipping_analyzing() {
        let mut m = WorkerStateMachine::new();
        let err = m.advance(WorkerPhase::Coding, None).unwrap_err();
        assert_eq!(err.from, WorkerPhase::Initializing);
        assert_eq!(err.to, WorkerPhase::Coding);
    }

    #[test]
    fn rejects_regression_from_validating_to_analyzing() {
        let mut m = WorkerStateMachine::new();
        m.advance(WorkerPhase::Analyzing, None).unwrap();
        m.advance(WorkerPhase::Coding, None).unwrap();
        m.advance(WorkerPhase::Validating, None).unwrap();
        assert!(m.advance(WorkerPhase::Analyzing, None).is_err());
    }

    #[test]
    fn failed_is_reachable_from_any_non_terminal_phase() {
        for phase in [
            WorkerPhase::Initializing,
            WorkerPhase::Analyzing,
            WorkerPhase::Coding,
            WorkerPhase::Validating,
        ] {
            let mut m = WorkerStateMachine::new();
            m.current = phase;
            assert!(m.fail("cancelled").is_ok());
            assert_eq!(m.current(), WorkerPhase::Failed);
        }
    }

    #[test]
    fn nothing_transitions_out_of_a_terminal_phase() {
        let mut m = WorkerStateMachine::new();
        m.fail("boom").unwrap();
        assert!(m.advance(WorkerPhase::Analyzing, None).is_err());
    }
}
