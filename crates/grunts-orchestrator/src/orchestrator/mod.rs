//! The `grunts-orchestrator` binary's logic: tier resolution, task
//! decomposition, worker-pool lifecycle, and the read-only `GET /run`
//! dashboard feed (§4.F, §4.G).

pub mod decompose;
pub mod http;
pub mod lifecycle;
pub mod tiers;

pub use decompose::{decompose, Subtask};
pub use http::{router, OrchestratorHttpState};
pub use lifecycle::{candidate_entries, run_to_completion, RunHandle, RunRequest, RunResult, RunSnapshot, WorkerView};
pub use tiers::{tier_profile, WorkerTemplate, TIER_NAMES};
