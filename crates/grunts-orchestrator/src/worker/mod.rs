//! The `grunts-worker` binary's logic: state machine, prompt assembly, the
//! generate/validate driver loop, and the HTTP Status Plane (§4.E, §4.G).

pub mod artifact;
pub mod driver;
pub mod http;
pub mod prompts;
pub mod state_machine;

pub use artifact::{write_completion_artifact, CompletionArtifact};
pub use driver::{CancelSignal, StatusSink, WorkerDriver, WorkerOutcome};
pub use http::{WorkerHttpState, WorkerLaunchSpec, WorkerStatusView};
pub use prompts::{build_system_prompt, next_iteration_prompt, PromptContext};
pub use state_machine::{IllegalTransition, TransitionRecord, WorkerPhase, WorkerStateMachine};
