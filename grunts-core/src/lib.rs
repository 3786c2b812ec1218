//! Grunts core library
//!
//! Domain-agnostic primitives backing the Grunts swarm: the Provider
//! Registry and temperature-constraint enforcement, the Redis-backed
//! Conversation Store, the declarative Worker Loop scorer and abort-trigger
//! engine, the Tool Request Pipeline, and shared configuration/error types.
//! Consumed by the `grunts-orchestrator` crate's worker and orchestrator
//! binaries.

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod errors;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod scorer;
pub mod similarity;
pub mod store;
pub mod worker_loop;

// Re-export provider registry types
pub use registry::{
    ModelCapabilities, ProviderEntry, ProviderHealth, ProviderKind, ProviderRegistry,
    RestrictionPolicy, TemperatureConstraint,
};

// Re-export conversation store types
pub use store::{ConversationStore, InMemoryConversationStore, RedisConversationStore, Role,
    StoreLimits, Thread, ThreadStats, Turn};

// Re-export error types
pub use errors::{OrchestratorError, PipelineError, RegistryError, StoreError, WorkerError};

// Re-export scorer and worker-loop types
pub use config::Config;
pub use scorer::{score, Issue, ScoreResult};
pub use similarity::similarity;
pub use worker_loop::{AbortReason, LoopDecision, WorkerLoopState};

// Re-export pipeline types
pub use pipeline::{
    ContinuationOffer, ContinuationStats, ModelCategory, PipelineResponse, ToolRequest,
    ToolRequestPipeline, ToolSpec,
};
pub use provider::{CompletionProvider, Completion, ProviderCallError};
