//! Typed error taxonomy for each component boundary (§7). Every variant here
//! is what ends up, verbatim or via `Display`, in the external response
//! envelope's error fields — never a raw internal detail, never credentials.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("no providers configured: add at least one credential")]
    NoProvidersConfigured,
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("model restricted by allowlist: {0}")]
    ModelRestricted(String),
    #[error("\"auto\" must be resolved before reaching the registry")]
    AutoNotResolved,
    #[error("provider unavailable (transient): {0}")]
    ProviderUnavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("thread not found or expired: {0}")]
    ThreadNotFound(String),
    #[error("thread {0} is full ({1} turns)")]
    ThreadFull(String, usize),
    #[error("failed to acquire per-thread lease for {0}")]
    LeaseContended(String),
    #[error("backing store error: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid request: {0:?}")]
    InvalidRequest(Vec<String>),
    #[error("prompt too large: {len} chars exceeds limit of {limit}")]
    PromptTooLarge { len: usize, limit: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("provider call failed (transient): {0}")]
    ProviderUnavailable(String),
    #[error("provider call failed (fatal): {0}")]
    ProviderFatal(String),
}

impl PipelineError {
    /// Stable error-kind tag surfaced to callers (§7), never the Display text.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "InvalidRequest",
            PipelineError::PromptTooLarge { .. } => "PromptTooLarge",
            PipelineError::Registry(RegistryError::UnknownModel(_)) => "UnknownModel",
            PipelineError::Registry(RegistryError::ModelRestricted(_)) => "ModelRestricted",
            PipelineError::Registry(RegistryError::AutoNotResolved) => "AutoNotResolved",
            PipelineError::Registry(_) => "ProviderUnavailable",
            PipelineError::Store(StoreError::ThreadNotFound(_)) => "ThreadNotFound",
            PipelineError::Store(StoreError::ThreadFull(..)) => "ThreadFull",
            PipelineError::Store(_) => "ThreadNotFound",
            PipelineError::ProviderUnavailable(_) => "ProviderUnavailable",
            PipelineError::ProviderFatal(_) => "ProviderFatal",
        }
    }

    /// A human-readable hint where one applies; `None` otherwise.
    pub fn hint(&self) -> Option<String> {
        match self {
            PipelineError::Registry(RegistryError::ModelRestricted(_)) => {
                Some("increase the provider's allowed-models list".to_string())
            }
            PipelineError::Store(StoreError::ThreadNotFound(_)) => {
                Some("try continuation_id=<new>".to_string())
            }
            PipelineError::Store(StoreError::ThreadFull(..)) => {
                Some("start a new thread".to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkerError {
    #[error("illegal phase transition from {from:?} to {to:?}")]
    IllegalTransition { from: String, to: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("worker cancelled")]
    Cancelled,
    #[error("exceeded max iterations ({0})")]
    MaxIterationsExceeded(u32),
    #[error("aborted: consecutive similar failures ({0})")]
    SimilarFailures(u32),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("worker {0} timed out")]
    WorkerTimeout(u32),
    #[error("worker {0} failed: {1}")]
    WorkerFailed(u32, String),
    #[error("run deadline exceeded")]
    RunDeadlineExceeded,
    #[error("port collision at {0}")]
    PortCollision(u16),
}
