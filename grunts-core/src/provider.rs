//! Provider call abstraction. `grunts-core` stays free of any concrete LLM
//! SDK dependency; the orchestrator crate supplies a `rig-core`-backed
//! implementation of this trait.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub enum ProviderCallError {
    /// Transient: network error, 429, 5xx.
    Unavailable(String),
    /// Fatal: 401/403/404 model-not-found, quota.
    Fatal(String),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[(String, String)],
        temperature: f32,
    ) -> Result<Completion, ProviderCallError>;
}
