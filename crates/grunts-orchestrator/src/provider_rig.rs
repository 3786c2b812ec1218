//! `rig-core`-backed implementation of `grunts_core::CompletionProvider`.
//!
//! All three provider kinds in the Registry (§4.A) speak the OpenAI-
//! compatible chat protocol from the client's point of view — native,
//! custom endpoint, and aggregator differ only in base URL and credential —
//! so one `rig::providers::openai::CompletionsClient` per kind covers all of
//! them, the same way the lineage builds one client per inference endpoint
//! rather than per model.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{Chat, Message};
use rig::providers::openai;

use grunts_core::provider::{Completion, ProviderCallError};
use grunts_core::CompletionProvider;

/// One client per credential/base-URL pair. Built once at startup from
/// `Config` and shared (cheaply cloned, matching §5's "`reqwest::Client`
/// cloned cheaply" resource policy) across every worker's pipeline calls.
pub struct RigCompletionProvider {
    client: openai::CompletionsClient,
}

impl RigCompletionProvider {
    pub fn new(api_key: &str, base_url: &str) -> anyhow::Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(api_key)
            .base_url(base_url)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build rig client for {base_url}: {e}"))?;
        Ok(Self { client })
    }
}

fn classify_error(message: &str) -> ProviderCallError {
    let lower = message.to_ascii_lowercase();
    let transient = lower.contains("502")
        || lower.contains("503")
        || lower.contains("429")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("timeout");
    if transient {
        ProviderCallError::Unavailable(message.to_string())
    } else {
        ProviderCallError::Fatal(message.to_string())
    }
}

#[async_trait]
impl CompletionProvider for RigCompletionProvider {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[(String, String)],
        temperature: f32,
    ) -> Result<Completion, ProviderCallError> {
        let agent = self
            .client
            .agent(model)
            .preamble(system_prompt)
            .temperature(temperature as f64)
            .build();

        // `messages` is the §4.D assembled transcript: `("system", ...)`
        // first (already carried in `preamble` above, so skipped here),
        // then alternating user/assistant pairs. The final user turn is
        // the live prompt; everything before it is chat history.
        let mut history: Vec<Message> = Vec::new();
        let mut last_user: Option<String> = None;
        for (role, content) in messages {
            match role.as_str() {
                "system" => continue,
                "user" => {
                    if let Some(prev) = last_user.take() {
                        history.push(Message::user(prev));
                    }
                    last_user = Some(content.clone());
                }
                "assistant" => {
                    if let Some(prev) = last_user.take() {
                        history.push(Message::user(prev));
                    }
                    history.push(Message::assistant(content.clone()));
                }
                _ => {}
            }
        }
        let prompt = last_user.unwrap_or_default();

        let input_chars: usize = system_prompt.len() + prompt.len();

        let response = agent
            .chat(&prompt, history)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        // rig's `Chat::chat` returns plain text, not token usage; approximate
        // token counts from character length (4 chars/token, the same rough
        // ratio the lineage's own prompt-size budgeting uses elsewhere).
        Ok(Completion {
            output_tokens: (response.len() / 4).max(1) as u32,
            input_tokens: (input_chars / 4).max(1) as u32,
            text: response,
        })
    }
}
