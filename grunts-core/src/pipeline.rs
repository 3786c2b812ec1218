//! Tool Request Pipeline (§4.D): validate → load context → call provider →
//! append turn → emit continuation offer. Generic over the calling tool;
//! tools differ only in system prompt, schema, and how they fold optional
//! files/images into the user prompt — none of which this module cares
//! about beyond the declared `model_category` and `declares_image_input`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::errors::PipelineError;
use crate::provider::{CompletionProvider, ProviderCallError};
use crate::registry::{ProviderKind, ProviderRegistry};
use crate::store::{ConversationStore, Role, Thread, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCategory {
    Reasoning,
    Fast,
    All,
}

pub struct ToolSpec {
    pub name: String,
    pub system_prompt: String,
    pub model_category: ModelCategory,
    pub declares_image_input: bool,
    pub follow_up_suggestions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub continuation_id: Option<String>,
    pub has_images: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationStats {
    pub total_turns: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationOffer {
    pub thread_id: String,
    pub stats: ContinuationStats,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub content: String,
    pub model_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub continuation_offer: Option<ContinuationOffer>,
}

fn validate_request(request: &ToolRequest) -> Result<(), PipelineError> {
    let mut offenses = Vec::new();
    if request.prompt.trim().is_empty() {
        offenses.push("prompt must not be empty".to_string());
    }
    if let Some(t) = request.temperature {
        if !t.is_finite() {
            offenses.push("temperature must be a finite number".to_string());
        }
    }
    if offenses.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::InvalidRequest(offenses))
    }
}

/// Deterministic "auto" resolution (§4.D step 3): vision model when the
/// tool declares image input and at least one is present; otherwise the
/// highest-priority provider's representative model in the declared
/// category, falling back to `reasoning` when `all` has no native pick.
fn resolve_auto_model(
    config: &Config,
    registry: &ProviderRegistry,
    tool: &ToolSpec,
    request: &ToolRequest,
) -> Result<String, PipelineError> {
    if tool.declares_image_input && request.has_images {
        if let Some(vision) = &config.default_vision_model {
            return Ok(vision.clone());
        }
    }
    let kind = match tool.model_category {
        ModelCategory::Reasoning | ModelCategory::All => ProviderKind::NativeFirstParty,
        ModelCategory::Fast => ProviderKind::CustomEndpoint,
    };
    registry
        .best_of_kind(kind)
        .or_else(|| registry.best_of_kind(ProviderKind::NativeFirstParty))
        .or_else(|| registry.best_of_kind(ProviderKind::Aggregator))
        .ok_or_else(|| PipelineError::InvalidRequest(vec!["no provider available".to_string()]))
}

/// Build the transcript for the provider call, trimming oldest user/
/// assistant pairs (never the system prompt) until it fits `context_window`
/// characters — a conservative proxy for tokens.
fn assemble_context(
    system_prompt: &str,
    thread: Option<&Thread>,
    context_window_chars: usize,
) -> Vec<(String, String)> {
    let mut messages = vec![("system".to_string(), system_prompt.to_string())];
    let Some(thread) = thread else {
        return messages;
    };
    let mut pairs: Vec<(String, String)> = thread
        .turns
        .iter()
        .map(|t| {
            let role = match t.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            (role.to_string(), t.content.clone())
        })
        .collect();

    let system_len = system_prompt.len();
    loop {
        let total_len: usize = system_len + pairs.iter().map(|(_, c)| c.len()).sum::<usize>();
        if total_len <= context_window_chars || pairs.len() <= 2 {
            break;
        }
        // Drop the oldest pair (two messages: user then assistant).
        pairs.drain(0..2.min(pairs.len()));
    }
    messages.extend(pairs);
    messages
}

const MAX_RETRIES: u32 = 2;

async fn call_with_retry(
    provider: &dyn CompletionProvider,
    model: &str,
    system_prompt: &str,
    messages: &[(String, String)],
    temperature: f32,
) -> Result<crate::provider::Completion, PipelineError> {
    let mut attempt = 0;
    loop {
        match provider
            .complete(model, system_prompt, messages, temperature)
            .await
        {
            Ok(completion) => return Ok(completion),
            Err(ProviderCallError::Fatal(msg)) => return Err(PipelineError::ProviderFatal(msg)),
            Err(ProviderCallError::Unavailable(msg)) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(PipelineError::ProviderUnavailable(msg));
                }
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

pub struct ToolRequestPipeline<'a> {
    pub config: &'a Config,
    pub registry: &'a ProviderRegistry,
    pub store: &'a dyn ConversationStore,
    pub provider: &'a dyn CompletionProvider,
}

impl<'a> ToolRequestPipeline<'a> {
    pub async fn handle(
        &self,
        tool: &ToolSpec,
        request: ToolRequest,
    ) -> Result<PipelineResponse, PipelineError> {
        validate_request(&request)?;

        if request.prompt.len() > self.config.prompt_size_limit {
            return Err(PipelineError::PromptTooLarge {
                len: request.prompt.len(),
                limit: self.config.prompt_size_limit,
            });
        }

        let model_name = match &request.model {
            Some(m) if !m.eq_ignore_ascii_case("auto") => m.clone(),
            _ => resolve_auto_model(self.config, self.registry, tool, &request)?,
        };
        let capabilities = self.registry.get_provider_for_model(&model_name)?;

        let (temperature, warning) = capabilities
            .temperature_constraint
            .resolve(request.temperature);
        if let Some(warning) = warning {
            tracing::warn!(model = %capabilities.model_name, %warning, "temperature corrected");
        }

        let existing_thread = match &request.continuation_id {
            Some(id) => Some(
                self.store
                    .get_thread(id)
                    .await?
                    .ok_or_else(|| crate::errors::StoreError::ThreadNotFound(id.clone()))?,
            ),
            None => None,
        };

        let messages = assemble_context(
            &tool.system_prompt,
            existing_thread.as_ref(),
            capabilities.context_window as usize,
        );

        let completion = call_with_retry(
            self.provider,
            &capabilities.model_name,
            &tool.system_prompt,
            &messages,
            temperature,
        )
        .await;

        let completion = match completion {
            Ok(c) => {
                self.registry.record_success(&capabilities.model_name);
                c
            }
            Err(e) => {
                self.registry.record_failure(&capabilities.model_name);
                return Err(e);
            }
        };

        let thread_id = match &request.continuation_id {
            Some(id) => id.clone(),
            None => {
                self.store
                    .create_thread(&tool.name, std::collections::HashMap::new())
                    .await?
            }
        };

        self.store
            .append_turn(&thread_id, Turn::user(&request.prompt, completion.input_tokens))
            .await?;
        let append_result = self
            .store
            .append_turn(
                &thread_id,
                Turn::assistant(
                    &completion.text,
                    &tool.name,
                    &capabilities.model_name,
                    completion.output_tokens,
                ),
            )
            .await;

        let continuation_offer = match append_result {
            Ok(()) => {
                let stats = self.store.stats(&thread_id).await?;
                if stats.turns < self.config.max_conversation_turns {
                    Some(ContinuationOffer {
                        thread_id: thread_id.clone(),
                        stats: ContinuationStats {
                            total_turns: stats.turns,
                            total_input_tokens: stats.input_tokens,
                            total_output_tokens: stats.output_tokens,
                        },
                        suggestions: tool.follow_up_suggestions.clone(),
                    })
                } else {
                    None
                }
            }
            Err(_) => None,
        };

        Ok(PipelineResponse {
            content: completion.text,
            model_used: capabilities.model_name,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            continuation_offer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelCapabilities, ProviderEntry, ProviderHealth, RestrictionPolicy, TemperatureConstraint};
    use crate::store::{InMemoryConversationStore, StoreLimits};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn complete(
            &self,
            _model: &str,
            _system_prompt: &str,
            messages: &[(String, String)],
            _temperature: f32,
        ) -> Result<crate::provider::Completion, ProviderCallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(ProviderCallError::Unavailable("timeout".to_string()));
            }
            Ok(crate::provider::Completion {
                text: format!("echo:{}", messages.len()),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn entry() -> ProviderEntry {
        ProviderEntry {
            kind: ProviderKind::NativeFirstParty,
            capabilities: ModelCapabilities {
                model_name: "gpt-5".to_string(),
                friendly_name: "GPT-5".to_string(),
                context_window: 128_000,
                supports_extended_thinking: false,
                supports_system_prompts: true,
                supports_streaming: true,
                supports_json_mode: true,
                supports_function_calling: true,
                supports_images: false,
                max_image_mb: 0,
                temperature_constraint: TemperatureConstraint::Range {
                    lo: 0.0,
                    hi: 2.0,
                    default: 0.7,
                },
            },
            aliases: vec![],
            health: ProviderHealth::healthy(),
        }
    }

    fn tool() -> ToolSpec {
        ToolSpec {
            name: "chat".to_string(),
            system_prompt: "you are a helpful assistant".to_string(),
            model_category: ModelCategory::All,
            declares_image_input: false,
            follow_up_suggestions: vec!["ask a follow up".to_string()],
        }
    }

    #[tokio::test]
    async fn fresh_chat_returns_continuation_offer_with_two_turns() {
        let config = Config::default();
        let registry = ProviderRegistry::new();
        registry
            .initialize(vec![entry()], RestrictionPolicy::new())
            .await
            .unwrap();
        let store = InMemoryConversationStore::new(StoreLimits {
            max_turns: 20,
            ttl_seconds: 3 * 3600,
        });
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        };
        let pipeline = ToolRequestPipeline {
            config: &config,
            registry: &registry,
            store: &store,
            provider: &provider,
        };
        let response = pipeline
            .handle(
                &tool(),
                ToolRequest {
                    prompt: "Hello".to_string(),
                    model: Some("gpt-5".to_string()),
                    temperature: None,
                    continuation_id: None,
                    has_images: false,
                },
            )
            .await
            .unwrap();
        let offer = response.continuation_offer.unwrap();
        assert_eq!(offer.stats.total_turns, 2);
    }

    #[tokio::test]
    async fn prompt_too_large_is_rejected() {
        let config = Config {
            prompt_size_limit: 10,
            ..Config::default()
        };
        let registry = ProviderRegistry::new();
        registry
            .initialize(vec![entry()], RestrictionPolicy::new())
            .await
            .unwrap();
        let store = InMemoryConversationStore::new(StoreLimits {
            max_turns: 20,
            ttl_seconds: 3 * 3600,
        });
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        };
        let pipeline = ToolRequestPipeline {
            config: &config,
            registry: &registry,
            store: &store,
            provider: &provider,
        };
        let err = pipeline
            .handle(
                &tool(),
                ToolRequest {
                    prompt: "this prompt is too long".to_string(),
                    model: Some("gpt-5".to_string()),
                    temperature: None,
                    continuation_id: None,
                    has_images: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PromptTooLarge { .. }));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let config = Config::default();
        let registry = ProviderRegistry::new();
        registry
            .initialize(vec![entry()], RestrictionPolicy::new())
            .await
            .unwrap();
        let store = InMemoryConversationStore::new(StoreLimits {
            max_turns: 20,
            ttl_seconds: 3 * 3600,
        });
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
            fail_times: 2,
        };
        let pipeline = ToolRequestPipeline {
            config: &config,
            registry: &registry,
            store: &store,
            provider: &provider,
        };
        let response = pipeline
            .handle(
                &tool(),
                ToolRequest {
                    prompt: "Hello".to_string(),
                    model: Some("gpt-5".to_string()),
                    temperature: None,
                    continuation_id: None,
                    has_images: false,
                },
            )
            .await
            .unwrap();
        assert!(response.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn continuation_reuses_the_existing_thread() {
        let config = Config::default();
        let registry = ProviderRegistry::new();
        registry
            .initialize(vec![entry()], RestrictionPolicy::new())
            .await
            .unwrap();
        let store = InMemoryConversationStore::new(StoreLimits {
            max_turns: 20,
            ttl_seconds: 3 * 3600,
        });
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        };
        let pipeline = ToolRequestPipeline {
            config: &config,
            registry: &registry,
            store: &store,
            provider: &provider,
        };
        let first = pipeline
            .handle(
                &tool(),
                ToolRequest {
                    prompt: "Hello".to_string(),
                    model: Some("gpt-5".to_string()),
                    temperature: None,
                    continuation_id: None,
                    has_images: false,
                },
            )
            .await
            .unwrap();
        let thread_id = first.continuation_offer.unwrap().thread_id;
        let second = pipeline
            .handle(
                &tool(),
                ToolRequest {
                    prompt: "Follow up".to_string(),
                    model: Some("gpt-5".to_string()),
                    temperature: None,
                    continuation_id: Some(thread_id),
                    has_images: false,
                },
            )
            .await
            .unwrap();
        let offer = second.continuation_offer.unwrap();
        assert_eq!(offer.stats.total_turns, 4);
    }
}
