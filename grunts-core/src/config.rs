//! Process-wide, read-only configuration loaded once from the environment.
//!
//! Mirrors the lineage's `SwarmConfig::default()` pattern: every tunable has
//! a documented fallback so the system runs with zero configuration in a
//! local dev loop, and is passed by value/reference into every entry point
//! rather than read from a mutable global.

use std::env;

use crate::store::StoreLimits;

#[derive(Debug, Clone)]
pub struct Config {
    pub default_model: String,
    pub default_vision_model: Option<String>,
    pub conversation_timeout_hours: u64,
    pub max_conversation_turns: usize,
    pub prompt_size_limit: usize,
    pub workspace_dir: String,
    pub redis_url: String,
    pub base_port: u16,
    pub openai_allowed_models: Option<Vec<String>>,
    pub google_allowed_models: Option<Vec<String>>,
    pub openrouter_allowed_models: Option<Vec<String>>,
    pub custom_allowed_models: Option<Vec<String>>,
    pub custom_endpoint_url: Option<String>,
    pub openrouter_endpoint_url: Option<String>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_var(key).map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: env_var("DEFAULT_MODEL").unwrap_or_else(|| "auto".to_string()),
            default_vision_model: env_var("DEFAULT_VISION_MODEL"),
            conversation_timeout_hours: env_u64("CONVERSATION_TIMEOUT_HOURS", 3),
            max_conversation_turns: env_usize("MAX_CONVERSATION_TURNS", 20),
            prompt_size_limit: env_usize("PROMPT_SIZE_LIMIT", 50_000),
            workspace_dir: env_var("WORKSPACE_DIR").unwrap_or_else(|| "/tmp/grunts".to_string()),
            redis_url: env_var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            base_port: env_var("BASE_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8301),
            openai_allowed_models: env_list("OPENAI_ALLOWED_MODELS"),
            google_allowed_models: env_list("GOOGLE_ALLOWED_MODELS"),
            openrouter_allowed_models: env_list("OPENROUTER_ALLOWED_MODELS"),
            custom_allowed_models: env_list("CUSTOM_ALLOWED_MODELS"),
            custom_endpoint_url: env_var("CUSTOM_API_URL"),
            openrouter_endpoint_url: env_var("OPENROUTER_API_URL"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn conversation_timeout_seconds(&self) -> u64 {
        self.conversation_timeout_hours * 3600
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_turns: self.max_conversation_turns,
            ttl_seconds: self.conversation_timeout_seconds(),
        }
    }
}
