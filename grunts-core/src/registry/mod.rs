//! Provider Registry — resolves a logical model name to a concrete provider,
//! enforcing restriction policy and tracking per-provider health.
//!
//! Mirrors the health-tracking shape of a classic provider registry (success
//! rate, availability) but replaces its fixed four-model enum with the
//! dynamic alias/canonical-name resolution and allowlist restriction policy
//! this system needs.

mod temperature;

pub use temperature::TemperatureConstraint;

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::OnceCell;

use crate::errors::RegistryError;

/// Priority tier a provider is consulted in. Lower values are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Native first-party APIs (Google, OpenAI).
    NativeFirstParty,
    /// A configured custom endpoint.
    CustomEndpoint,
    /// Catch-all aggregator (OpenRouter). Models containing `/` route here.
    Aggregator,
}

use serde::{Deserialize, Serialize};

impl ProviderKind {
    fn priority(self) -> u8 {
        match self {
            ProviderKind::NativeFirstParty => 0,
            ProviderKind::CustomEndpoint => 1,
            ProviderKind::Aggregator => 2,
        }
    }
}

/// Capabilities of a single model entry, keyed by its canonical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub model_name: String,
    pub friendly_name: String,
    pub context_window: u32,
    pub supports_extended_thinking: bool,
    pub supports_system_prompts: bool,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    pub supports_function_calling: bool,
    pub supports_images: bool,
    pub max_image_mb: u32,
    pub temperature_constraint: TemperatureConstraint,
}

/// Rolling health record for one provider entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub available: bool,
    pub success_count: u64,
    pub error_count: u64,
    pub status_message: Option<String>,
}

impl ProviderHealth {
    pub fn healthy() -> Self {
        Self {
            available: true,
            success_count: 0,
            error_count: 0,
            status_message: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            success_count: 0,
            error_count: 0,
            status_message: Some(reason.into()),
        }
    }

    pub fn success_rate(&self) -> f32 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f32 / total as f32
        }
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// One provider-owned model: its kind (for priority and restriction), the
/// canonical model name it answers under, and any aliases that also resolve
/// to it.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    pub capabilities: ModelCapabilities,
    pub aliases: Vec<String>,
    pub health: ProviderHealth,
}

impl ProviderEntry {
    pub fn is_usable(&self) -> bool {
        self.health.available
    }

    fn owns(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.capabilities.model_name.to_ascii_lowercase() == name
            || self.aliases.iter().any(|a| a.to_ascii_lowercase() == name)
    }
}

/// Per-provider allowlist: a model is admissible only if no allowlist is
/// configured for its kind, or the model name matches an entry
/// case-insensitively (substring or exact).
#[derive(Debug, Clone, Default)]
pub struct RestrictionPolicy {
    allowlists: HashMap<ProviderKind, Vec<String>>,
}

impl RestrictionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_only(&mut self, kind: ProviderKind, models: Vec<String>) {
        self.allowlists.insert(kind, models);
    }

    fn is_admissible(&self, kind: ProviderKind, model_name: &str) -> bool {
        match self.allowlists.get(&kind) {
            None => true,
            Some(list) => {
                let name = model_name.to_ascii_lowercase();
                list.iter().any(|entry| {
                    let entry = entry.to_ascii_lowercase();
                    name == entry || name.contains(&entry)
                })
            }
        }
    }
}

/// Classifies a model name to the provider kind used for restriction lookups.
/// Names containing `/` are aggregator-routed per the declarative rule table.
pub fn classify_for_restriction(model_name: &str, owning_kind: ProviderKind) -> ProviderKind {
    if model_name.contains('/') {
        ProviderKind::Aggregator
    } else {
        owning_kind
    }
}

/// Single point resolving a logical model name to a usable provider entry.
///
/// `initialize` is idempotent and exposes a "ready" guarantee via
/// [`tokio::sync::OnceCell`]: concurrent first-use serializes on the same
/// initialization future rather than re-entering it.
pub struct ProviderRegistry {
    entries: RwLock<Vec<ProviderEntry>>,
    restrictions: RwLock<RestrictionPolicy>,
    ready: OnceCell<()>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            restrictions: RwLock::new(RestrictionPolicy::new()),
            ready: OnceCell::new(),
        }
    }

    /// Idempotent initialization. Builds the provider list from whichever
    /// credentials are present in `env_config`. Concurrent callers all await
    /// the same underlying future exactly once.
    pub async fn initialize(
        &self,
        entries: Vec<ProviderEntry>,
        restrictions: RestrictionPolicy,
    ) -> Result<(), RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::NoProvidersConfigured);
        }
        self.ready
            .get_or_init(|| async {
                *self.entries.write().unwrap() = entries;
                *self.restrictions.write().unwrap() = restrictions;
            })
            .await;
        Ok(())
    }

    /// Awaits the "ready" guarantee without re-running initialization.
    pub async fn wait_ready(&self) {
        // If never initialized this simply never resolves from a fresh
        // registry; callers are expected to initialize before first use.
        let _ = self.ready.get();
    }

    /// Resolve `name` to a usable provider entry honoring priority ordering
    /// and restriction policy. `name == "auto"` is rejected: callers must
    /// resolve `auto` via the Tool Request Pipeline's model-resolution step
    /// before reaching the registry.
    pub fn get_provider_for_model(&self, name: &str) -> Result<ModelCapabilities, RegistryError> {
        if name.eq_ignore_ascii_case("auto") {
            return Err(RegistryError::AutoNotResolved);
        }
        let entries = self.entries.read().unwrap();
        let restrictions = self.restrictions.read().unwrap();

        let mut candidates: Vec<&ProviderEntry> =
            entries.iter().filter(|e| e.owns(name)).collect();
        candidates.sort_by_key(|e| e.kind.priority());

        let Some(entry) = candidates.first() else {
            return Err(RegistryError::UnknownModel(name.to_string()));
        };

        let restriction_kind = classify_for_restriction(&entry.capabilities.model_name, entry.kind);
        if !restrictions.is_admissible(restriction_kind, &entry.capabilities.model_name) {
            return Err(RegistryError::ModelRestricted(name.to_string()));
        }

        Ok(entry.capabilities.clone())
    }

    /// All models reachable right now, optionally filtered by restriction.
    pub fn available_models(&self, respect_restrictions: bool) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let restrictions = self.restrictions.read().unwrap();
        entries
            .iter()
            .filter(|e| e.is_usable())
            .filter(|e| {
                if !respect_restrictions {
                    return true;
                }
                let kind = classify_for_restriction(&e.capabilities.model_name, e.kind);
                restrictions.is_admissible(kind, &e.capabilities.model_name)
            })
            .map(|e| e.capabilities.model_name.clone())
            .collect()
    }

    pub fn capabilities(&self, name: &str) -> Option<ModelCapabilities> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .find(|e| e.owns(name))
            .map(|e| e.capabilities.clone())
    }

    /// Representative model for a priority-ordered, health-ranked pick
    /// within a given provider kind — used by the Tool Request Pipeline's
    /// `model_category == "all"` resolution.
    pub fn best_of_kind(&self, kind: ProviderKind) -> Option<String> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|e| e.kind == kind && e.is_usable())
            .max_by(|a, b| {
                a.health
                    .success_rate()
                    .partial_cmp(&b.health.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| e.capabilities.model_name.clone())
    }

    pub fn record_success(&self, name: &str) {
        let mut entries = self.entries.write().unwrap();
        if let Some(e) = entries.iter_mut().find(|e| e.owns(name)) {
            e.health.record_success();
        }
    }

    pub fn record_failure(&self, name: &str) {
        let mut entries = self.entries.write().unwrap();
        if let Some(e) = entries.iter_mut().find(|e| e.owns(name)) {
            e.health.record_failure();
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: ProviderKind, name: &str, aliases: &[&str]) -> ProviderEntry {
        ProviderEntry {
            kind,
            capabilities: ModelCapabilities {
                model_name: name.to_string(),
                friendly_name: name.to_string(),
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
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            health: ProviderHealth::healthy(),
        }
    }

    #[tokio::test]
    async fn auto_is_rejected_before_routing() {
        let registry = ProviderRegistry::new();
        registry
            .initialize(
                vec![entry(ProviderKind::NativeFirstParty, "gpt-5", &["o3"])],
                RestrictionPolicy::new(),
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.get_provider_for_model("auto"),
            Err(RegistryError::AutoNotResolved)
        ));
    }

    #[tokio::test]
    async fn alias_resolves_case_insensitively() {
        let registry = ProviderRegistry::new();
        registry
            .initialize(
                vec![entry(ProviderKind::NativeFirstParty, "gpt-5", &["o3"])],
                RestrictionPolicy::new(),
            )
            .await
            .unwrap();
        let caps = registry.get_provider_for_model("O3").unwrap();
        assert_eq!(caps.model_name, "gpt-5");
    }

    #[tokio::test]
    async fn unknown_model_errors() {
        let registry = ProviderRegistry::new();
        registry
            .initialize(
                vec![entry(ProviderKind::NativeFirstParty, "gpt-5", &[])],
                RestrictionPolicy::new(),
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.get_provider_for_model("nonexistent"),
            Err(RegistryError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn restriction_rejects_disallowed_model() {
        let registry = ProviderRegistry::new();
        let mut restrictions = RestrictionPolicy::new();
        restrictions.allow_only(ProviderKind::NativeFirstParty, vec!["o3-mini".to_string()]);
        registry
            .initialize(
                vec![entry(ProviderKind::NativeFirstParty, "o3", &[])],
                restrictions,
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.get_provider_for_model("o3"),
            Err(RegistryError::ModelRestricted(_))
        ));
    }

    #[tokio::test]
    async fn aggregator_routed_models_contain_slash() {
        assert_eq!(
            classify_for_restriction("meta/llama-3", ProviderKind::NativeFirstParty),
            ProviderKind::Aggregator
        );
        assert_eq!(
            classify_for_restriction("gpt-5", ProviderKind::NativeFirstParty),
            ProviderKind::NativeFirstParty
        );
    }

    #[tokio::test]
    async fn initialize_with_no_providers_fails() {
        let registry = ProviderRegistry::new();
        let err = registry
            .initialize(vec![], RestrictionPolicy::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoProvidersConfigured));
    }

    #[tokio::test]
    async fn priority_ordering_prefers_native_over_aggregator() {
        let registry = ProviderRegistry::new();
        let mut aggregator_entry = entry(ProviderKind::Aggregator, "shared-model", &[]);
        aggregator_entry.capabilities.context_window = 8_000;
        let mut native_entry = entry(ProviderKind::NativeFirstParty, "shared-model", &[]);
        native_entry.capabilities.context_window = 128_000;
        registry
            .initialize(vec![aggregator_entry, native_entry], RestrictionPolicy::new())
            .await
            .unwrap();
        let caps = registry.get_provider_for_model("shared-model").unwrap();
        assert_eq!(caps.context_window, 128_000);
    }
}
