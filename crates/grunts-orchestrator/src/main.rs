//! `grunts-worker`: one disposable generate/validate loop, bound to a port,
//! spawned as a child process by the Orchestrator (§4.F "Launch transport").

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use grunts_core::registry::{ModelCapabilities, ProviderEntry, ProviderHealth, RestrictionPolicy, TemperatureConstraint};
use grunts_core::{Config, ConversationStore, InMemoryConversationStore, ProviderKind, ProviderRegistry, RedisConversationStore};
use grunts_orchestrator::provider_rig;
use grunts_orchestrator::worker::{self, WorkerHttpState, WorkerLaunchSpec};

#[derive(Debug, Parser)]
#[command(name = "grunts-worker")]
struct Args {
    #[arg(long)]
    worker_id: String,
    #[arg(long)]
    specialization_tag: String,
    #[arg(long)]
    model: String,
    #[arg(long, default_value_t = 10)]
    max_iterations: u32,
    #[arg(long)]
    port: u16,
}

/// Build the single-entry registry this worker routes through: the one
/// model it was launched with (§4.F hands each worker a concrete model
/// name, already resolved/substituted by the Orchestrator before launch).
fn registry_entry(model: &str) -> ProviderEntry {
    ProviderEntry {
        kind: ProviderKind::NativeFirstParty,
        capabilities: ModelCapabilities {
            model_name: model.to_string(),
            friendly_name: model.to_string(),
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    info!(
        worker_id = %args.worker_id,
        model = %args.model,
        port = args.port,
        "grunts-worker starting"
    );

    let registry = ProviderRegistry::new();
    registry
        .initialize(vec![registry_entry(&args.model)], RestrictionPolicy::new())
        .await?;
    registry.wait_ready().await;
    let registry = Arc::new(registry);

    let store: Arc<dyn ConversationStore> = match RedisConversationStore::connect(
        &config.redis_url,
        config.store_limits(),
    )
    .await
    {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory conversation store");
            Arc::new(InMemoryConversationStore::new(config.store_limits()))
        }
    };

    let api_key = std::env::var("CUSTOM_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_else(|_| "local".to_string());
    let base_url = config
        .custom_endpoint_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
    let provider: Arc<dyn grunts_core::CompletionProvider> =
        Arc::new(provider_rig::RigCompletionProvider::new(&api_key, &base_url)?);

    let workspace_dir = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let port = args.port;
    let config = Arc::new(config);
    let state = Arc::new(WorkerHttpState::new(
        WorkerLaunchSpec {
            worker_id: args.worker_id.clone(),
            specialization_tag: args.specialization_tag,
            model_name: args.model,
            max_iterations: args.max_iterations,
            workspace_dir,
            port,
        },
        registry,
        store,
        provider,
        config,
    ));

    let app = worker::http::router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "worker HTTP surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}
