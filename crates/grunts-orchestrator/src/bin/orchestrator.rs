//! `grunts-orchestrator`: resolves a tier, decomposes the task, launches one
//! `grunts-worker` child process per worker specification, and drives the
//! run to completion while serving `GET /run` for dashboard polling.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use grunts_core::registry::RestrictionPolicy;
use grunts_core::{Config, ProviderRegistry};
use grunts_orchestrator::orchestrator::{self, OrchestratorHttpState, RunRequest};

#[derive(Debug, Parser)]
#[command(name = "grunts-orchestrator")]
struct Args {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "medium")]
    tier: String,
    #[arg(long, value_delimiter = ',', default_value = "")]
    technologies: Vec<String>,
    #[arg(long, default_value_t = 3600)]
    max_execution_seconds: u64,
    #[arg(long, default_value_t = 1800)]
    partial_assessment_interval_seconds: u64,
    /// Path to the `grunts-worker` binary. Defaults to the sibling binary
    /// next to this one (both bins live in the same `target/<profile>/`).
    #[arg(long)]
    worker_binary: Option<String>,
    #[arg(long, default_value_t = 8300)]
    dashboard_port: u16,
    #[arg(long)]
    workspace_dir: Option<String>,
}

fn default_worker_binary() -> Result<String> {
    let mut path = std::env::current_exe()?;
    path.set_file_name(if cfg!(windows) { "grunts-worker.exe" } else { "grunts-worker" });
    Ok(path.to_string_lossy().into_owned())
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
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, tier = %args.tier, "grunts-orchestrator starting run");

    let registry = ProviderRegistry::new();
    registry
        .initialize(orchestrator::candidate_entries(&config), RestrictionPolicy::new())
        .await
        .ok();
    registry.wait_ready().await;

    let worker_binary = match args.worker_binary {
        Some(p) => p,
        None => default_worker_binary()?,
    };
    let workspace_root = args
        .workspace_dir
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(&config.workspace_dir).join(&run_id));
    std::fs::create_dir_all(&workspace_root)?;

    let technologies: Vec<String> = args.technologies.into_iter().filter(|t| !t.is_empty()).collect();

    let req = RunRequest {
        run_id: run_id.clone(),
        tier: args.tier,
        prompt: args.prompt,
        technologies,
        max_execution_seconds: args.max_execution_seconds,
        partial_assessment_interval_seconds: args.partial_assessment_interval_seconds,
    };

    let run_handle = orchestrator::run_to_completion(
        &config,
        &registry,
        req,
        worker_binary,
        workspace_root,
    )
    .await;

    let dashboard_state = Arc::new(OrchestratorHttpState { run: run_handle.clone() });
    let app = orchestrator::router(dashboard_state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], args.dashboard_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "orchestrator dashboard feed listening");

    let serve = axum::serve(listener, app);
    tokio::select! {
        res = serve => { res?; }
        _ = wait_for_run_result(run_handle.clone()) => {
            info!(run_id = %run_id, "run reached a terminal result");
        }
    }

    let snapshot = run_handle.snapshot.read().await;
    info!(run_id = %run_id, result = ?snapshot.result, "grunts-orchestrator exiting");
    Ok(())
}

async fn wait_for_run_result(handle: Arc<orchestrator::RunHandle>) {
    loop {
        if handle.snapshot.read().await.result.is_some() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}
