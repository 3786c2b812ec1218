//! Worker-pool lifecycle (§4.F): launch each worker as a child `grunts-worker`
//! process bound to its assigned port, poll its HTTP status on a fixed
//! cadence, run a partial-assessment timer with overlap-skip semantics, and
//! terminate on global completion, deadline, or cancel — grunts-worker then
//! SIGTERM, forced after a grace period.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::Instant;

use grunts_core::registry::{ModelCapabilities, ProviderEntry, ProviderHealth, ProviderKind, TemperatureConstraint};
use grunts_core::{Config, ProviderRegistry};

use super::decompose::decompose;
use super::tiers::{tier_profile, TIER_NAMES};
use crate::worker::WorkerStatusView;

/// Build one registry entry per distinct model named across every Tier
/// Profile, so that "verify its primary model is admissible per the
/// Registry" (§4.F step 2) has something real to check against. Gated the
/// same way the Registry itself is meant to be: by which credential is
/// actually present, not by guessing availability.
pub fn candidate_entries(config: &Config) -> Vec<ProviderEntry> {
    let have_native = std::env::var("OPENAI_API_KEY").is_ok() || std::env::var("GOOGLE_API_KEY").is_ok();
    let have_custom = config.custom_endpoint_url.is_some() || std::env::var("CUSTOM_API_KEY").is_ok();

    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();
    for tier in TIER_NAMES {
        for tmpl in tier_profile(tier) {
            for model in [tmpl.model_name, tmpl.fallback_model_name] {
                if !seen.insert(model.clone()) {
                    continue;
                }
                let kind = if model.contains('/') {
                    ProviderKind::Aggregator
                } else if have_native {
                    ProviderKind::NativeFirstParty
                } else if have_custom {
                    ProviderKind::CustomEndpoint
                } else {
                    continue;
                };
                entries.push(ProviderEntry {
                    kind,
                    capabilities: ModelCapabilities {
                        model_name: model.clone(),
                        friendly_name: model,
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
                });
            }
        }
    }
    entries
}

/// One worker's launch-time identity plus its last-known status, as seen by
/// the Orchestrator (§4.G: the Orchestrator only ever reads worker status,
/// never mutates it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker_id: u32,
    pub specialization_tag: String,
    pub model_name: String,
    pub port: u16,
    pub status: Option<WorkerStatusView>,
}

/// The read-only, serializable snapshot served by `GET /run` (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub tier: String,
    pub prompt: String,
    pub technologies: Vec<String>,
    pub started_at: String,
    pub deadline_at: String,
    pub workers: Vec<WorkerView>,
    pub last_partial_assessment_at: Option<String>,
    pub result: Option<RunResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Partial,
    Failed,
}

pub struct RunRequest {
    pub run_id: String,
    pub tier: String,
    pub prompt: String,
    pub technologies: Vec<String>,
    pub max_execution_seconds: u64,
    pub partial_assessment_interval_seconds: u64,
}

/// Shared, mutable run state: the `RunSnapshot` any poller updates and the
/// `GET /run` handler reads, plus the cancel flag external callers flip.
pub struct RunHandle {
    pub snapshot: RwLock<RunSnapshot>,
    pub cancel: AtomicBool,
}

impl RunHandle {
    pub fn new(snapshot: RunSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(snapshot),
            cancel: AtomicBool::new(false),
        })
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const GRACE_PERIOD: Duration = Duration::from_secs(10);
const CANCEL_HTTP_DEADLINE: Duration = Duration::from_secs(2);

/// Pick an admissible model: the primary if the Registry can route it, else
/// the fallback, else the first available model of any kind (§4.F step 2).
fn resolve_admissible_model(registry: &ProviderRegistry, primary: &str, fallback: &str) -> String {
    if registry.get_provider_for_model(primary).is_ok() {
        return primary.to_string();
    }
    if registry.get_provider_for_model(fallback).is_ok() {
        return fallback.to_string();
    }
    registry
        .best_of_kind(ProviderKind::NativeFirstParty)
        .or_else(|| registry.available_models(true).into_iter().next())
        .unwrap_or_else(|| primary.to_string())
}

/// Spawn every worker in the tier's profile as a child `grunts-worker`
/// process and kick off its task via `POST /task` once its HTTP surface is
/// reachable. Returns the spawned children (kept alive for later shutdown)
/// alongside the initial `WorkerView` rows.
async fn launch_workers(
    config: &Config,
    registry: &ProviderRegistry,
    req: &RunRequest,
    worker_binary: &str,
    workspace_root: &std::path::Path,
) -> (Vec<Child>, Vec<WorkerView>) {
    let templates = tier_profile(&req.tier);
    let tags: Vec<String> = templates.iter().map(|t| t.specialization_tag.clone()).collect();
    let subtasks = decompose(&req.prompt, &req.technologies, &tags);
    let by_tag: HashMap<&str, &super::decompose::Subtask> =
        subtasks.iter().map(|s| (s.specialization_tag.as_str(), s)).collect();

    let mut children = Vec::new();
    let mut views = Vec::new();
    for (idx, tmpl) in templates.iter().enumerate() {
        let worker_id = idx as u32;
        let port = config.base_port + worker_id as u16;
        let model = resolve_admissible_model(registry, &tmpl.model_name, &tmpl.fallback_model_name);
        let workspace_dir = workspace_root.join(format!("worker-{worker_id}"));
        if let Err(e) = std::fs::create_dir_all(&workspace_dir) {
            tracing::warn!(error = %e, worker_id, "failed to create worker workspace directory");
        }

        let child = Command::new(worker_binary)
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .arg("--specialization-tag")
            .arg(&tmpl.specialization_tag)
            .arg("--model")
            .arg(&model)
            .arg("--max-iterations")
            .arg(tmpl.max_iterations.to_string())
            .arg("--port")
            .arg(port.to_string())
            .current_dir(&workspace_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn();

        match child {
            Ok(child) => {
                let prompt = by_tag
                    .get(tmpl.specialization_tag.as_str())
                    .map(|s| s.prompt.clone())
                    .unwrap_or_else(|| req.prompt.clone());
                tokio::spawn(start_worker_task(port, prompt, req.technologies.clone()));
                children.push(child);
                views.push(WorkerView {
                    worker_id,
                    specialization_tag: tmpl.specialization_tag.clone(),
                    model_name: model,
                    port,
                    status: None,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, worker_id, binary = worker_binary, "failed to spawn worker process");
            }
        }
    }
    (children, views)
}

/// Wait for the worker's `/health` to answer, then `POST /task`. Runs as a
/// best-effort background task; a worker that never comes up is left in
/// `status: None` and is treated as failed by the aggregation step.
async fn start_worker_task(port: u16, prompt: String, technologies: Vec<String>) {
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    for _ in 0..20 {
        if client.get(format!("{base}/health")).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    let body = serde_json::json!({ "prompt": prompt, "technologies": technologies });
    if let Err(e) = client.post(format!("{base}/task")).json(&body).send().await {
        tracing::warn!(error = %e, port, "failed to start worker task");
    }
}

async fn poll_worker_status(port: u16) -> Option<WorkerStatusView> {
    let client = reqwest::Client::new();
    client
        .get(format!("http://127.0.0.1:{port}/status"))
        .timeout(Duration::from_secs(3))
        .send()
        .await
        .ok()?
        .json::<WorkerStatusView>()
        .await
        .ok()
}

fn all_terminal(workers: &[WorkerView]) -> bool {
    workers.iter().all(|w| {
        matches!(
            w.status.as_ref().map(|s| &s.phase),
            Some(crate::worker::WorkerPhase::Completed) | Some(crate::worker::WorkerPhase::Failed)
        )
    })
}

fn aggregate_result(workers: &[WorkerView]) -> RunResult {
    let completed = workers
        .iter()
        .filter(|w| matches!(w.status.as_ref().map(|s| &s.phase), Some(crate::worker::WorkerPhase::Completed)))
        .count();
    if completed >= 1 {
        return RunResult::Success;
    }
    let produced_artifact = workers
        .iter()
        .any(|w| w.status.as_ref().map(|s| s.best_score > 0).unwrap_or(false));
    if produced_artifact {
        RunResult::Partial
    } else {
        RunResult::Failed
    }
}

async fn cancel_all_workers(workers: &[WorkerView]) {
    let client = reqwest::Client::new();
    for w in workers {
        let url = format!("http://127.0.0.1:{}/cancel", w.port);
        let _ = client.post(url).timeout(CANCEL_HTTP_DEADLINE).send().await;
    }
}

async fn shut_down_children(mut children: Vec<Child>) {
    for child in &mut children {
        let _ = child.start_kill();
    }
    let deadline = Instant::now() + GRACE_PERIOD;
    for child in &mut children {
        let now = Instant::now();
        let remaining = if now >= deadline { Duration::ZERO } else { deadline - now };
        if tokio::time::timeout(remaining, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Drive one Orchestration Run end to end: launch, poll, partial-assess,
/// terminate, aggregate. Returns once every worker is terminal, the
/// deadline has passed, or `handle.request_cancel()` was called.
pub async fn run_to_completion(
    config: &Config,
    registry: &ProviderRegistry,
    req: RunRequest,
    worker_binary: String,
    workspace_root: std::path::PathBuf,
) -> Arc<RunHandle> {
    let started_at = chrono::Utc::now();
    let deadline_at = started_at + chrono::Duration::seconds(req.max_execution_seconds as i64);
    let partial_interval = Duration::from_secs(req.partial_assessment_interval_seconds.max(1));

    let (children, views) = launch_workers(config, registry, &req, &worker_binary, &workspace_root).await;

    let snapshot = RunSnapshot {
        run_id: req.run_id.clone(),
        tier: req.tier.clone(),
        prompt: req.prompt.clone(),
        technologies: req.technologies.clone(),
        started_at: started_at.to_rfc3339(),
        deadline_at: deadline_at.to_rfc3339(),
        workers: views,
        last_partial_assessment_at: None,
        result: None,
    };
    let handle = RunHandle::new(snapshot);

    let run_handle = handle.clone();
    tokio::spawn(async move {
        let mut next_assessment = Instant::now() + partial_interval;
        let assessment_running = Arc::new(AtomicBool::new(false));
        let mut children = children;

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            {
                let mut snap = run_handle.snapshot.write().await;
                for w in snap.workers.iter_mut() {
                    w.status = poll_worker_status(w.port).await;
                }
            }

            let cancelled = run_handle.cancel.load(Ordering::SeqCst);
            let deadline_hit = chrono::Utc::now() >= deadline_at;
            let done = {
                let snap = run_handle.snapshot.read().await;
                all_terminal(&snap.workers)
            };

            if Instant::now() >= next_assessment {
                next_assessment = Instant::now() + partial_interval;
                // Overlap-skip: a still-running assessment is not queued.
                if !assessment_running.swap(true, Ordering::SeqCst) {
                    let when = chrono::Utc::now().to_rfc3339();
                    let mut snap = run_handle.snapshot.write().await;
                    snap.last_partial_assessment_at = Some(when);
                    assessment_running.store(false, Ordering::SeqCst);
                }
            }

            if done || cancelled || deadline_hit {
                let views_snapshot = run_handle.snapshot.read().await.workers.clone();
                if cancelled || deadline_hit {
                    cancel_all_workers(&views_snapshot).await;
                }
                shut_down_children(std::mem::take(&mut children)).await;

                if deadline_hit && !done {
                    tracing::warn!(run_id = %req.run_id, "run deadline exceeded with workers still active");
                }
                let mut snap = run_handle.snapshot.write().await;
                snap.result = Some(aggregate_result(&snap.workers));
                break;
            }
        }
    });

    handle
}
