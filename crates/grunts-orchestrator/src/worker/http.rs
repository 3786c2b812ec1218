//! Worker Status Plane (§4.G): `GET /health`, `GET /status`, `POST /task`,
//! `POST /cancel` over `axum`, bound to loopback. The worker is the sole
//! writer of its own status; this module only ever reads the shared state
//! it owns or flips the cancel flag other code observes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use grunts_core::{CompletionProvider, ConversationStore, ProviderRegistry};
use serde::{Deserialize, Serialize};

use super::driver::{CancelSignal, StatusSink, WorkerDriver};
use super::prompts::PromptContext;
use super::state_machine::WorkerPhase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusView {
    pub worker_id: String,
    pub phase: WorkerPhase,
    pub current_iteration: u32,
    pub best_score: u8,
    pub consecutive_failures: u32,
    pub lines_added: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub progress_percent: u8,
}

/// Launch-time configuration for one worker process (§3 Worker Specification).
pub struct WorkerLaunchSpec {
    pub worker_id: String,
    pub specialization_tag: String,
    pub model_name: String,
    pub max_iterations: u32,
    pub workspace_dir: std::path::PathBuf,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub technologies: Vec<String>,
}

pub struct WorkerHttpState {
    pub spec: WorkerLaunchSpec,
    pub status: RwLock<WorkerStatusView>,
    pub cancel: AtomicBool,
    pub started: AtomicBool,
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<dyn ConversationStore>,
    pub provider: Arc<dyn CompletionProvider>,
    pub config: Arc<grunts_core::Config>,
}

impl WorkerHttpState {
    pub fn new(
        spec: WorkerLaunchSpec,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn CompletionProvider>,
        config: Arc<grunts_core::Config>,
    ) -> Self {
        let view = WorkerStatusView {
            worker_id: spec.worker_id.clone(),
            phase: WorkerPhase::Initializing,
            current_iteration: 0,
            best_score: 0,
            consecutive_failures: 0,
            lines_added: 0,
            tests_passed: 0,
            tests_failed: 0,
            progress_percent: 0,
        };
        Self {
            spec,
            status: RwLock::new(view),
            cancel: AtomicBool::new(false),
            started: AtomicBool::new(false),
            registry,
            store,
            provider,
            config,
        }
    }
}

impl CancelSignal for WorkerHttpState {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl StatusSink for WorkerHttpState {
    fn report(&self, phase: WorkerPhase, iteration: u32, best_score: u8, consecutive_failures: u32) {
        let mut view = self.status.write().unwrap();
        view.phase = phase;
        view.current_iteration = iteration;
        view.best_score = best_score;
        view.consecutive_failures = consecutive_failures;
        view.progress_percent = best_score.min(100);
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<WorkerHttpState>>) -> impl IntoResponse {
    let view = state.status.read().unwrap().clone();
    Json(view)
}

async fn cancel(State(state): State<Arc<WorkerHttpState>>) -> impl IntoResponse {
    state.cancel.store(true, Ordering::SeqCst);
    Json(serde_json::json!({ "cancelled": true }))
}

/// `POST /task` is idempotent per worker lifetime (§6): the first call
/// spawns the generate/validate loop in the background; subsequent calls
/// observe `started` already set and are no-ops.
async fn task(
    State(state): State<Arc<WorkerHttpState>>,
    Json(body): Json<TaskRequest>,
) -> impl IntoResponse {
    if state.started.swap(true, Ordering::SeqCst) {
        return Json(serde_json::json!({ "started": false, "reason": "already started" }));
    }

    tokio::spawn(async move {
        let ctx_owned = (
            state.spec.worker_id.clone(),
            state.spec.specialization_tag.clone(),
            body.technologies,
            body.prompt,
        );
        let driver = WorkerDriver {
            registry: &state.registry,
            store: state.store.as_ref(),
            provider: state.provider.as_ref(),
            config: &state.config,
        };
        let ctx = PromptContext {
            worker_id: &ctx_owned.0,
            specialization_tag: &ctx_owned.1,
            technologies: &ctx_owned.2,
            task: &ctx_owned.3,
        };
        let outcome = driver
            .run(
                ctx,
                &state.spec.model_name,
                state.spec.max_iterations,
                state.as_ref(),
                state.as_ref(),
            )
            .await;
        match outcome {
            Ok(outcome) if outcome.phase == WorkerPhase::Completed => {
                let written = super::artifact::write_completion_artifact(
                    &state.spec.workspace_dir,
                    &state.spec.worker_id,
                    &state.spec.specialization_tag,
                    &ctx_owned.3,
                    &outcome.best_code,
                    state.spec.port,
                );
                if let Err(e) = written {
                    tracing::warn!(error = %e, worker_id = %state.spec.worker_id, "failed to write completion artifact");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, worker_id = %state.spec.worker_id, "worker run failed");
                let mut view = state.status.write().unwrap();
                view.phase = WorkerPhase::Failed;
            }
        }
    });

    Json(serde_json::json!({ "started": true }))
}

pub fn router(state: Arc<WorkerHttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/task", post(task))
        .route("/cancel", post(cancel))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grunts_core::provider::{Completion, ProviderCallError};
    use grunts_core::registry::RestrictionPolicy;
    use grunts_core::store::{InMemoryConversationStore, StoreLimits};

    struct EchoProvider;

    #[async_trait]
    impl CompletionProvider for EchoProvider {
        async fn complete(
            &self,
            _model: &str,
            _system_prompt: &str,
            _messages: &[(String, String)],
            _temperature: f32,
        ) -> Result<Completion, ProviderCallError> {
            Ok(Completion {
                text: "```js\nconst x = 1;\n```".to_string(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    fn test_state() -> Arc<WorkerHttpState> {
        let registry = Arc::new(ProviderRegistry::new());
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new(StoreLimits {
            max_turns: 50,
            ttl_seconds: 3 * 3600,
        }));
        let provider: Arc<dyn CompletionProvider> = Arc::new(EchoProvider);
        let config = Arc::new(grunts_core::Config::default());
        Arc::new(WorkerHttpState::new(
            WorkerLaunchSpec {
                worker_id: "w1".to_string(),
                specialization_tag: "backend".to_string(),
                model_name: "gpt-5".to_string(),
                max_iterations: 10,
                workspace_dir: std::env::temp_dir().join("grunts-worker-http-test"),
                port: 8301,
            },
            registry,
            store,
            provider,
            config,
        ))
    }

    #[tokio::test]
    async fn cancel_endpoint_flips_the_flag() {
        let state = test_state();
        assert!(!state.cancel.load(Ordering::SeqCst));
        let _ = cancel(State(state.clone())).await;
        assert!(state.cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn status_reports_the_initial_phase() {
        let state = test_state();
        let view = state.status.read().unwrap().clone();
        assert_eq!(view.phase, WorkerPhase::Initializing);
        assert_eq!(view.worker_id, "w1");
    }

    #[tokio::test]
    async fn task_endpoint_is_idempotent_per_worker_lifetime() {
        let state = test_state();
        state
            .registry
            .initialize(vec![], RestrictionPolicy::new())
            .await
            .ok();
        let first = task(
            State(state.clone()),
            Json(TaskRequest {
                prompt: "write something".to_string(),
                technologies: vec![],
            }),
        )
        .await
        .into_response();
        assert_eq!(first.status(), axum::http::StatusCode::OK);
        assert!(state.started.load(Ordering::SeqCst));
        // Second call observes `started` already set and is a no-op.
        let _ = task(
            State(state.clone()),
            Json(TaskRequest {
                prompt: "ignored".to_string(),
                technologies: vec![],
            }),
        )
        .await;
    }
}
