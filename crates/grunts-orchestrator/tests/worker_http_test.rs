//! End-to-end coverage of the Worker Status Plane (§4.G): binds the real
//! `axum` router to an ephemeral loopback port and drives it with plain HTTP
//! requests, the way the Orchestrator's own lifecycle polling does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grunts_core::provider::{Completion, ProviderCallError};
use grunts_core::registry::{
    ModelCapabilities, ProviderEntry, ProviderHealth, ProviderKind, RestrictionPolicy,
    TemperatureConstraint,
};
use grunts_core::store::{InMemoryConversationStore, StoreLimits};
use grunts_core::{CompletionProvider, ConversationStore, ProviderRegistry};
use grunts_orchestrator::worker::{self, WorkerHttpState, WorkerLaunchSpec, WorkerPhase};

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
            text: "```js\nconst answer = 42;\n```".to_string(),
            input_tokens: 8,
            output_tokens: 8,
        })
    }
}

fn registry_entry() -> ProviderEntry {
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

/// Binds the worker's router to a real ephemeral port, serves it in the
/// background, and returns the base URL the test client talks to.
async fn spawn_worker_server(workspace_dir: std::path::PathBuf) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = Arc::new(ProviderRegistry::new());
    registry
        .initialize(vec![registry_entry()], RestrictionPolicy::new())
        .await
        .unwrap();
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new(StoreLimits {
        max_turns: 50,
        ttl_seconds: 3 * 3600,
    }));
    let provider: Arc<dyn CompletionProvider> = Arc::new(EchoProvider);
    let config = Arc::new(grunts_core::Config::default());

    let state = Arc::new(WorkerHttpState::new(
        WorkerLaunchSpec {
            worker_id: "w1".to_string(),
            specialization_tag: "backend".to_string(),
            model_name: "gpt-5".to_string(),
            max_iterations: 10,
            workspace_dir,
            port,
        },
        registry,
        store,
        provider,
        config,
    ));
    let app = worker::http::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn health_and_status_respond_before_any_task_is_started() {
    let workspace = tempfile::tempdir().unwrap();
    let base = spawn_worker_server(workspace.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(health.status().is_success());

    let status: serde_json::Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "initializing");
    assert_eq!(status["worker_id"], "w1");
}

#[tokio::test]
async fn task_runs_to_a_terminal_phase_and_writes_a_completion_artifact_on_success() {
    let workspace = tempfile::tempdir().unwrap();
    let workspace_dir = workspace.path().to_path_buf();
    let base = spawn_worker_server(workspace_dir.clone()).await;
    let client = reqwest::Client::new();

    let started: serde_json::Value = client
        .post(format!("{base}/task"))
        .json(&serde_json::json!({ "prompt": "write a small function", "technologies": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["started"], true);

    let mut phase = String::new();
    for _ in 0..50 {
        let status: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        phase = status["phase"].as_str().unwrap().to_string();
        if phase == "completed" || phase == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(
        phase == "completed" || phase == "failed",
        "worker did not reach a terminal phase, last seen: {phase}"
    );

    // A second /task call is a no-op (§6 idempotent per worker lifetime).
    let second: serde_json::Value = client
        .post(format!("{base}/task"))
        .json(&serde_json::json!({ "prompt": "ignored", "technologies": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["started"], false);

    if phase == "completed" {
        assert!(workspace_dir.join("index.js").exists());
        assert!(workspace_dir.join("README.md").exists());
    }
}

#[tokio::test]
async fn cancel_flips_the_flag_observed_by_the_driver() {
    let workspace = tempfile::tempdir().unwrap();
    let base = spawn_worker_server(workspace.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let response: serde_json::Value = client
        .post(format!("{base}/cancel"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["cancelled"], true);

    let started: serde_json::Value = client
        .post(format!("{base}/task"))
        .json(&serde_json::json!({ "prompt": "write something", "technologies": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["started"], true);

    let mut phase = String::new();
    for _ in 0..50 {
        let status: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        phase = status["phase"].as_str().unwrap().to_string();
        if phase == "completed" || phase == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(phase, WorkerPhase::Failed.to_string());
}
