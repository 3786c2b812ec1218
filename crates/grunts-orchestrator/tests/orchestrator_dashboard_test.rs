//! End-to-end coverage of the Orchestrator's own read-only `GET /run`
//! dashboard feed (§4.G): binds the real router to an ephemeral loopback
//! port and confirms the served snapshot matches what was put into the
//! `RunHandle`, and that `request_cancel` is externally observable.

use std::sync::Arc;

use grunts_orchestrator::orchestrator::{
    OrchestratorHttpState, RunHandle, RunSnapshot, WorkerView,
};

fn sample_snapshot() -> RunSnapshot {
    RunSnapshot {
        run_id: "run-123".to_string(),
        tier: "medium".to_string(),
        prompt: "build a todo app".to_string(),
        technologies: vec!["react".to_string()],
        started_at: "2026-01-01T00:00:00Z".to_string(),
        deadline_at: "2026-01-01T01:00:00Z".to_string(),
        workers: vec![WorkerView {
            worker_id: 0,
            specialization_tag: "frontend".to_string(),
            model_name: "gpt-5".to_string(),
            port: 9000,
            status: None,
        }],
        last_partial_assessment_at: None,
        result: None,
    }
}

#[tokio::test]
async fn get_run_serves_the_current_snapshot_verbatim() {
    let handle = RunHandle::new(sample_snapshot());
    let state = Arc::new(OrchestratorHttpState { run: handle });
    let app = grunts_orchestrator::orchestrator::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/run"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["run_id"], "run-123");
    assert_eq!(body["tier"], "medium");
    assert_eq!(body["workers"][0]["specialization_tag"], "frontend");
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn request_cancel_is_observed_on_the_handle() {
    let handle = RunHandle::new(sample_snapshot());
    assert!(!handle.cancel.load(std::sync::atomic::Ordering::SeqCst));
    handle.request_cancel();
    assert!(handle.cancel.load(std::sync::atomic::Ordering::SeqCst));
}
