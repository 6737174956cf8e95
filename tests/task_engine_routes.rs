// Exercises the Task Engine's own axum router in-process, the same way
// tests/plugin_service_lifecycle.rs exercises the Plugin Service's. Spins
// up a real Plugin Service on an ephemeral port so scan creation/advance
// makes genuine HTTP round trips, but drives the Task Engine surface being
// tested entirely through its `router()`, not through `TaskEngine` methods
// directly.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

use scan_orchestrator::plan::{Plan, WorkflowStep};
use scan_orchestrator::plugin_service::routes::router as plugin_service_router;
use scan_orchestrator::plugin_service::{PluginService, PluginServiceConfig};
use scan_orchestrator::task_engine::routes::{router, AppState};
use scan_orchestrator::task_engine::{MemoryScanStore, TaskEngine, TaskEngineConfig};

async fn spawn_plugin_service(work_root: &std::path::Path) -> String {
    let config = PluginServiceConfig {
        work_directory_root: work_root.to_path_buf(),
        stop_grace_period: Duration::from_secs(5),
        runner_command: env!("CARGO_BIN_EXE_plugin-runner").to_string(),
        base_url: "http://127.0.0.1:0".to_string(),
        debug: false,
    };
    let service = PluginService::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = plugin_service_router(service);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn build_state(plugin_service_api: String, artifacts_path: std::path::PathBuf) -> AppState {
    let config = TaskEngineConfig {
        plugin_service_api,
        artifacts_path: artifacts_path.clone(),
        idle_interval: Duration::from_millis(50),
        eviction_delay: Duration::from_millis(150),
    };
    AppState {
        engine: TaskEngine::new(config, MemoryScanStore::new()),
        artifacts_path,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_scan_rejects_a_target_with_userinfo() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(put_json("/scan/create/tickle", json!({"target": "http://u:p@x/"})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "invalid-configuration");
}

#[tokio::test]
async fn create_scan_rejects_a_non_http_scheme() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(put_json("/scan/create/tickle", json!({"target": "ftp://x"})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "invalid-configuration");
}

#[tokio::test]
async fn create_scan_rejects_unknown_configuration_keys() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(put_json(
            "/scan/create/tickle",
            json!({"unknown": 1, "target": "http://x"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "invalid-configuration");
}

#[tokio::test]
async fn create_scan_for_unknown_plan_reports_no_such_plan() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(put_json("/scan/create/no-such-plan", json!({"target": "http://x"})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "no-such-plan");
}

#[tokio::test]
async fn create_scan_with_a_valid_target_succeeds() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(put_json("/scan/create/tickle", json!({"target": "http://example.com"})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["scan"]["state"], "CREATED");
    assert_eq!(body["scan"]["sessions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn results_with_a_malformed_token_is_rejected() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(get(&format!("/scan/{}/results?token=not-valid-base64!!!", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "malformed-token");
}

#[tokio::test]
async fn get_scan_for_unknown_id_reports_no_such_scan() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app.oneshot(get(&format!("/scan/{}", Uuid::new_v4()))).await.unwrap();
    assert_eq!(body_json(response).await["error"], "no-such-scan");
}

#[tokio::test]
async fn get_artifact_for_unknown_scan_is_404() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let app = router(build_state(api, artifacts.path().to_path_buf()));

    let response = app
        .oneshot(get(&format!("/scan/{}/artifacts/{}", Uuid::new_v4(), Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_artifact_round_trips_the_same_bytes_the_plugin_service_produced() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;
    let state = build_state(api, artifacts.path().to_path_buf());
    let engine = state.engine.clone();

    // ReportGeneratingPlugin isn't part of any registered plan, so this
    // scan is composed directly to exercise the artifacts path end to end.
    let plan = Plan {
        name: "artifact-check".to_string(),
        description: "ad-hoc plan for artifact round-trip coverage".to_string(),
        workflow: vec![WorkflowStep {
            plugin_name: "ReportGeneratingPlugin".to_string(),
            description: "produces a report artifact".to_string(),
            configuration: json!({}),
        }],
    };
    let summary = engine.create_session(plan, json!({})).await.unwrap();
    engine.start_session(summary.id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let plugin_session_id = loop {
        if let Some(s) = engine.get_session_summary(summary.id).await {
            if s.state == scan_orchestrator::task_engine::session::ScanSessionState::Finished {
                break s.sessions[0].id;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "scan never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    // The Plugin Service never deletes the zip file from disk on session
    // deletion, only the in-memory session entry, so this is still on disk
    // after the scan's post-finish cleanup runs.
    let expected = std::fs::read(work_root.path().join(format!("{plugin_session_id}.zip"))).unwrap();
    assert_eq!(&expected[0..2], b"PK");

    let app = router(state);
    let response = app
        .oneshot(get(&format!("/scan/{}/artifacts/{plugin_session_id}", summary.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), expected.as_slice());
}
