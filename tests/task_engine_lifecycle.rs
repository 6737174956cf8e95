// End-to-end tests driving a real Plugin Service (bound to an ephemeral
// port) through the Task Engine's reconciliation loop, using the reference
// plugin-runner binary (via Cargo's CARGO_BIN_EXE_<name> mechanism) as the
// plugin process. This exercises the full two-tier HTTP round trip, not
// just in-process router calls.

use std::time::Duration;

use tokio::net::TcpListener;
use uuid::Uuid;

use scan_orchestrator::plan;
use scan_orchestrator::plugin_service::routes::router as plugin_service_router;
use scan_orchestrator::plugin_service::{PluginService, PluginServiceConfig};
use scan_orchestrator::task_engine::session::ScanSessionState;
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

fn engine_config(plugin_service_api: String, artifacts_path: std::path::PathBuf) -> TaskEngineConfig {
    TaskEngineConfig {
        plugin_service_api,
        artifacts_path,
        idle_interval: Duration::from_millis(50),
        eviction_delay: Duration::from_millis(150),
    }
}

async fn wait_for_terminal_state(
    engine: &std::sync::Arc<TaskEngine>,
    id: Uuid,
    timeout: Duration,
) -> ScanSessionState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(summary) = engine.get_session_summary(id).await {
            if matches!(
                summary.state,
                ScanSessionState::Finished | ScanSessionState::Failed | ScanSessionState::Stopped
            ) {
                return summary.state;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("scan {id} did not reach a terminal state in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn two_plugin_plan_runs_to_finished_and_collects_issues() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;

    let engine = TaskEngine::new(engine_config(api, artifacts.path().to_path_buf()), MemoryScanStore::new());

    let plan = plan::find_plan("tickle").unwrap();
    let summary = engine
        .create_session(plan, serde_json::json!({"target": "http://example.com"}))
        .await
        .unwrap();
    assert_eq!(summary.state, ScanSessionState::Created);
    assert_eq!(summary.sessions.len(), 2);

    assert!(engine.start_session(summary.id).await.unwrap());

    let final_state = wait_for_terminal_state(&engine, summary.id, Duration::from_secs(10)).await;
    assert_eq!(final_state, ScanSessionState::Finished);

    let (results, token) = engine.get_session_results(summary.id, "").await.unwrap();
    assert!(token.is_none(), "no more results to resume once every plugin session is terminal");
    let total_issues: usize = results.sessions.iter().map(|s| s.issues.len()).sum();
    assert_eq!(total_issues, 2, "HSTSPlugin and XFrameOptionsPlugin each report one issue");
}

#[tokio::test]
async fn plan_with_a_failing_plugin_marks_the_scan_failed() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;

    let engine = TaskEngine::new(engine_config(api, artifacts.path().to_path_buf()), MemoryScanStore::new());

    let plan = plan::find_plan("stomp").unwrap();
    let summary = engine.create_session(plan, serde_json::json!({})).await.unwrap();
    engine.start_session(summary.id).await.unwrap();

    let final_state = wait_for_terminal_state(&engine, summary.id, Duration::from_secs(10)).await;
    assert_eq!(final_state, ScanSessionState::Failed);
}

#[tokio::test]
async fn stopping_a_long_running_plan_lands_on_stopped() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;

    let engine = TaskEngine::new(engine_config(api, artifacts.path().to_path_buf()), MemoryScanStore::new());

    let plan = plan::find_plan("punch").unwrap();
    let summary = engine.create_session(plan, serde_json::json!({})).await.unwrap();
    engine.start_session(summary.id).await.unwrap();

    // give the idler a couple of ticks to actually start the plugin process
    // before asking it to stop.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.stop_session(summary.id, false).await.unwrap());

    let final_state = wait_for_terminal_state(&engine, summary.id, Duration::from_secs(10)).await;
    assert_eq!(final_state, ScanSessionState::Stopped);
}

#[tokio::test]
async fn resolved_plan_descriptions_include_plugin_metadata() {
    let work_root = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let api = spawn_plugin_service(work_root.path()).await;

    let engine = TaskEngine::new(engine_config(api, artifacts.path().to_path_buf()), MemoryScanStore::new());

    assert!(engine.get_plan_descriptions().iter().any(|p| p.name == "tickle"));

    let resolved = engine.get_plan("tickle").await.unwrap().unwrap();
    assert_eq!(resolved.workflow.len(), 2);
    assert!(resolved.workflow[0].plugin.is_some());

    assert!(engine.get_plan("no-such-plan").await.unwrap().is_none());
}
