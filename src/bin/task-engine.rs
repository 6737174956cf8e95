use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use scan_orchestrator::task_engine::routes::{router, AppState};
use scan_orchestrator::task_engine::{FileScanStore, MemoryScanStore, ScanStore, TaskEngine, TaskEngineConfig};

/// Composes plugin sessions into plan executions and drives them via the
/// reconciliation loop.
#[derive(Parser, Debug)]
#[command(name = "task-engine")]
struct Args {
    #[arg(short = 'H', long, env = "TASK_ENGINE_HOST")]
    host: Option<String>,

    #[arg(short = 'p', long, env = "TASK_ENGINE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "PLUGIN_SERVICE_API")]
    plugin_service_api: Option<String>,

    #[arg(long, env = "SCAN_DATABASE_TYPE")]
    scan_database_type: Option<String>,

    #[arg(long, env = "SCAN_DATABASE_LOCATION")]
    scan_database_location: Option<PathBuf>,

    #[arg(long, env = "ARTIFACTS_PATH")]
    artifacts_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    plugin_service_api: Option<String>,
    scan_database_type: Option<String>,
    scan_database_location: Option<PathBuf>,
    artifacts_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "task_engine=info,tower_http=debug".into());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Args::parse();
    let file_config: FileConfig = scan_orchestrator::config::load("task-engine")?.unwrap_or_default();

    let host = args.host.unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.unwrap_or(8182);
    let plugin_service_api = args
        .plugin_service_api
        .or(file_config.plugin_service_api)
        .unwrap_or_else(|| "http://127.0.0.1:8181".to_string());
    let scan_database_type = args
        .scan_database_type
        .or(file_config.scan_database_type)
        .unwrap_or_else(|| "memory".to_string());
    let scan_database_location = args.scan_database_location.or(file_config.scan_database_location);
    let artifacts_path = args
        .artifacts_path
        .or(file_config.artifacts_path)
        .unwrap_or_else(|| PathBuf::from("/tmp"));

    // Unknown scan_database_type is one of the two unrecoverable
    // misconfigurations this system recognizes at startup.
    let store: Arc<dyn ScanStore> = match scan_database_type.as_str() {
        "memory" => MemoryScanStore::new(),
        "files" => {
            let location = scan_database_location.unwrap_or_else(|| PathBuf::from("/tmp/scans"));
            FileScanStore::new(location)
        }
        other => anyhow::bail!("unable to configure scan_database_type '{other}': no such type"),
    };

    let config = TaskEngineConfig {
        plugin_service_api,
        artifacts_path: artifacts_path.clone(),
        idle_interval: Duration::from_secs(2),
        eviction_delay: Duration::from_secs(60),
    };
    tracing::info!(plugin_service_api = %config.plugin_service_api, scan_database_type, "task engine starting");

    let engine = TaskEngine::new(config, store);
    let app = router(AppState { engine, artifacts_path }).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!(%addr, "task-engine listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
