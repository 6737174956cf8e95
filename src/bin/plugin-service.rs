use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use scan_orchestrator::plugin_service::routes::router;
use scan_orchestrator::plugin_service::{PluginService, PluginServiceConfig};

/// Owns plugin process lifecycle: spawning, cooperative stop, artifact
/// packaging, and the plugin-runner callback API.
#[derive(Parser, Debug)]
#[command(name = "plugin-service")]
struct Args {
    #[arg(short = 'H', long, env = "PLUGIN_SERVICE_HOST")]
    host: Option<String>,

    #[arg(short = 'p', long, env = "PLUGIN_SERVICE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "PLUGIN_SERVICE_WORK_ROOT")]
    work_root: Option<PathBuf>,

    #[arg(long, env = "PLUGIN_RUNNER_COMMAND")]
    runner_command: Option<String>,

    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    work_directory_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "plugin_service=info,tower_http=debug".into());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Args::parse();
    let file_config: FileConfig = scan_orchestrator::config::load("plugin-service")?.unwrap_or_default();

    let host = args.host.unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.unwrap_or(8181);
    let work_directory_root = args
        .work_root
        .or(file_config.work_directory_root)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    let runner_command = args.runner_command.unwrap_or_else(|| "plugin-runner".to_string());

    let base_url = format!("http://{host}:{port}");
    let config = PluginServiceConfig {
        work_directory_root,
        stop_grace_period: Duration::from_secs(30),
        runner_command,
        base_url,
        debug: args.debug,
    };

    tracing::info!(root = %config.work_directory_root.display(), "plugin service starting");
    let service = PluginService::new(config);
    let app = router(service).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!(%addr, "plugin-service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
