//! Reference plugin-runner: a minimal stand-in for the real plugin-runner
//! binary, implementing just enough of its observable HTTP contract
//! (fetch configuration, report progress/issues/artifacts, report finish)
//! to exercise the Plugin Service end to end. It does not scan anything —
//! each "plugin" it impersonates is a scripted sequence of callbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    plugin: String,

    #[arg(long)]
    work_root: PathBuf,

    #[arg(long)]
    session_id: Uuid,

    #[arg(long)]
    mode: String,

    #[arg(long)]
    plugin_service_api: String,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = format!(
        "{}/session/{}",
        args.plugin_service_api.trim_end_matches('/'),
        args.session_id
    );

    match args.plugin.as_str() {
        "FailingPlugin" => {
            eprintln!("FailingPlugin always exits non-zero without reporting anything");
            std::process::exit(1);
        }
        "HSTSPlugin" => {
            report_issue(&client, &base, "Strict-Transport-Security header is missing").await?;
            report_finish(&client, &base, "FINISHED").await?;
        }
        "XFrameOptionsPlugin" => {
            report_issue(&client, &base, "X-Frame-Options header is missing").await?;
            report_finish(&client, &base, "FINISHED").await?;
        }
        "IssueGeneratingPlugin" => {
            run_issue_generator(&client, &base).await?;
            report_finish(&client, &base, "FINISHED").await?;
        }
        "LongRunningPlugin" => {
            let stopped = run_until_stopped(&client, &base).await;
            report_finish(&client, &base, if stopped { "STOPPED" } else { "FINISHED" }).await?;
        }
        "ReportGeneratingPlugin" => {
            run_with_artifact(&client, &base, &args.work_root, &args.session_id.to_string()).await?;
            report_finish(&client, &base, "FINISHED").await?;
        }
        other => {
            eprintln!("no such demo plugin: {other}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn report_progress(client: &reqwest::Client, base: &str, progress: serde_json::Value) -> anyhow::Result<()> {
    client.post(format!("{base}/report/progress")).json(&progress).send().await?;
    Ok(())
}

async fn report_issue(client: &reqwest::Client, base: &str, summary: &str) -> anyhow::Result<()> {
    client
        .post(format!("{base}/report/issues"))
        .json(&vec![json!({ "summary": summary, "severity": "medium" })])
        .send()
        .await?;
    Ok(())
}

async fn report_issues(client: &reqwest::Client, base: &str, summaries: &[&str]) -> anyhow::Result<()> {
    let issues: Vec<_> = summaries
        .iter()
        .map(|s| json!({ "summary": s, "severity": "low" }))
        .collect();
    client.post(format!("{base}/report/issues")).json(&issues).send().await?;
    Ok(())
}

async fn report_finish(client: &reqwest::Client, base: &str, state: &str) -> anyhow::Result<()> {
    client
        .post(format!("{base}/report/finish"))
        .json(&json!({ "state": state }))
        .send()
        .await?;
    Ok(())
}

async fn run_issue_generator(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    report_progress(client, base, json!({ "percent": 0 })).await?;
    report_issues(client, base, &["synthetic issue 1", "synthetic issue 2", "synthetic issue 3"]).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    report_progress(client, base, json!({ "percent": 100 })).await?;
    report_issues(client, base, &["synthetic issue 4", "synthetic issue 5"]).await?;
    Ok(())
}

async fn run_with_artifact(
    client: &reqwest::Client,
    base: &str,
    work_root: &std::path::Path,
    session_id: &str,
) -> anyhow::Result<()> {
    let work_directory = work_root.join(session_id);
    tokio::fs::create_dir_all(&work_directory).await?;
    tokio::fs::write(work_directory.join("report.txt"), b"synthetic report contents\n").await?;
    client
        .post(format!("{base}/report/artifacts"))
        .json(&vec![json!({ "name": "Reports", "paths": ["report.txt"] })])
        .send()
        .await?;
    Ok(())
}

#[cfg(unix)]
async fn run_until_stopped(client: &reqwest::Client, base: &str) -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigusr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let _ = report_progress(client, base, json!({ "status": "running" })).await;
    tokio::select! {
        _ = sigusr1.recv() => true,
        _ = tokio::time::sleep(Duration::from_secs(3600)) => false,
    }
}

#[cfg(not(unix))]
async fn run_until_stopped(_client: &reqwest::Client, _base: &str) -> bool {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    false
}
