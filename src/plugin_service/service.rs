use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PluginServiceError;
use crate::issue::stamp_issues;
use crate::plugin_descriptor::{self, PluginDescriptor};

use super::session::{PluginSession, PluginSessionState, PluginSessionSummary};

#[derive(Debug, Clone)]
pub struct PluginServiceConfig {
    pub work_directory_root: PathBuf,
    pub stop_grace_period: Duration,
    pub runner_command: String,
    pub base_url: String,
    pub debug: bool,
}

impl Default for PluginServiceConfig {
    fn default() -> Self {
        PluginServiceConfig {
            work_directory_root: PathBuf::from("/tmp"),
            stop_grace_period: Duration::from_secs(30),
            runner_command: "plugin-runner".to_string(),
            base_url: "http://127.0.0.1:8181".to_string(),
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtifactReport {
    pub name: String,
    pub paths: Vec<String>,
}

/// Process-wide state of the Plugin Service: the static plugin class
/// registry plus the live session map. Session creation is a pure
/// allocation; nothing is spawned until an explicit START.
pub struct PluginService {
    config: PluginServiceConfig,
    sessions: RwLock<HashMap<Uuid, PluginSession>>,
}

impl PluginService {
    pub fn new(config: PluginServiceConfig) -> Arc<Self> {
        Arc::new(PluginService {
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn list_plugins(&self) -> Vec<PluginDescriptor> {
        plugin_descriptor::plugin_registry()
    }

    pub fn get_plugin(&self, name: &str) -> Option<PluginDescriptor> {
        plugin_descriptor::find_plugin(name)
    }

    pub async fn create_session(
        &self,
        plugin_name: &str,
        configuration: Value,
    ) -> Result<PluginSessionSummary, PluginServiceError> {
        let descriptor = plugin_descriptor::find_plugin(plugin_name)
            .ok_or_else(|| PluginServiceError::NoSuchPlugin(plugin_name.to_string()))?;
        let id = Uuid::new_v4();
        let session = PluginSession::new(
            id,
            plugin_name.to_string(),
            descriptor,
            configuration,
            &self.config.work_directory_root,
        );
        let summary = session.summary();
        self.sessions.write().await.insert(id, session);
        Ok(summary)
    }

    pub async fn get_session(&self, id: Uuid) -> Option<PluginSessionSummary> {
        self.sessions.read().await.get(&id).map(|s| s.summary())
    }

    pub async fn get_session_results(
        &self,
        id: Uuid,
    ) -> Option<(PluginSessionSummary, Vec<Value>)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id)?;
        Some((session.summary(), session.results.clone()))
    }

    pub async fn get_configuration(&self, id: Uuid) -> Option<Value> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|s| s.configuration.clone())
    }

    pub async fn set_state(self: &Arc<Self>, id: Uuid, body: &str) -> Result<(), PluginServiceError> {
        match body {
            "START" => self.start_session(id).await,
            "STOP" => self.stop_session(id).await,
            other => Err(PluginServiceError::UnknownState(other.to_string())),
        }
    }

    async fn start_session(self: &Arc<Self>, id: Uuid) -> Result<(), PluginServiceError> {
        let child = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or(PluginServiceError::NoSuchSession(id))?;
            if session.state != PluginSessionState::Created {
                return Err(PluginServiceError::UnknownStateTransition);
            }
            std::fs::create_dir_all(&session.work_directory).map_err(PluginServiceError::Spawn)?;
            let mut command = build_command(&self.config, session);
            let mut child = command.spawn().map_err(PluginServiceError::Spawn)?;
            let pid = child.id().ok_or_else(|| {
                PluginServiceError::Spawn(std::io::Error::other("child exited before pid was observed"))
            })?;
            session.mark_started(pid);
            capture_output(id, &mut child);
            child
        };

        let service = Arc::clone(self);
        tokio::spawn(async move { service.supervise_child(id, child).await });
        Ok(())
    }

    async fn supervise_child(self: Arc<Self>, id: Uuid, mut child: Child) {
        let status = child.wait().await;
        let clean = matches!(status, Ok(s) if s.success());

        let packaging = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(&id) else {
                return;
            };
            session.mark_exit(clean);
            if session.state == PluginSessionState::Finished && !session.artifacts.is_empty() {
                Some((
                    session.work_directory.clone(),
                    session.artifact_zip_path.clone(),
                    session.flatten_artifacts(),
                ))
            } else {
                None
            }
        };

        if let Some((work_directory, zip_path, manifest)) = packaging {
            let result =
                tokio::task::spawn_blocking(move || package_artifacts(&work_directory, &zip_path, &manifest))
                    .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(session_id = %id, error = %e, "artifact packaging failed"),
                Err(e) => tracing::warn!(session_id = %id, error = %e, "artifact packaging task panicked"),
            }
        }
    }

    async fn stop_session(self: &Arc<Self>, id: Uuid) -> Result<(), PluginServiceError> {
        let pid = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or(PluginServiceError::NoSuchSession(id))?;
            match session.state {
                PluginSessionState::Created => {
                    session.state = PluginSessionState::Stopped;
                    return Ok(());
                }
                PluginSessionState::Started => {
                    let pid = session.pid.ok_or(PluginServiceError::UnknownStateTransition)?;
                    session.state = PluginSessionState::Stopping;
                    pid
                }
                _ => return Err(PluginServiceError::UnknownStateTransition),
            }
        };

        send_signal(pid, libc::SIGUSR1);

        let service = Arc::clone(self);
        let grace = self.config.stop_grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            service.escalate_if_still_running(id, pid).await;
        });
        Ok(())
    }

    async fn escalate_if_still_running(&self, id: Uuid, pid: u32) {
        let still_stopping = matches!(
            self.sessions.read().await.get(&id).map(|s| s.state),
            Some(PluginSessionState::Stopping)
        );
        if still_stopping {
            tracing::warn!(session_id = %id, pid, "stop grace period elapsed, sending SIGKILL");
            send_signal(pid, libc::SIGKILL);
        }
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<(), PluginServiceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        if !session.state.is_terminal() {
            return Err(PluginServiceError::InvalidState);
        }
        sessions.remove(&id);
        Ok(())
    }

    pub async fn report_progress(&self, id: Uuid, progress: Value) -> Result<(), PluginServiceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        session.progress = Some(progress);
        Ok(())
    }

    pub async fn report_issues(&self, id: Uuid, issues: Vec<Value>) -> Result<(), PluginServiceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        session.results.extend(stamp_issues(issues));
        Ok(())
    }

    pub async fn report_artifacts(
        &self,
        id: Uuid,
        reports: Vec<ArtifactReport>,
    ) -> Result<(), PluginServiceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        for report in reports {
            session
                .artifacts
                .entry(report.name)
                .or_insert_with(BTreeSet::new)
                .extend(report.paths);
        }
        Ok(())
    }

    pub async fn report_errors(&self, id: Uuid, error: Value) -> Result<(), PluginServiceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        tracing::info!(session_id = %id, ?error, "plugin reported an error (accepted, no effect)");
        session.errors.push(error);
        Ok(())
    }

    pub async fn report_finish(&self, id: Uuid, state: &str) -> Result<(), PluginServiceError> {
        let requested = match state {
            "FINISHED" => PluginSessionState::Finished,
            "STOPPED" => PluginSessionState::Stopped,
            "FAILED" => PluginSessionState::Failed,
            other => return Err(PluginServiceError::UnknownState(other.to_string())),
        };
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(PluginServiceError::NoSuchSession(id))?;
        if !session.state.is_terminal() {
            session.state = requested;
        }
        Ok(())
    }

    pub async fn artifact_bytes(&self, id: Uuid) -> Result<Option<Vec<u8>>, PluginServiceError> {
        let path = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&id)
                .ok_or(PluginServiceError::NoSuchSession(id))?;
            session.artifact_zip_path.clone()
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PluginServiceError::Io(e)),
        }
    }
}

fn build_command(config: &PluginServiceConfig, session: &PluginSession) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(&config.runner_command);
    command
        .arg("--plugin")
        .arg(&session.plugin_name)
        .arg("--work-root")
        .arg(&config.work_directory_root)
        .arg("--session-id")
        .arg(session.id.to_string())
        .arg("--mode")
        .arg("plugin-service")
        .arg("--plugin-service-api")
        .arg(&config.base_url);
    if config.debug {
        command.arg("--debug");
    }
    command.current_dir(&session.work_directory);
    // Intentional isolation: the runner sees nothing of this process's
    // environment except PATH.
    command.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    command.kill_on_drop(true);
    command
}

fn capture_output(id: Uuid, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(session_id = %id, stream = "stdout", %line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(session_id = %id, stream = "stderr", %line);
            }
        });
    }
}

fn send_signal(pid: u32, signal: i32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, signal);
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}

fn package_artifacts(
    work_directory: &std::path::Path,
    zip_path: &std::path::Path,
    manifest: &BTreeMap<String, Vec<String>>,
) -> std::io::Result<()> {
    use std::io::Write;
    use zip::write::FileOptions;

    let file = std::fs::File::create(zip_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut seen = BTreeSet::new();
    for paths in manifest.values() {
        for rel in paths {
            if !seen.insert(rel.clone()) {
                continue;
            }
            let absolute = work_directory.join(rel);
            if absolute.is_dir() {
                for entry in walkdir::WalkDir::new(&absolute)
                    .into_iter()
                    .filter_map(Result::ok)
                {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let entry_rel = entry
                        .path()
                        .strip_prefix(work_directory)
                        .unwrap_or(entry.path());
                    writer.start_file(entry_rel.to_string_lossy(), options)?;
                    let mut source = std::fs::File::open(entry.path())?;
                    std::io::copy(&mut source, &mut writer)?;
                }
            } else if absolute.is_file() {
                writer.start_file(rel.clone(), options)?;
                let mut source = std::fs::File::open(&absolute)?;
                std::io::copy(&mut source, &mut writer)?;
            }
        }
    }
    writer.finish()?;
    Ok(())
}
