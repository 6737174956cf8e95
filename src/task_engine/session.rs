use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TaskEngineError;
use crate::issue::issues_since;
use crate::plan::Plan;
use crate::plugin_service::session::{PluginSessionState, PluginSessionSummary};

use super::client::PluginServiceClient;
use super::store::ScanStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanSessionState {
    Created,
    Started,
    Stopping,
    Finished,
    Failed,
    Stopped,
}

impl ScanSessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanSessionState::Finished | ScanSessionState::Failed | ScanSessionState::Stopped
        )
    }
}

/// Local cache of one remote plugin session's last-known state, plus the
/// issues fetched so far and whether final results have already been
/// pulled (`done`). This is the only place the reconciliation loop keeps
/// per-plugin-session bookkeeping.
#[derive(Debug, Clone)]
pub struct PluginSessionSnapshot {
    pub summary: PluginSessionSummary,
    pub issues: Vec<Value>,
    pub done: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanSessionSummary {
    pub id: Uuid,
    pub state: ScanSessionState,
    pub plan: Plan,
    pub configuration: Value,
    pub sessions: Vec<PluginSessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct PluginSessionIssuesView {
    pub id: Uuid,
    pub plugin: String,
    pub state: PluginSessionState,
    pub progress: Option<Value>,
    pub issues: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ScanResultsView {
    pub id: Uuid,
    pub state: ScanSessionState,
    pub sessions: Vec<PluginSessionIssuesView>,
}

/// One plan execution: plan, configuration, and the ordered list of
/// constituent plugin sessions' locally-cached remote state.
pub struct ScanSession {
    pub id: Uuid,
    pub plan: Plan,
    pub configuration: Value,
    pub state: ScanSessionState,
    pub plugin_sessions: Vec<PluginSessionSnapshot>,
    pub delete_when_stopped: bool,
}

impl ScanSession {
    pub fn new(plan: Plan, configuration: Value) -> Self {
        ScanSession {
            id: Uuid::new_v4(),
            plan,
            configuration,
            state: ScanSessionState::Created,
            plugin_sessions: Vec::new(),
            delete_when_stopped: false,
        }
    }

    /// Synchronously creates one remote plugin session per workflow step,
    /// in plan order, with the client's configuration overlaid on top of
    /// each step's base configuration (client keys win on conflict).
    pub async fn create(&mut self, client: &PluginServiceClient) -> Result<(), TaskEngineError> {
        let workflow = self.plan.workflow.clone();
        for step in workflow {
            let mut merged = step.configuration.clone();
            overlay(&mut merged, &self.configuration);
            let summary = client.create_session(&step.plugin_name, &merged).await?;
            self.plugin_sessions.push(PluginSessionSnapshot {
                summary,
                issues: Vec::new(),
                done: false,
            });
        }
        Ok(())
    }

    pub fn start(&mut self) -> bool {
        if self.state == ScanSessionState::Created {
            self.state = ScanSessionState::Started;
            true
        } else {
            false
        }
    }

    pub fn stop(&mut self, delete: bool) -> bool {
        self.delete_when_stopped = delete;
        if matches!(
            self.state,
            ScanSessionState::Stopping | ScanSessionState::Stopped
        ) {
            return true;
        }
        if self.state != ScanSessionState::Started {
            return false;
        }
        self.state = ScanSessionState::Stopping;
        true
    }

    pub fn summary(&self) -> ScanSessionSummary {
        ScanSessionSummary {
            id: self.id,
            state: self.state,
            plan: self.plan.clone(),
            configuration: self.configuration.clone(),
            sessions: self.plugin_sessions.iter().map(|s| s.summary.clone()).collect(),
        }
    }

    /// Returns the filtered results view plus the resumable cursor token,
    /// `None` once every plugin session is terminal (nothing left to
    /// resume from).
    pub fn results(&self, since: &str) -> (ScanResultsView, Option<String>) {
        if self.plugin_sessions.is_empty() {
            let view = ScanResultsView {
                id: self.id,
                state: self.state,
                sessions: Vec::new(),
            };
            return (view, Some(crate::token::encode(crate::issue::SENTINEL_SINCE)));
        }

        let mut max_date = since.to_string();
        let mut views = Vec::with_capacity(self.plugin_sessions.len());
        for snapshot in &self.plugin_sessions {
            let (filtered, snapshot_max) = issues_since(&snapshot.issues, since);
            if snapshot_max.as_str() > max_date.as_str() {
                max_date = snapshot_max;
            }
            views.push(PluginSessionIssuesView {
                id: snapshot.summary.id,
                plugin: snapshot.summary.plugin_name.clone(),
                state: snapshot.summary.state,
                progress: snapshot.summary.progress.clone(),
                issues: filtered.into_iter().cloned().collect(),
            });
        }

        let all_done = self
            .plugin_sessions
            .iter()
            .all(|s| s.summary.state.is_terminal());
        let token = if all_done {
            None
        } else {
            Some(crate::token::encode(&max_date))
        };

        (
            ScanResultsView {
                id: self.id,
                state: self.state,
                sessions: views,
            },
            token,
        )
    }

    fn all_plugin_sessions_done(&self) -> bool {
        self.plugin_sessions
            .iter()
            .all(|s| s.summary.state.is_terminal())
    }

    /// Advances this scan by at most one action per plugin session. Returns
    /// `true` once the scan itself has reached a terminal state and its
    /// constituent plugin sessions have been cleaned up — the caller should
    /// then schedule it for eviction from the live map.
    pub async fn idle(
        &mut self,
        client: &PluginServiceClient,
        artifacts_path: &Path,
        store: &Arc<dyn ScanStore>,
    ) -> bool {
        if self.state.is_terminal() {
            return true;
        }

        match self.state {
            ScanSessionState::Stopping => self.stop_sessions(client).await,
            ScanSessionState::Started => self.advance_one_plugin_session(client, artifacts_path).await,
            _ => {}
        }

        if !self.all_plugin_sessions_done() {
            return false;
        }

        self.finalize(store).await;
        self.delete_all_plugin_sessions(client).await;
        true
    }

    async fn stop_sessions(&mut self, client: &PluginServiceClient) {
        for snapshot in self.plugin_sessions.iter_mut() {
            if snapshot.summary.state.is_terminal()
                || snapshot.summary.state == PluginSessionState::Stopping
            {
                continue;
            }
            if let Err(e) = client.set_state(snapshot.summary.id, "STOP").await {
                tracing::warn!(
                    scan_id = %self.id,
                    plugin_session_id = %snapshot.summary.id,
                    error = %e,
                    "failed to stop plugin session, marking it failed locally"
                );
                snapshot.summary.state = PluginSessionState::Failed;
            }
        }
    }

    /// Per plugin session, in plan order: refresh its state if not
    /// terminal, then dispatch exactly one action and stop — this is the
    /// one-action-per-plugin-session-per-tick rule that bounds Plugin
    /// Service load regardless of how many scans are live.
    async fn advance_one_plugin_session(&mut self, client: &PluginServiceClient, artifacts_path: &Path) {
        for i in 0..self.plugin_sessions.len() {
            let snapshot = &mut self.plugin_sessions[i];
            if snapshot.summary.state.is_terminal() && snapshot.done {
                continue;
            }

            if !snapshot.summary.state.is_terminal() {
                match client.get_session(snapshot.summary.id).await {
                    Ok(Some(fresh)) => self.plugin_sessions[i].summary = fresh,
                    Ok(None) => {
                        self.plugin_sessions[i].summary.state = PluginSessionState::Failed;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(
                            scan_id = %self.id,
                            plugin_session_id = %self.plugin_sessions[i].summary.id,
                            error = %e,
                            "failed to refresh plugin session, marking it failed locally"
                        );
                        self.plugin_sessions[i].summary.state = PluginSessionState::Failed;
                        continue;
                    }
                }
            }

            match self.plugin_sessions[i].summary.state {
                PluginSessionState::Created => {
                    let session_id = self.plugin_sessions[i].summary.id;
                    if let Err(e) = client.set_state(session_id, "START").await {
                        tracing::warn!(
                            scan_id = %self.id,
                            plugin_session_id = %session_id,
                            error = %e,
                            "failed to start plugin session, marking it failed locally"
                        );
                        self.plugin_sessions[i].summary.state = PluginSessionState::Failed;
                    }
                    return;
                }
                PluginSessionState::Started | PluginSessionState::Finished if !self.plugin_sessions[i].done => {
                    let session_id = self.plugin_sessions[i].summary.id;
                    match client.get_results(session_id).await {
                        Ok((summary, issues)) => {
                            self.plugin_sessions[i].summary = summary;
                            self.plugin_sessions[i].issues = issues;
                            if self.plugin_sessions[i].summary.state == PluginSessionState::Finished
                                && !self.plugin_sessions[i].summary.artifacts.is_empty()
                            {
                                self.fetch_and_store_artifacts(client, artifacts_path, session_id)
                                    .await;
                            }
                            self.plugin_sessions[i].done = true;
                        }
                        Err(e) => {
                            tracing::warn!(
                                scan_id = %self.id,
                                plugin_session_id = %session_id,
                                error = %e,
                                "failed to fetch plugin session results, marking it failed locally"
                            );
                            self.plugin_sessions[i].summary.state = PluginSessionState::Failed;
                        }
                    }
                    return;
                }
                _ => continue,
            }
        }
    }

    async fn fetch_and_store_artifacts(
        &self,
        client: &PluginServiceClient,
        artifacts_path: &Path,
        plugin_session_id: Uuid,
    ) {
        match client.get_artifacts(plugin_session_id).await {
            Ok(Some(bytes)) => {
                let path = artifacts_path.join(format!("{plugin_session_id}.zip"));
                let parent = artifacts_path.to_path_buf();
                let write_result: std::io::Result<()> = async {
                    tokio::fs::create_dir_all(&parent).await?;
                    tokio::fs::write(&path, bytes).await
                }
                .await;
                if let Err(e) = write_result {
                    tracing::warn!(
                        scan_id = %self.id,
                        plugin_session_id = %plugin_session_id,
                        error = %e,
                        "failed to persist plugin artifact"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    scan_id = %self.id,
                    plugin_session_id = %plugin_session_id,
                    error = %e,
                    "failed to fetch plugin artifact"
                );
            }
        }
    }

    async fn finalize(&mut self, store: &Arc<dyn ScanStore>) {
        match self.state {
            ScanSessionState::Started => {
                let any_failed = self
                    .plugin_sessions
                    .iter()
                    .any(|s| s.summary.state == PluginSessionState::Failed);
                self.state = if any_failed {
                    ScanSessionState::Failed
                } else {
                    ScanSessionState::Finished
                };
                self.persist(store).await;
            }
            ScanSessionState::Stopping => {
                self.state = ScanSessionState::Stopped;
                if !self.delete_when_stopped {
                    self.persist(store).await;
                }
            }
            _ => {}
        }
    }

    async fn persist(&self, store: &Arc<dyn ScanStore>) {
        let value = serde_json::to_value(self.summary()).expect("scan summary always serializes");
        if let Err(e) = store.store(self.id, value).await {
            tracing::warn!(scan_id = %self.id, error = %e, "failed to persist finished scan");
        }
    }

    async fn delete_all_plugin_sessions(&self, client: &PluginServiceClient) {
        for snapshot in &self.plugin_sessions {
            if let Err(e) = client.delete_session(snapshot.summary.id).await {
                tracing::warn!(
                    scan_id = %self.id,
                    plugin_session_id = %snapshot.summary.id,
                    error = %e,
                    "failed to delete plugin session on the plugin service"
                );
            }
        }
    }
}

/// `overlay`'s keys win over `base`'s on conflict — this is the client
/// configuration taking precedence over a plan step's base configuration.
fn overlay(base: &mut Value, overlay_value: &Value) {
    if let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay_value) {
        for (key, value) in overlay_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plan() -> Plan {
        crate::plan::find_plan("tickle").unwrap()
    }

    #[test]
    fn start_only_valid_from_created() {
        let mut scan = ScanSession::new(sample_plan(), json!({}));
        assert!(scan.start());
        assert_eq!(scan.state, ScanSessionState::Started);
        assert!(!scan.start());
    }

    #[test]
    fn stop_only_valid_from_started() {
        let mut scan = ScanSession::new(sample_plan(), json!({}));
        assert!(!scan.stop(false));
        scan.start();
        assert!(scan.stop(true));
        assert_eq!(scan.state, ScanSessionState::Stopping);
        assert!(scan.delete_when_stopped);
    }

    #[test]
    fn stop_is_a_no_op_true_once_already_stopping() {
        let mut scan = ScanSession::new(sample_plan(), json!({}));
        scan.start();
        scan.stop(false);
        assert!(scan.stop(true));
    }

    #[test]
    fn overlay_lets_client_configuration_win() {
        let mut base = json!({"target": "default", "depth": 1});
        overlay(&mut base, &json!({"target": "http://example.com"}));
        assert_eq!(base["target"], "http://example.com");
        assert_eq!(base["depth"], 1);
    }
}
