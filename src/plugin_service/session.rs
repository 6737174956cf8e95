use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::plugin_descriptor::PluginDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginSessionState {
    Created,
    Started,
    Stopping,
    Finished,
    Failed,
    Stopped,
}

impl PluginSessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PluginSessionState::Finished | PluginSessionState::Failed | PluginSessionState::Stopped
        )
    }
}

/// One plugin execution: process handle, state, collected issues, and
/// artifact manifest. The process handle itself is never serialized — only
/// `PluginSessionSummary` crosses the HTTP boundary.
pub struct PluginSession {
    pub id: Uuid,
    pub plugin_name: String,
    pub plugin_descriptor: PluginDescriptor,
    pub configuration: Value,
    pub state: PluginSessionState,
    pub started: Option<i64>,
    pub duration: Option<i64>,
    pub progress: Option<Value>,
    pub results: Vec<Value>,
    pub errors: Vec<Value>,
    pub artifacts: BTreeMap<String, BTreeSet<String>>,
    pub work_directory: PathBuf,
    pub artifact_zip_path: PathBuf,
    pub pid: Option<u32>,
}

impl PluginSession {
    pub fn new(
        id: Uuid,
        plugin_name: String,
        plugin_descriptor: PluginDescriptor,
        configuration: Value,
        work_directory_root: &std::path::Path,
    ) -> Self {
        PluginSession {
            id,
            plugin_name,
            plugin_descriptor,
            configuration,
            state: PluginSessionState::Created,
            started: None,
            duration: None,
            progress: None,
            results: Vec::new(),
            errors: Vec::new(),
            artifacts: BTreeMap::new(),
            work_directory: work_directory_root.join(id.to_string()),
            artifact_zip_path: work_directory_root.join(format!("{id}.zip")),
            pid: None,
        }
    }

    pub fn mark_started(&mut self, pid: u32) {
        self.state = PluginSessionState::Started;
        self.started = Some(Utc::now().timestamp());
        self.pid = Some(pid);
    }

    pub fn mark_exit(&mut self, clean: bool) {
        if let Some(started) = self.started {
            self.duration = Some((Utc::now().timestamp() - started).max(0));
        }
        // A `report_finish` callback may have already landed the session on
        // a terminal state (e.g. STOPPED) before the process actually
        // exits; once terminal, a session never leaves it.
        if self.state.is_terminal() {
            return;
        }
        if self.state == PluginSessionState::Stopping {
            self.state = PluginSessionState::Stopped;
        } else {
            self.state = if clean {
                PluginSessionState::Finished
            } else {
                PluginSessionState::Failed
            };
        }
    }

    pub fn flatten_artifacts(&self) -> BTreeMap<String, Vec<String>> {
        self.artifacts
            .iter()
            .map(|(name, paths)| (name.clone(), paths.iter().cloned().collect()))
            .collect()
    }

    pub fn summary(&self) -> PluginSessionSummary {
        PluginSessionSummary {
            id: self.id,
            plugin_name: self.plugin_name.clone(),
            plugin: self.plugin_descriptor.clone(),
            configuration: self.configuration.clone(),
            state: self.state,
            started: self.started,
            duration: self.duration,
            progress: self.progress.clone(),
            artifacts: self.flatten_artifacts(),
        }
    }
}

/// The wire representation of a `PluginSession`. Issues are deliberately
/// absent here — they are only ever returned by the dedicated results
/// endpoint, never embedded in a plain session summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSessionSummary {
    pub id: Uuid,
    pub plugin_name: String,
    pub plugin: PluginDescriptor,
    pub configuration: Value,
    pub state: PluginSessionState,
    pub started: Option<i64>,
    pub duration: Option<i64>,
    pub progress: Option<Value>,
    pub artifacts: BTreeMap<String, Vec<String>>,
}
