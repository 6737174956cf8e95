use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::TaskEngineError;
use crate::plan::{self, Plan, PlanSummary, WorkflowStep};
use crate::plugin_descriptor::PluginDescriptor;

use super::client::PluginServiceClient;
use super::session::{ScanResultsView, ScanSession, ScanSessionSummary};
use super::store::ScanStore;

#[derive(Debug, Clone)]
pub struct TaskEngineConfig {
    pub plugin_service_api: String,
    pub artifacts_path: PathBuf,
    pub idle_interval: Duration,
    pub eviction_delay: Duration,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        TaskEngineConfig {
            plugin_service_api: "http://127.0.0.1:8181".to_string(),
            artifacts_path: PathBuf::from("/tmp"),
            idle_interval: Duration::from_secs(2),
            eviction_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResolvedStep {
    pub plugin_name: String,
    pub description: String,
    pub configuration: Value,
    pub plugin: Option<PluginDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedPlan {
    pub name: String,
    pub description: String,
    pub workflow: Vec<ResolvedStep>,
}

type ScanHandle = Arc<Mutex<ScanSession>>;

/// Collection of live Scan Sessions plus the single periodic reconciliation
/// driver shared across all of them. The idler is started lazily the first
/// time any scan is created, not one-per-scan.
pub struct TaskEngine {
    config: TaskEngineConfig,
    client: PluginServiceClient,
    store: Arc<dyn ScanStore>,
    sessions: RwLock<HashMap<Uuid, ScanHandle>>,
    idler_started: AtomicBool,
}

impl TaskEngine {
    pub fn new(config: TaskEngineConfig, store: Arc<dyn ScanStore>) -> Arc<Self> {
        let client = PluginServiceClient::new(config.plugin_service_api.clone());
        Arc::new(TaskEngine {
            config,
            client,
            store,
            sessions: RwLock::new(HashMap::new()),
            idler_started: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub fn get_plan_descriptions(&self) -> Vec<PlanSummary> {
        plan::plan_registry().iter().map(PlanSummary::from).collect()
    }

    pub async fn get_plan(&self, name: &str) -> Result<Option<ResolvedPlan>, TaskEngineError> {
        let Some(plan) = plan::find_plan(name) else {
            return Ok(None);
        };
        let mut workflow = Vec::with_capacity(plan.workflow.len());
        for step in &plan.workflow {
            workflow.push(self.resolve_step(step).await?);
        }
        Ok(Some(ResolvedPlan {
            name: plan.name,
            description: plan.description,
            workflow,
        }))
    }

    async fn resolve_step(&self, step: &WorkflowStep) -> Result<ResolvedStep, TaskEngineError> {
        let plugin = self.client.get_plugin(&step.plugin_name).await?;
        Ok(ResolvedStep {
            plugin_name: step.plugin_name.clone(),
            description: step.description.clone(),
            configuration: step.configuration.clone(),
            plugin,
        })
    }

    pub async fn create_session(
        self: &Arc<Self>,
        plan: Plan,
        configuration: Value,
    ) -> Result<ScanSessionSummary, TaskEngineError> {
        let mut scan = ScanSession::new(plan, configuration);
        scan.create(&self.client).await?;
        let id = scan.id;
        let summary = scan.summary();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(scan)));
        self.ensure_idler_started();
        Ok(summary)
    }

    async fn handle_of(&self, id: Uuid) -> Option<ScanHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn get_session_summary(&self, id: Uuid) -> Option<ScanSessionSummary> {
        let handle = self.handle_of(id).await?;
        let scan = handle.lock().await;
        Some(scan.summary())
    }

    pub async fn get_session_results(
        &self,
        id: Uuid,
        since: &str,
    ) -> Option<(ScanResultsView, Option<String>)> {
        let handle = self.handle_of(id).await?;
        let scan = handle.lock().await;
        Some(scan.results(since))
    }

    pub async fn start_session(&self, id: Uuid) -> Result<bool, TaskEngineError> {
        let handle = self.handle_of(id).await.ok_or(TaskEngineError::NoSuchScan(id))?;
        let mut scan = handle.lock().await;
        Ok(scan.start())
    }

    /// Stops a live scan. Per the observable semantics of the source this
    /// was grounded on, this returns as soon as the scan is marked
    /// STOPPING — it does not wait for the idler to actually drive it to
    /// STOPPED.
    pub async fn stop_session(&self, id: Uuid, delete: bool) -> Result<bool, TaskEngineError> {
        let handle = self.handle_of(id).await.ok_or(TaskEngineError::NoSuchScan(id))?;
        let mut scan = handle.lock().await;
        Ok(scan.stop(delete))
    }

    pub async fn session_exists(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    fn ensure_idler_started(self: &Arc<Self>) {
        if self.idler_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_idler().await });
    }

    async fn run_idler(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.idle_interval);
        loop {
            interval.tick().await;
            self.idle_tick().await;
        }
    }

    /// One reconciliation tick: every live scan gets at most the progress
    /// its own `idle()` call grants it. The outer map lock is held only
    /// long enough to snapshot which scans exist, never across an await —
    /// each scan's own mutex is what's held while that scan does network
    /// I/O, so one scan's slow Plugin Service call never stalls another's.
    async fn idle_tick(self: &Arc<Self>) {
        let handles: Vec<(Uuid, ScanHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        for (id, handle) in handles {
            let done = {
                let mut scan = handle.lock().await;
                scan.idle(&self.client, &self.config.artifacts_path, &self.store)
                    .await
            };
            if done {
                self.schedule_eviction(id);
            }
        }
    }

    fn schedule_eviction(self: &Arc<Self>, id: Uuid) {
        let engine = Arc::clone(self);
        let delay = self.config.eviction_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.sessions.write().await.remove(&id);
        });
    }
}
