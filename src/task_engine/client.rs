use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

use crate::error::TaskEngineError;
use crate::plugin_descriptor::PluginDescriptor;
use crate::plugin_service::session::PluginSessionSummary;

/// Outbound HTTP client used by the reconciliation loop to drive the Plugin
/// Service. Every call here is a suspension point per the concurrency
/// model — none of them are made while holding a lock on the live-scan map.
pub struct PluginServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl PluginServiceClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is valid");
        PluginServiceClient { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn get_plugin(&self, name: &str) -> Result<Option<PluginDescriptor>, TaskEngineError> {
        let response = self.http.get(self.url(&format!("/plugin/{name}"))).send().await?;
        let body: Value = response.json().await?;
        if body["success"].as_bool().unwrap_or(false) {
            Ok(serde_json::from_value(body["plugin"].clone()).ok())
        } else {
            Ok(None)
        }
    }

    pub async fn create_session(
        &self,
        plugin_name: &str,
        configuration: &Value,
    ) -> Result<PluginSessionSummary, TaskEngineError> {
        let response = self
            .http
            .put(self.url(&format!("/session/create/{plugin_name}")))
            .json(configuration)
            .send()
            .await?;
        let body: Value = response.json().await?;
        if body["success"].as_bool().unwrap_or(false) {
            serde_json::from_value(body["session"].clone())
                .map_err(|e| TaskEngineError::Store(std::io::Error::other(e)))
        } else {
            Err(TaskEngineError::NoSuchScan(Uuid::nil()))
        }
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<PluginSessionSummary>, TaskEngineError> {
        let response = self.http.get(self.url(&format!("/session/{id}"))).send().await?;
        let body: Value = response.json().await?;
        if body["success"].as_bool().unwrap_or(false) {
            Ok(serde_json::from_value(body["session"].clone()).ok())
        } else {
            Ok(None)
        }
    }

    pub async fn set_state(&self, id: Uuid, body: &str) -> Result<(), TaskEngineError> {
        let response = self
            .http
            .put(self.url(&format!("/session/{id}/state")))
            .body(body.to_string())
            .send()
            .await?;
        let value: Value = response.json().await?;
        if value["success"].as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(TaskEngineError::InvalidStateTransition)
        }
    }

    pub async fn get_results(&self, id: Uuid) -> Result<(PluginSessionSummary, Vec<Value>), TaskEngineError> {
        let response = self.http.get(self.url(&format!("/session/{id}/results"))).send().await?;
        let body: Value = response.json().await?;
        let summary = serde_json::from_value(body["session"].clone())
            .map_err(|e| TaskEngineError::Store(std::io::Error::other(e)))?;
        let issues = body["issues"].as_array().cloned().unwrap_or_default();
        Ok((summary, issues))
    }

    pub async fn get_artifacts(&self, id: Uuid) -> Result<Option<Vec<u8>>, TaskEngineError> {
        let response = self.http.get(self.url(&format!("/session/{id}/artifacts"))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<(), TaskEngineError> {
        self.http.delete(self.url(&format!("/session/{id}"))).send().await?;
        Ok(())
    }
}
