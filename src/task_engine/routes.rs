use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::TaskEngineError;
use crate::issue::SENTINEL_SINCE;
use crate::plan;

use super::engine::TaskEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TaskEngine>,
    pub artifacts_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/plan/:name", get(get_plan))
        .route("/scan/create/:plan_name", put(create_scan))
        .route("/scan/:id/state", axum::routing::post(change_scan_state))
        .route("/scan/:id", get(get_scan).delete(delete_scan))
        .route("/scan/:id/results", get(get_results))
        .route("/scan/:id/artifacts/:session_id", get(get_artifact))
        .with_state(state)
}

async fn list_plans(State(state): State<AppState>) -> Envelope {
    Envelope::ok(json!({ "plans": state.engine.get_plan_descriptions() }))
}

async fn get_plan(State(state): State<AppState>, Path(name): Path<String>) -> Envelope {
    match state.engine.get_plan(&name).await {
        Ok(Some(plan)) => Envelope::ok(json!({ "plan": plan })),
        Ok(None) => Envelope::err("no-such-plan"),
        Err(e) => {
            tracing::error!(error = %e, "get_plan failed");
            Envelope::err("internal-error")
        }
    }
}

const ALLOWED_CONFIGURATION_FIELDS: &[&str] = &["target"];

fn validate_target(candidate: &str) -> bool {
    let Ok(parsed) = url::Url::parse(candidate) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return false;
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return false;
    }
    true
}

fn validate_configuration(body: &Value) -> Option<Value> {
    let map = body.as_object()?;
    for key in map.keys() {
        if !ALLOWED_CONFIGURATION_FIELDS.contains(&key.as_str()) {
            return None;
        }
    }
    let target = map.get("target")?.as_str()?;
    if !validate_target(target) {
        return None;
    }
    Some(body.clone())
}

async fn create_scan(
    State(state): State<AppState>,
    Path(plan_name): Path<String>,
    Json(body): Json<Value>,
) -> Envelope {
    let Some(plan) = plan::find_plan(&plan_name) else {
        return Envelope::err("no-such-plan");
    };
    let Some(configuration) = validate_configuration(&body) else {
        return Envelope::err("invalid-configuration");
    };
    match state.engine.create_session(plan, configuration).await {
        Ok(summary) => Envelope::ok(json!({ "scan": summary })),
        Err(e) => {
            tracing::error!(error = %e, "create_session failed");
            Envelope::err("internal-error")
        }
    }
}

async fn change_scan_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Envelope {
    let requested = String::from_utf8_lossy(&body).trim().to_string();
    if requested != "START" && requested != "STOP" {
        return Envelope::err("unknown-state");
    }
    if !state.engine.session_exists(id).await {
        return Envelope::err("no-such-scan");
    }
    let accepted = if requested == "START" {
        state.engine.start_session(id).await
    } else {
        state.engine.stop_session(id, false).await
    };
    match accepted {
        Ok(true) => Envelope::ok_empty(),
        Ok(false) => Envelope::err("invalid-state-transition"),
        Err(TaskEngineError::NoSuchScan(_)) => Envelope::err("no-such-scan"),
        Err(e) => {
            tracing::error!(error = %e, "change_scan_state failed");
            Envelope::err("internal-error")
        }
    }
}

async fn get_scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> Envelope {
    match state.engine.store().load(id).await {
        Ok(Some(scan)) => return Envelope::ok(json!({ "scan": scan })),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "scan store load failed"),
    }
    match state.engine.get_session_summary(id).await {
        Some(summary) => Envelope::ok(json!({ "scan": summary })),
        None => Envelope::err("no-such-scan"),
    }
}

async fn delete_scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> Envelope {
    if state.engine.session_exists(id).await {
        // Fire-and-forget: the scan is marked STOPPING and the idler will
        // drive it to STOPPED; the client does not wait for that here.
        let _ = state.engine.stop_session(id, true).await;
        return Envelope::ok_empty();
    }

    match state.engine.store().load(id).await {
        Ok(Some(scan)) => {
            if let Err(e) = state.engine.store().delete(id).await {
                tracing::warn!(error = %e, "failed to delete stored scan");
            }
            Envelope::ok(json!({ "scan": scan }))
        }
        Ok(None) => Envelope::err("no-such-scan"),
        Err(e) => {
            tracing::error!(error = %e, "scan store load failed during delete");
            Envelope::err("internal-error")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    token: Option<String>,
}

async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Envelope {
    let since = match query.token {
        Some(token) => match crate::token::decode(&token) {
            Some(since) => since,
            None => return Envelope::err("malformed-token"),
        },
        None => SENTINEL_SINCE.to_string(),
    };

    match state.engine.get_session_results(id, &since).await {
        Some((results, token)) => Envelope::ok(json!({ "scan": results, "token": token })),
        None => Envelope::err("no-such-scan"),
    }
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((scan_id, session_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let scan_known = match state.engine.store().load(scan_id).await {
        Ok(Some(_)) => true,
        Ok(None) => state.engine.get_session_summary(scan_id).await.is_some(),
        Err(_) => state.engine.get_session_summary(scan_id).await.is_some(),
    };
    if !scan_known {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.artifacts_path.join(format!("{session_id}.zip"));
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/zip")],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
