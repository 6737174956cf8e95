use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::PluginServiceError;

use super::service::{ArtifactReport, PluginService};

pub fn router(service: Arc<PluginService>) -> Router {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugin/:name", get(get_plugin))
        .route("/session/create/:plugin_name", put(create_session))
        .route("/session/:id/state", put(set_state))
        .route(
            "/session/:id",
            get(get_session).delete(delete_session),
        )
        .route("/session/:id/results", get(get_results))
        .route("/session/:id/artifacts", get(get_artifacts))
        .route("/session/:id/configuration", get(get_configuration))
        // the plugin-runner callback API is specified as POST; PUT is also
        // accepted so the handlers are reachable the same way the rest of
        // this router's mutations are.
        .route(
            "/session/:id/report/progress",
            put(report_progress).post(report_progress),
        )
        .route(
            "/session/:id/report/issues",
            put(report_issues).post(report_issues),
        )
        .route(
            "/session/:id/report/artifacts",
            put(report_artifacts).post(report_artifacts),
        )
        .route(
            "/session/:id/report/errors",
            put(report_errors).post(report_errors),
        )
        .route(
            "/session/:id/report/finish",
            put(report_finish).post(report_finish),
        )
        .with_state(service)
}

async fn list_plugins(State(service): State<Arc<PluginService>>) -> Envelope {
    Envelope::ok(json!({ "plugins": service.list_plugins() }))
}

async fn get_plugin(
    State(service): State<Arc<PluginService>>,
    Path(name): Path<String>,
) -> Envelope {
    match service.get_plugin(&name) {
        Some(plugin) => Envelope::ok(json!({ "plugin": plugin })),
        None => Envelope::err("no-such-plugin"),
    }
}

async fn create_session(
    State(service): State<Arc<PluginService>>,
    Path(plugin_name): Path<String>,
    Json(configuration): Json<Value>,
) -> Envelope {
    match service.create_session(&plugin_name, configuration).await {
        Ok(summary) => Envelope::ok(json!({ "session": summary })),
        Err(PluginServiceError::NoSuchPlugin(_)) => Envelope::err("no-such-plugin"),
        Err(e) => {
            tracing::error!(error = %e, "create_session failed");
            Envelope::err("internal-error")
        }
    }
}

async fn set_state(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Envelope {
    let body = String::from_utf8_lossy(&body);
    match service.set_state(id, body.trim()).await {
        Ok(()) => Envelope::ok_empty(),
        Err(PluginServiceError::NoSuchSession(_)) => Envelope::err("no-such-session"),
        Err(PluginServiceError::UnknownState(_)) => Envelope::err("unknown-state"),
        Err(PluginServiceError::UnknownStateTransition) => Envelope::err("unknown-state-transition"),
        Err(e) => {
            tracing::error!(error = %e, "set_state failed");
            Envelope::err("internal-error")
        }
    }
}

async fn get_session(State(service): State<Arc<PluginService>>, Path(id): Path<Uuid>) -> Envelope {
    match service.get_session(id).await {
        Some(summary) => Envelope::ok(json!({ "session": summary })),
        None => Envelope::err("no-such-session"),
    }
}

async fn delete_session(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
) -> Envelope {
    match service.delete_session(id).await {
        Ok(()) => Envelope::ok_empty(),
        Err(PluginServiceError::NoSuchSession(_)) => Envelope::err("no-such-session"),
        Err(PluginServiceError::InvalidState) => Envelope::err("invalid-state"),
        Err(e) => {
            tracing::error!(error = %e, "delete_session failed");
            Envelope::err("internal-error")
        }
    }
}

async fn get_results(State(service): State<Arc<PluginService>>, Path(id): Path<Uuid>) -> Envelope {
    match service.get_session_results(id).await {
        Some((summary, issues)) => Envelope::ok(json!({ "session": summary, "issues": issues })),
        None => Envelope::err("no-such-session"),
    }
}

async fn get_artifacts(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
) -> Response {
    match service.artifact_bytes(id).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{id}.zip\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(PluginServiceError::NoSuchSession(_)) => {
            Json(json!({"success": false, "error": "no-such-session"})).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "get_artifacts failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Plugin-runner callback: fetches the raw configuration, unwrapped by the
/// usual envelope, since this endpoint is consumed by the runner, not a
/// human client. An unknown session is still a client input error per the
/// envelope convention, not a 404 — 404 is reserved for an absent resource
/// (e.g. a missing artifact) on a session that does exist.
async fn get_configuration(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
) -> Response {
    match service.get_configuration(id).await {
        Some(configuration) => Json(configuration).into_response(),
        None => Json(json!({"success": false, "error": "no-such-session"})).into_response(),
    }
}

async fn report_progress(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    Json(progress): Json<Value>,
) -> Envelope {
    match service.report_progress(id, progress).await {
        Ok(()) => Envelope::ok_empty(),
        Err(_) => Envelope::err("no-such-session"),
    }
}

async fn report_issues(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    Json(issues): Json<Vec<Value>>,
) -> Envelope {
    match service.report_issues(id, issues).await {
        Ok(()) => Envelope::ok_empty(),
        Err(_) => Envelope::err("no-such-session"),
    }
}

async fn report_artifacts(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    Json(reports): Json<Vec<ArtifactReport>>,
) -> Envelope {
    match service.report_artifacts(id, reports).await {
        Ok(()) => Envelope::ok_empty(),
        Err(_) => Envelope::err("no-such-session"),
    }
}

async fn report_errors(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    Json(error): Json<Value>,
) -> Envelope {
    match service.report_errors(id, error).await {
        Ok(()) => Envelope::ok_empty(),
        Err(_) => Envelope::err("no-such-session"),
    }
}

async fn report_finish(
    State(service): State<Arc<PluginService>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Envelope {
    let state = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => value
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(_) => String::new(),
    };
    match service.report_finish(id, &state).await {
        Ok(()) => Envelope::ok_empty(),
        Err(PluginServiceError::NoSuchSession(_)) => Envelope::err("no-such-session"),
        Err(_) => Envelope::err("unknown-state"),
    }
}
