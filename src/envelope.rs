use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Every JSON response in this system shares the `{success, ...}` envelope
/// described by the HTTP surfaces. Handlers build one of these instead of
/// returning raw `Json<T>` so the shape stays consistent across both
/// services.
pub struct Envelope(Value);

impl Envelope {
    pub fn ok(fields: Value) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("success".to_string(), Value::Bool(true));
        if let Value::Object(extra) = fields {
            map.extend(extra);
        }
        Envelope(Value::Object(map))
    }

    pub fn ok_empty() -> Self {
        Envelope(json!({ "success": true }))
    }

    pub fn err(error: impl Into<String>) -> Self {
        Envelope(json!({ "success": false, "error": error.into() }))
    }

    pub fn ok_with<T: Serialize>(key: &str, value: &T) -> Self {
        Self::ok(json!({ key: value }))
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        // Client-input errors travel inside the envelope at HTTP 200 per the
        // error handling design; only resource-absent / malformed-request
        // failures use real status codes, and those are built with
        // `IntoResponse` tuples directly by the handlers rather than here.
        (StatusCode::OK, Json(self.0)).into_response()
    }
}
