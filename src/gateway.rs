//! HTTP ingress.
//!
//! Two entry points into the engine. [`build_request`] assembles a
//! decision request from the pieces of an inbound HTTP request and its
//! already-decoded token claims, for embedding warden in front of a
//! service. [`app`] exposes the engine as a small axum service with a
//! JSON decision endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::request::{Context, RawHttpRequest, Request};
use crate::warden::{AccessError, Warden};

/// Claim names the ingress turns into `user:` subjects.
pub const CLAIM_EMAIL: &str = "email";
pub const CLAIM_USERNAME: &str = "username";

/// Build a decision request from an inbound HTTP request.
///
/// The method becomes the action; `user:<email>` and `user:<username>`
/// subjects are derived from the reserved claim names; the remote
/// address, header values (minus `Authorization`), query parameters and
/// remaining claims land in the context; and the raw request itself is
/// attached for body-inspecting conditions. Claims arrive already
/// decoded — token verification happens upstream.
pub fn build_request(
    method: &str,
    resource: impl Into<String>,
    remote_addr: Option<&str>,
    headers: &HeaderMap,
    query: &[(String, String)],
    claims: &serde_json::Map<String, Value>,
    body: Vec<u8>,
) -> Request {
    let mut subjects = Vec::new();
    let mut context = Context::new();

    if let Some(addr) = remote_addr {
        context.insert("remoteIP", Value::String(addr.to_string()));
    }

    for (key, value) in claims {
        context.insert(key.clone(), value.clone());
    }
    if let Some(Value::String(email)) = claims.get(CLAIM_EMAIL) {
        subjects.push(format!("user:{email}"));
        context.remove(CLAIM_EMAIL);
    }
    if let Some(Value::String(username)) = claims.get(CLAIM_USERNAME) {
        subjects.push(format!("user:{username}"));
        context.remove(CLAIM_USERNAME);
    }

    let mut raw_headers = Vec::new();
    for name in headers.keys() {
        let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) else {
            continue;
        };
        raw_headers.push((name.as_str().to_string(), value.to_string()));
        if name != &AUTHORIZATION {
            context.insert(name.as_str(), Value::String(value.to_string()));
        }
    }

    let mut grouped: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for (key, value) in query {
        grouped
            .entry(key.as_str())
            .or_default()
            .push(Value::String(value.clone()));
    }
    for (key, values) in grouped {
        context.insert(key, Value::Array(values));
    }

    context.set_raw_request(Arc::new(RawHttpRequest::new(raw_headers, body)));

    Request {
        resource: resource.into(),
        action: method.to_string(),
        subjects,
        context,
    }
}

/// Shared state behind the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub warden: Arc<Warden>,
    /// Maximum accepted request body size in bytes (None => axum default).
    pub max_request_bytes: Option<usize>,
}

/// Build the axum router. The decision endpoint answers 200 for granted
/// requests and 403 for both explicit denials and requests no policy
/// covers.
pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .route("/decisions", post(decide_handler))
        .route("/healthz", get(healthz_handler));

    let router = if let Some(limit) = state.max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

#[derive(Debug, Serialize)]
struct DecisionResponse {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn decide_handler(
    State(state): State<AppState>,
    payload: Result<Json<Request>, JsonRejection>,
) -> axum::response::Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection.into_response(),
    };

    match state.warden.is_allowed(&request) {
        Ok(()) => (
            StatusCode::OK,
            Json(DecisionResponse {
                allowed: true,
                reason: None,
            }),
        )
            .into_response(),
        Err(error) if error.is_forbidden() => (
            StatusCode::FORBIDDEN,
            Json(DecisionResponse {
                allowed: false,
                reason: Some(error.to_string()),
            }),
        )
            .into_response(),
        Err(AccessError::InvalidRequest(cause)) => (
            StatusCode::BAD_REQUEST,
            Json(DecisionResponse {
                allowed: false,
                reason: Some(format!("invalid request: {cause}")),
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "decision failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DecisionResponse {
                    allowed: false,
                    reason: Some("storage failure".to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn healthz_handler() -> axum::response::Response {
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body)).into_response()
}
