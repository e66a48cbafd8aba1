//! Request handlers.
//!
//! [`dispatch`] is the router fallback: static assets are tried first, then
//! the guest. It never fails outward; every error becomes a plain-text 500
//! carrying the error message.

use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tracing::{debug, error, info, instrument};

use edge_bundle_core::HydrationState;

use crate::request::{MAX_REQUEST_BODY, to_guest_request};
use crate::response::WasmHttpResponse;
use crate::state::AppState;

/// Route a request to a static asset or to the guest.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();

    let path = request.uri().path().to_string();
    let is_read = matches!(*request.method(), Method::GET | Method::HEAD);

    if is_read && state.routes().is_static(&path) {
        match serve_static(&state, &path).await {
            Ok(Some(response)) => {
                debug!(duration_ms = start.elapsed().as_millis(), "Served static asset");
                return response.into_axum_response();
            }
            Ok(None) => debug!("Static asset miss, falling through to guest"),
            Err(message) => {
                error!(error = %message, "Static asset fetch failed");
                return WasmHttpResponse::text(500, &message).into_axum_response();
            }
        }
    }

    let response = match run_guest(&state, request).await {
        Ok(response) => {
            info!(
                status = response.status,
                duration_ms = start.elapsed().as_millis(),
                "Request completed"
            );
            response
        }
        Err(message) => {
            error!(
                error = %message,
                duration_ms = start.elapsed().as_millis(),
                "Request failed"
            );
            WasmHttpResponse::text(500, &message)
        }
    };

    response.into_axum_response()
}

async fn serve_static(state: &AppState, path: &str) -> Result<Option<WasmHttpResponse>, String> {
    let Some(asset) = state.assets().fetch(path).await.map_err(|e| e.to_string())? else {
        return Ok(None);
    };

    let content_type = asset.content_type.clone();
    let body = asset.collect().await.map_err(|e| e.to_string())?;

    let mut response = WasmHttpResponse {
        status: 200,
        headers: Vec::new(),
        body: body.to_vec(),
    };
    if let Some(content_type) = content_type {
        response = response.with_header("content-type", &content_type);
    }
    Ok(Some(response))
}

async fn run_guest(state: &AppState, request: Request<Body>) -> Result<WasmHttpResponse, String> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| format!("Failed to read request body: {e}"))?;

    let runtime = state.runtime();
    runtime
        .ensure_filesystem_ready()
        .await
        .map_err(|e| e.to_string())?;

    let response = runtime
        .handle_request(to_guest_request(&parts, body))
        .await
        .map_err(|e| e.to_string())?;

    Ok(response.into())
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Reports the hydration state. Only a failed hydration is unready: the
/// filesystem is built on the first guest request, so a server that has not
/// hydrated yet can still take traffic.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.runtime().status();

    let code = if status.hydration == HydrationState::Failed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = serde_json::json!({
        "status": if code == StatusCode::OK { "ready" } else { "failed" },
        "hydration": status.hydration,
        "error": status.hydration_error,
    });

    (code, axum::Json(body))
}
