//! Admin API handlers for runtime inspection.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header to match the
//! configured admin token. The comparison runs in constant time.
//!
//! # Endpoints
//!
//! - `GET /admin/status` - Hydration state, guest hash and counters
//! - `GET /admin/fs?path=/app` - Stat a path in the virtual filesystem

use axum::{
    Extension, Json, Router,
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{instrument, warn};

use crate::state::AppState;

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    /// Application state.
    pub app_state: AppState,
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/status", get(runtime_status))
        .route("/fs", get(inspect_path))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, &'static str)> {
    let Some(token) = headers.get("X-Admin-Token") else {
        return Err((StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header"));
    };

    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected admin request with invalid token");
        Err((StatusCode::UNAUTHORIZED, "Invalid admin token"))
    }
}

/// Runtime status.
///
/// # Response
///
/// ```json
/// {
///   "hydration": "complete",
///   "hydration_error": null,
///   "guest_hash": "9f2c...",
///   "requests_served": 12,
///   "uptime_secs": 340,
///   "filesystem": { "directories": 41, "files": 388, "bytes": 5120334 }
/// }
/// ```
#[instrument(skip_all)]
pub async fn runtime_status(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    Json(admin_state.app_state.runtime().status()).into_response()
}

/// Query for [`inspect_path`].
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    /// Absolute path inside the virtual filesystem.
    #[serde(default = "root_path")]
    pub path: String,
}

fn root_path() -> String {
    "/".to_string()
}

/// A stat result for the admin API.
#[derive(Debug, Serialize)]
pub struct PathInfo {
    /// The path that was inspected.
    pub path: String,
    /// Whether it is a directory.
    pub is_dir: bool,
    /// File size in bytes.
    pub len: u64,
    /// Permission bits, in octal.
    pub mode: String,
    /// Child names, for directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
}

/// Stat a path in the virtual filesystem.
#[instrument(skip(admin_state, headers))]
pub async fn inspect_path(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let vfs = admin_state.app_state.runtime().vfs();
    let Some(meta) = vfs.metadata(&query.path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("No such path: {}", query.path)
            })),
        )
            .into_response();
    };

    Json(PathInfo {
        entries: if meta.is_dir {
            vfs.list_dir(&query.path)
        } else {
            None
        },
        path: query.path,
        is_dir: meta.is_dir,
        len: meta.len,
        mode: format!("{:o}", meta.mode),
    })
    .into_response()
}
