//! HTTP router configuration.
//!
//! Everything that is not an `/_edge/*` endpoint or an admin route goes to
//! [`dispatch`].

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::{AdminState, build_admin_router};
use crate::handler::{dispatch, health_check, readiness_check};
use crate::state::AppState;

/// Admin API configuration for router.
pub struct AdminRouterConfig {
    /// Admin API prefix (e.g., "/admin").
    pub prefix: String,
    /// Admin authentication token.
    pub token: String,
}

/// Build the main application router.
///
/// Routes:
/// - `GET /_edge/health` - Liveness
/// - `GET /_edge/ready` - Hydration state
/// - anything else - static asset or guest
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    build_router_with_admin(state, request_timeout, None)
}

/// Build the main application router with optional Admin API.
pub fn build_router_with_admin(
    state: AppState,
    request_timeout: Duration,
    admin_config: Option<AdminRouterConfig>,
) -> Router {
    let mut router = Router::new()
        .route("/_edge/health", get(health_check))
        .route("/_edge/ready", get(readiness_check));

    if let Some(config) = admin_config {
        let admin_state = AdminState {
            app_state: state.clone(),
            admin_token: config.token,
        };
        router = router.nest(&config.prefix, build_admin_router(admin_state));
    }

    router
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
