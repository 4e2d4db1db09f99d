//! Relay route configuration
//!
//! The endpoint set depends on the relay mode; see
//! [`crate::handlers::relay`].

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::RelayMode;
use crate::handlers::relay::{
    downstream_handler, health_handler, unknown_path_handler, upstream_handler,
};
use crate::state::AppState;

/// Create the relay router
///
/// # Endpoints
///
/// - `GET /` - health check, returns `ok`
/// - `GET /model` or `/provider` - upstream WebSocket
/// - `GET /client` or `/consumer` - downstream WebSocket
///
/// WebSocket connections on any other path are accepted and closed.
pub fn create_relay_router(mode: RelayMode) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_handler))
        .route(mode.upstream_path(), get(upstream_handler))
        .route(mode.downstream_path(), get(downstream_handler))
        .fallback(unknown_path_handler)
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on `listener` until the server stops.
pub async fn serve_relay(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let app = create_relay_router(state.mode()).with_state(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
