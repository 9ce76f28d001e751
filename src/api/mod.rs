//! REST API gateway over the event store
//!
//! This module provides authenticated HTTP endpoints for listing, reading
//! and operating on events and planned maintenance.
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **DaemonState** shared with the pollers; handlers read and mutate the
//!   event store through its own per-event exclusion
//! - **Bearer tokens** resolved against the secrets file to a user name
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (no authentication)
//! - `GET /api/v1/events` - List events, filtered by `device`, `kind`,
//!   `status`, `since`, `until`
//! - `GET /api/v1/events/{id}` - Single event
//! - `POST /api/v1/events/{id}/ack` - Acknowledge with an optional note
//! - `POST /api/v1/events/{id}/clear` - Close the event by hand
//! - `GET /api/v1/pm` - Planned maintenance windows
//! - `POST /api/v1/pm` - Schedule a window
//! - `DELETE /api/v1/pm/{id}` - Cancel a window

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod secrets;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use secrets::Secrets;
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{AckRequest, EventsResponse, HealthResponse, MaintenanceResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{delete, get, post},
};
#[cfg(feature = "api")]
use std::sync::Arc;
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "127.0.0.1:8001")
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
        }
    }
}

/// Build the router; event and maintenance routes sit behind the bearer token check
#[cfg(feature = "api")]
pub fn router(state: ApiState, secrets: Arc<Secrets>) -> Router {
    use tower::ServiceBuilder;
    use tower_http::trace::TraceLayer;

    let protected = Router::new()
        .route("/api/v1/events", get(routes::events::list_events))
        .route("/api/v1/events/:id", get(routes::events::get_event))
        .route("/api/v1/events/:id/ack", post(routes::events::ack_event))
        .route("/api/v1/events/:id/clear", post(routes::events::clear_event))
        .route(
            "/api/v1/pm",
            get(routes::maintenance::list_maintenance)
                .post(routes::maintenance::create_maintenance),
        )
        .route("/api/v1/pm/:id", delete(routes::maintenance::cancel_maintenance))
        .route_layer(axum::middleware::from_fn_with_state(
            secrets,
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    secrets: Secrets,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);
    if secrets.is_empty() {
        tracing::warn!("no API users configured, every authenticated request will be refused");
    }

    let app = router(state, Arc::new(secrets));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
