//! `RelayServer`: Axum HTTP + WebSocket front end for the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_hub::{Hub, HubConfig, HubHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::ws;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Limits applied to every connection.
    pub hub_config: Arc<HubConfig>,
    /// Origins allowed to upgrade.
    pub allowed_origins: Arc<Vec<String>>,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The relay server: a hub plus the routes that feed it.
pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
    hub_task: JoinHandle<()>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RelayServer {
    /// Create a server and start its hub. Must be called inside a runtime.
    pub fn new(
        config: ServerConfig,
        hub_config: HubConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, hub_task) = Hub::spawn(&hub_config, shutdown.token());
        let state = AppState {
            hub,
            hub_config: Arc::new(hub_config),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
            metrics,
            start_time: Instant::now(),
        };
        Self {
            config,
            state,
            hub_task,
            shutdown,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws::ws_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                ws::check_origin,
            ))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "relay server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = result {
                error!(error = %err, "relay server failed");
            }
        });
        Ok((local_addr, serve))
    }

    /// Stop the hub and the listener, waiting up to the configured timeout.
    pub async fn stop(self, serve: JoinHandle<()>) {
        let drained = self
            .shutdown
            .graceful_shutdown(vec![serve, self.hub_task], self.config.shutdown_timeout)
            .await;
        info!(drained, "relay server stopped");
    }

    /// Handle to the hub.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
