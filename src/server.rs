use crate::config::Config;
use crate::error::Result;
use crate::gate::request_gate;
use crate::handlers::{
    api_info, get_window, health_check, hello, list_policies, not_found, reset_window, AppState,
    SharedState,
};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router around `state`.
///
/// Every request passes the request gate, which charges it to exactly one
/// limiter. The rate limit administration routes are limited per caller tier,
/// using the role the authentication layer stores as a `CallerRole` extension.
/// The gate sits outside tracing, so a denied request is never traced.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/api", get(api_info))
        .route("/api/hello", get(hello))
        .route("/api/health", get(health_check))
        .route("/api/rate-limit/policies", get(list_policies))
        .route(
            "/api/rate-limit/:identifier/:key",
            get(get_window).delete(reset_window),
        )
        .fallback(not_found)
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(
                    state.gate.clone(),
                    request_gate,
                ))
                .layer(TraceLayer::new_for_http()),
        )
}

pub struct Server {
    state: SharedState,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let bind_addr = config.bind_addr;
        let state = Arc::new(AppState::new(config)?);
        Ok(Self { state, bind_addr })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let interval = self.state.config.cleanup_interval();
        for store in self.state.stores() {
            store.start_cleanup(interval);
        }

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("api-gate server listening on {}", self.bind_addr);
        tracing::info!(
            cleanup_interval_secs = interval.as_secs(),
            "Rate limit window cleanup scheduled"
        );
        tracing::info!("Health check available at /api/health");

        let app = create_app(self.state.clone());

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for store in self.state.stores() {
            store.stop_cleanup();
        }
        tracing::info!("Server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
