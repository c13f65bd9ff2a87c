//! API Server
//!
//! Binds the router to the configured address and serves until Ctrl+C or
//! SIGTERM.

use super::{
    handlers::AppState,
    middleware::{count_requests_middleware, create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{config::ApiConfig, services::LedgerServices};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub struct ApiServer {
    config: ApiConfig,
    services: Arc<LedgerServices>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, services: Arc<LedgerServices>) -> Self {
        Self { config, services }
    }

    /// Start the API server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.get_socket_addr()?;

        info!("Starting matchwager API server");
        info!("   Listen: http://{}", addr);
        self.log_server_info();

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped gracefully");
        Ok(())
    }

    /// Router with the full middleware stack
    pub fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            services: Arc::clone(&self.services),
            settlement_api_key: self.config.settlement_api_key.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        create_router(Arc::clone(&state))
            .layer(axum::middleware::from_fn_with_state(state, count_requests_middleware))
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(self.config.request_timeout()))
            .layer(TraceLayer::new_for_http())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        let policy = &self.services.config().policy;
        info!("Server configuration:");
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   Starting balance: {}", policy.starting_balance);
        info!("   Betting window: {}s", policy.window_duration_secs);
        info!("   Payout multiplier: {}x", policy.payout_multiplier);

        if self.config.settlement_api_key.is_none() {
            warn!("SETTLEMENT_API_KEY is not set; the settlement trigger is unauthenticated");
        }
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
