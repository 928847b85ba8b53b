//! HTTP server wrapper with graceful shutdown.
//!
//! Assembles the API router (plus Swagger UI) and runs axum until SIGINT or
//! SIGTERM.  On shutdown the stations are drained first, which ends every
//! open stream body, so in-flight connections can actually close within the
//! budget.

use crate::api::{self, ApiDoc, AppState};
use anyhow::Context;
use axum::Router;
use icyconfig::ListenConfig;
use icystation::StationRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Overall budget for draining stations once shutdown begins.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

pub struct Server {
    host: String,
    port: u16,
    registry: Arc<StationRegistry>,
    shutdown_token: CancellationToken,
}

impl Server {
    pub fn new(listen: &ListenConfig, registry: Arc<StationRegistry>) -> Self {
        Self {
            host: listen.host.clone(),
            port: listen.port,
            registry,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token observed by `run`; cancelling it triggers the same graceful
    /// shutdown as a signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Full router: API endpoints plus Swagger UI.
    pub fn build_router(&self) -> Router {
        let state = AppState::new(self.registry.clone());
        Router::new()
            .merge(api::create_router(state))
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    }

    /// Bind, serve, and block until shutdown completes.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("bind {}:{}", self.host, self.port))?;
        let local_addr = listener.local_addr().context("listener address")?;
        info!("ICYCast listening on http://{local_addr} (try /stations)");

        let router = self.build_router();
        let registry = self.registry.clone();
        let token = self.shutdown_token.clone();

        let shutdown = async move {
            tokio::select! {
                _ = shutdown_signal() => info!("Shutdown signal received"),
                _ = token.cancelled() => info!("Shutdown requested"),
            }
            // Draining the stations ends every attached session, so the
            // streaming connections below can finish.
            if tokio::time::timeout(SHUTDOWN_BUDGET, registry.shutdown_all())
                .await
                .is_err()
            {
                warn!("Station shutdown exceeded budget, closing anyway");
            }
        };

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server")?;

        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Cannot install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
