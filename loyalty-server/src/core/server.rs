//! Server process: store, reconciliation worker and HTTP API

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{Config, Result, ServerState};
use crate::accrual::{AccrualClient, DynamicRateLimiter, Reconciler};
use crate::api;
use crate::auth::JwtService;
use crate::db::{MemoryStore, PgStore, Store};

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve until Ctrl-C / SIGTERM, then stop the worker.
    pub async fn run(self) -> Result<()> {
        let store = self.open_store().await?;

        let limiter = Arc::new(DynamicRateLimiter::new(
            self.config.worker.rate_interval,
            self.config.worker.rate_burst,
        ));
        let accrual = Arc::new(AccrualClient::new(
            &self.config.accrual_address,
            self.config.accrual_timeout,
        )?);
        let worker = Reconciler::new(store.clone(), accrual, limiter, self.config.worker.clone())?;

        let shutdown = CancellationToken::new();
        worker.run(&shutdown)?;

        let state = ServerState::new(
            store,
            JwtService::new(&self.config.jwt_secret, self.config.jwt_expiration_hours),
        );
        let app = api::build_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.run_address).await?;
        tracing::info!(
            address = %self.config.run_address,
            accrual = %self.config.accrual_address,
            environment = %self.config.environment,
            "Loyalty server listening"
        );

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        worker.stop().await;
        shutdown.cancel();

        served?;
        tracing::info!("Loyalty server stopped");
        Ok(())
    }

    async fn open_store(&self) -> Result<Arc<dyn Store>> {
        match &self.config.database_uri {
            Some(uri) => {
                let store = PgStore::connect(uri).await?;
                tracing::info!("Connected to PostgreSQL, migrations applied");
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!("DATABASE_URI not set, using in-memory store; data is lost on exit");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

/// Graceful shutdown handler
///
/// Listens for SIGTERM and Ctrl+C signals
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
