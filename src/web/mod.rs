//! Web server module: metrics scrape, health, reload and landing page.

mod handlers;

pub use handlers::*;

use crate::config::{ConfigError, ExporterConfig};
use crate::scheduler::Scheduler;

use axum::{
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers and the signal task.
#[derive(Clone)]
pub struct AppState {
    pub config_path: PathBuf,
    pub metrics_path: String,
    pub config: Arc<RwLock<ExporterConfig>>,
    pub scheduler: Arc<Scheduler>,
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config_path: PathBuf,
        metrics_path: String,
        config: ExporterConfig,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config_path,
            metrics_path,
            config: Arc::new(RwLock::new(config)),
            scheduler,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Re-read the config file and restart the target loops.
    ///
    /// On error nothing changes: the running config and loops stay as they
    /// were. Concurrent callers are serialized.
    pub async fn reload(&self) -> Result<usize, ConfigError> {
        let _guard = self.reload_lock.lock().await;
        tracing::info!(config_file = %self.config_path.display(), "Reloading configuration");

        let cfg = ExporterConfig::load(&self.config_path)?;
        let count = cfg.targets.len();

        self.scheduler.reload(&cfg.targets).await;
        *self.config.write().await = cfg;

        tracing::info!(targets = count, "Configuration reloaded successfully");
        Ok(count)
    }
}

/// Web server for the exporter.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let mut router = Router::new()
            .route(&self.state.metrics_path, get(handlers::handle_metrics))
            .route("/-/healthy", get(handlers::handle_healthy))
            .route("/-/reload", post(handlers::handle_reload));

        if self.state.metrics_path != "/" {
            router = router.route("/", get(handlers::handle_index));
        }

        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on `listen_address` until `shutdown` is cancelled.
    pub async fn start(
        &self,
        listen_address: &str,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = bind_address(listen_address);
        let router = self.routes();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            address = %listener.local_addr()?,
            metrics_path = %self.state.metrics_path,
            "Starting HTTP server"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

/// Accept Go-style `:port` addresses by binding every interface.
pub fn bind_address(listen_address: &str) -> String {
    if listen_address.starts_with(':') {
        format!("0.0.0.0{}", listen_address)
    } else {
        listen_address.to_string()
    }
}
