//! Web server for stowage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::storage::BlobStore;
use crate::upload::spawn_reaper;
use crate::{Database, StowageError};

use super::handlers::AppState;
use super::middleware::JwtState;
use super::router::{create_health_router, create_router};

/// Web server for the API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// JWT state.
    jwt_state: Arc<JwtState>,
    /// CORS allowed origins.
    cors_origins: Vec<String>,
    /// Idle time after which an incomplete upload is reaped.
    idle_timeout: Duration,
    /// Time between reaper sweeps.
    reaper_interval: Duration,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(
        config: &Config,
        db: Arc<Database>,
        storage: Arc<dyn BlobStore>,
    ) -> crate::Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| {
                StowageError::Config(format!(
                    "invalid server address {}:{}: {e}",
                    config.server.host, config.server.port
                ))
            })?;

        let app_state = AppState::new(db, storage)
            .with_max_chunk_size(config.storage.max_chunk_size_bytes());

        Ok(Self {
            addr,
            app_state: Arc::new(app_state),
            jwt_state: Arc::new(JwtState::new(&config.auth.jwt_secret)),
            cors_origins: config.server.cors_origins.clone(),
            idle_timeout: Duration::from_secs(config.storage.upload_idle_timeout_secs),
            reaper_interval: Duration::from_secs(config.storage.reaper_interval_secs.max(1)),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the web server until it fails.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let reaper = spawn_reaper(
            self.app_state.db.clone(),
            self.app_state.storage.clone(),
            self.app_state.locks.clone(),
            self.idle_timeout,
            self.reaper_interval,
        );
        tracing::info!(
            idle_secs = self.idle_timeout.as_secs(),
            interval_secs = self.reaper_interval.as_secs(),
            "Upload reaper started"
        );

        let router = create_router(self.app_state, self.jwt_state, &self.cors_origins)
            .merge(create_health_router());

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Web server listening on http://{}", local_addr);

        let result = axum::serve(listener, router).await;
        reaper.abort();
        result
    }
}
