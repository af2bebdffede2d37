//! Serving the router until shutdown.

use crate::{create_router, ApiState};
use axum::Router;
use itops_core::config::ApiConfig;
use itops_core::{Error, Result};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// In-flight requests get this long after cancellation
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The API bound to its configured address
#[derive(Debug)]
pub struct ApiServer {
    config: ApiConfig,
    router: Router,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: ApiState) -> Self {
        let router = create_router(state, &config);
        Self { config, router }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let address = self.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| Error::config(format!("bind {address}: {e}")))?;
        serve(listener, self.router, cancel).await
    }
}

/// Serve `router` on `listener`, stopping gracefully once `cancel` fires
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    info!(address = %listener.local_addr()?, "API listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
        } => {
            warn!(timeout = ?SHUTDOWN_TIMEOUT, "API shutdown timed out, dropping connections");
        }
    }
    info!("API stopped");
    Ok(())
}
