//! Control surface HTTP server

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::create_router;
use super::ControlPlane;
use crate::config::ControlConfig;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub plane: ControlPlane,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Control Server
// ============================================================================

pub struct ControlServer {
    bind_address: SocketAddr,
    enable_cors: bool,
    state: AppState,
}

impl ControlServer {
    pub fn new(plane: ControlPlane, config: &ControlConfig) -> Result<Self, ServerError> {
        let bind_address = config
            .bind_address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(config.bind_address.clone()))?;

        Ok(Self {
            bind_address,
            enable_cors: config.enable_cors,
            state: AppState {
                plane,
                start_time: Instant::now(),
            },
        })
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` completes
    pub async fn serve(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| ServerError::Bind(self.bind_address, e))?;

        tracing::info!(address = %self.bind_address, "Control API listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        tracing::info!("Control API stopped");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
