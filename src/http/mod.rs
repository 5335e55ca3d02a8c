//! Axum HTTP channel — the transport in front of [`IdentityService`].
//!
//! ```text
//! GET  /           → health
//! POST /identify   → consolidated contact
//! ```
//!
//! `run` drives the axum event loop until the [`CancellationToken`] fires.

mod api;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::AppError;
use crate::service::IdentityService;

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct HttpState {
    pub service_name: std::sync::Arc<str>,
    pub service: IdentityService,
}

pub struct HttpChannel {
    bind_addr: String,
    state: HttpState,
}

impl HttpChannel {
    pub fn new(bind_addr: impl Into<String>, state: HttpState) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            state,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let bind_addr = self.bind_addr;
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| AppError::Comms(format!("http bind failed on {bind_addr}: {e}")))?;

        info!(service = %self.state.service_name, %bind_addr, "http channel listening");

        axum::serve(listener, build_router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| AppError::Comms(format!("http server error: {e}")))?;

        info!("http channel shut down");
        Ok(())
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/",         get(api::health))
        .route("/identify", post(api::identify))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
