//! HTTP server implementation.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{admission, AdmissionState};
use crate::error::{Result, TollgateError};

/// HTTP server whose every route sits behind the admission middleware.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes with the admission layer applied
    router: Router,
}

impl HttpServer {
    /// Create a new server serving the default routes.
    pub fn new(addr: SocketAddr, admission_state: AdmissionState) -> Self {
        Self::with_routes(addr, default_routes(), admission_state)
    }

    /// Create a new server that puts `routes` behind admission control.
    ///
    /// Every request is traced, and a panic anywhere below the trace layer
    /// becomes a 500 response.
    pub fn with_routes(addr: SocketAddr, routes: Router, admission_state: AdmissionState) -> Self {
        let router = routes
            .layer(axum::middleware::from_fn_with_state(admission_state, admission))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http());
        Self { addr, router }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}

/// Routes served by the binary.
fn default_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root() -> &'static str {
    "Hello World!"
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
