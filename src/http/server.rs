//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::{Result, ThrottledError};
use crate::ratelimit::Decider;

/// HTTP server for the admission service.
pub struct HttpServer<R: Decider + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission backend
    decider: Arc<R>,
}

impl<R: Decider + 'static> HttpServer<R> {
    /// Create a new HTTP server backed by `decider`.
    pub fn new(addr: SocketAddr, decider: Arc<R>) -> Self {
        Self { addr, decider }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided signal resolves and returns
    /// once in-flight requests have completed.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            ThrottledError::Io(e)
        })?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server for admission control"
        );

        axum::serve(listener, router(self.decider))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                ThrottledError::Io(e)
            })
    }
}
