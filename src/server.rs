//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//!
//! 1. stops calling `listener.accept()`, so no new connection is taken,
//! 2. waits for every connection task already spawned,
//! 3. returns `Ok(())` from [`Server::serve`].
//!
//! An orchestrator that sends SIGTERM and then waits a grace period before
//! SIGKILL gets a clean drain as long as the grace period exceeds the slowest
//! request.
//!
//! # Bodies
//!
//! Request bodies are collected into memory before routing. Resource
//! handlers see a complete [`Bytes`] buffer, which is what the codecs need.
//! Request timeouts and cancellation belong to whatever sits in front of
//! the process; the server has none of its own.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::response::Response;
use crate::router::Router;

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server.
pub struct Server {
    addr: String,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when
    /// [`serve`](Server::serve) is called.
    ///
    /// ```rust,no_run
    /// use trellis::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Accept connections and dispatch them through `app` until a shutdown
    /// signal arrives and in-flight connections have drained.
    pub async fn serve(self, app: impl Into<Router>) -> Result<(), Error> {
        let addr: SocketAddr = self.addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        // Built once, then shared read-only by every connection task.
        let router: Arc<Router> = Arc::new(app.into());

        info!(%addr, "trellis listening");

        // One task per connection. Keeping them in a JoinSet is what lets the
        // drain below wait for all of them.
        let mut tasks = tokio::task::JoinSet::new();

        // `select!` polls the same shutdown future on every turn of the loop,
        // so it must stay pinned in one place.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Arms are polled top to bottom. Shutdown first, so a signal
                // wins over a backlog of pending connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    // Adapts tokio's AsyncRead/AsyncWrite to hyper's IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on this connection, which
                        // may carry many requests under keep-alive or h2.
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { dispatch(router, req).await }
                        });

                        // The auto builder speaks HTTP/1.1 or HTTP/2, whichever
                        // the client opens with.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so a long-running server does not
                // accumulate completed handles.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain.
        while tasks.join_next().await.is_some() {}

        info!("trellis stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffer the body, then route.
///
/// The error type is `Infallible`: a body that cannot be read is answered
/// with `400`, an unmatched path with `404`, and everything past routing is
/// rendered by the route itself. hyper never sees a service error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("body read error: {e}");
            return Ok(Response::status(http::StatusCode::BAD_REQUEST).into_inner());
        }
    };
    let response = router.call(http::Request::from_parts(parts, body)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM (Unix) or Ctrl-C.
///
/// If a signal listener cannot be installed the failure is logged and that
/// branch never resolves, so the other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
