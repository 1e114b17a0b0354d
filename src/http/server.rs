//! HTTP server setup and method dispatch.
//!
//! # Responsibilities
//! - Build the outbound client and the axum Router (forwarding + tracing)
//! - Accept connections and serve each one on its own task
//! - Dispatch CONNECT to the tunnel, everything else to the Router
//!
//! Connections share nothing but the outbound client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Request};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::forward::{build_client, forward_handler, ForwardState};
use crate::http::tunnel::handle_connect;
use crate::net::{ConnectionGuard, ConnectionTracker, Listener, ListenerError};

/// Pause after a failed accept before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server for the forward proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let state = ForwardState {
            client: build_client(),
        };

        Self {
            router: Self::build_router(state),
            config,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Plain requests carry absolute targets, so no path routes are
    /// registered; the fallback takes everything.
    fn build_router(state: ForwardState) -> Router {
        Router::new()
            .fallback(forward_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Stopping only ends the accept loop; connections and tunnels already
    /// running are left to finish on their own.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = self.config.listener.max_connections,
            "Proxy server starting"
        );

        loop {
            let (stream, peer_addr, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        back_off_after_accept_error(&e).await;
                        continue;
                    }
                },
                _ = shutdown.recv() => break,
            };

            let guard = Arc::new(self.tracker.track(Some(permit)));
            tokio::spawn(serve_connection(stream, peer_addr, self.router.clone(), guard));
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Proxy server stopped accepting connections"
        );
        Ok(())
    }
}

/// Typically EMFILE/ENFILE; give descriptors a moment to free up instead of
/// spinning on the listener.
async fn back_off_after_accept_error(error: &ListenerError) {
    tracing::warn!(error = %error, "Accept failed");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Serve HTTP/1.x on one client connection. Upgrades are enabled so CONNECT
/// can take over the raw stream.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Router,
    guard: Arc<ConnectionGuard>,
) {
    let connection_id = guard.id();
    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Serving connection");

    let service = service_fn(move |request: Request<Incoming>| {
        let router = router.clone();
        let guard = Arc::clone(&guard);
        async move {
            if request.method() == Method::CONNECT {
                Ok::<_, Infallible>(handle_connect(request, guard).await)
            } else {
                router.oneshot(request).await
            }
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        tracing::debug!(
            connection_id = %connection_id,
            peer_addr = %peer_addr,
            error = %e,
            "Connection closed with error"
        );
    }
}
