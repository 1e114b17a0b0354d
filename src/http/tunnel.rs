//! CONNECT tunneling.
//!
//! # Data Flow
//! ```text
//! CONNECT host:port
//!     → dial host:port                      (AwaitingDestination; failure → 503)
//!     → 200 to the client                   (TunnelEstablished)
//!     → hyper hands over the raw connection
//!     → two copy tasks, joined on a channel (Relaying)
//!     → both sockets dropped                (Closed)
//! ```
//!
//! Bytes are never inspected. There is no idle timeout: a stalled tunnel
//! lives until one side closes or the process exits.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::http::error::ProxyError;
use crate::net::ConnectionGuard;

/// Port used when a CONNECT target names none.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Per-connection tunnel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    AwaitingDestination,
    TunnelEstablished,
    Relaying,
    Closed,
}

/// Copy direction within a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToDestination,
    DestinationToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToDestination => write!(f, "client->destination"),
            Direction::DestinationToClient => write!(f, "destination->client"),
        }
    }
}

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_destination: u64,
    pub destination_to_client: u64,
}

/// `host:port` a CONNECT request asks for, with the port defaulted to 443.
///
/// Taken from the authority-form request target, or the `Host` header when
/// the target carries no authority. With neither there is no destination to
/// dial, which the client sees as a failed connect (503).
pub fn connect_target<B>(request: &Request<B>) -> Result<String, ProxyError> {
    if let Some(authority) = request.uri().authority() {
        return Ok(with_default_port(authority.host(), authority.port_u16()));
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<axum::http::uri::Authority>().ok())
        .ok_or(ProxyError::MissingConnectTarget)?;

    Ok(with_default_port(host.host(), host.port_u16()))
}

fn with_default_port(host: &str, port: Option<u16>) -> String {
    format!("{}:{}", host, port.unwrap_or(DEFAULT_CONNECT_PORT))
}

/// Handle a CONNECT request.
///
/// The returned response is what the client sees; on success the relay keeps
/// running on its own task after it has been sent. The connection guard is
/// moved into that task so the connection stays counted until the tunnel ends.
pub async fn handle_connect<B>(mut request: Request<B>, guard: Arc<ConnectionGuard>) -> Response {
    let connection_id = guard.id();
    let target = match connect_target(&request) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, uri = %request.uri(), error = %e, "Rejecting CONNECT");
            return e.into_response();
        }
    };

    tracing::trace!(connection_id = %connection_id, target = %target, state = ?TunnelState::AwaitingDestination);

    let destination = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(source) => {
            tracing::warn!(connection_id = %connection_id, target = %target, error = %source, "Connection error");
            tracing::trace!(connection_id = %connection_id, target = %target, state = ?TunnelState::Closed);
            return ProxyError::DestinationUnreachable { target, source }.into_response();
        }
    };

    let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
        tracing::error!(connection_id = %connection_id, target = %target, "Connection cannot be upgraded");
        return ProxyError::UpgradeUnavailable.into_response();
    };

    tracing::trace!(connection_id = %connection_id, target = %target, state = ?TunnelState::TunnelEstablished);

    let span = tracing::debug_span!("tunnel", connection_id = %connection_id, target = %target);
    tokio::spawn(
        async move {
            let _guard = guard;
            match on_upgrade.await {
                Ok(upgraded) => {
                    tracing::trace!(state = ?TunnelState::Relaying);
                    let stats = relay(TokioIo::new(upgraded), destination).await;
                    tracing::debug!(
                        client_to_destination = stats.client_to_destination,
                        destination_to_client = stats.destination_to_client,
                        "Tunnel finished"
                    );
                }
                // The 200 is already on the wire; nothing can be reported to the client.
                Err(e) => tracing::warn!(error = %e, "Upgrade error"),
            }
            tracing::trace!(state = ?TunnelState::Closed);
        }
        .instrument(span),
    );

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    response
}

/// Splice two byte streams until both directions have finished.
///
/// Each direction is copied by its own task. When a source reaches EOF the
/// matching write half is shut down, so a half-close is passed on while the
/// other direction keeps flowing. Both streams are dropped, and so closed,
/// before this returns.
pub async fn relay<C, D>(client: C, destination: D) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (destination_read, destination_write) = tokio::io::split(destination);

    let (done_tx, mut done_rx) = mpsc::channel(2);
    tokio::spawn(copy_half(
        Direction::ClientToDestination,
        client_read,
        destination_write,
        done_tx.clone(),
    ));
    tokio::spawn(copy_half(
        Direction::DestinationToClient,
        destination_read,
        client_write,
        done_tx,
    ));

    let mut stats = RelayStats::default();
    // Ends once both senders are gone, even if a copy task panicked.
    while let Some((direction, result)) = done_rx.recv().await {
        match result {
            Ok(bytes) => match direction {
                Direction::ClientToDestination => stats.client_to_destination = bytes,
                Direction::DestinationToClient => stats.destination_to_client = bytes,
            },
            Err(e) => tracing::warn!(direction = %direction, error = %e, "Tunnel copy failed"),
        }
    }
    stats
}

async fn copy_half<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    done: mpsc::Sender<(Direction, io::Result<u64>)>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = tokio::io::copy(&mut reader, &mut writer).await;
    if result.is_ok() {
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(direction = %direction, error = %e, "Half-close failed");
        }
    }
    // Dropping the halves here closes the socket once both directions are done.
    drop(reader);
    drop(writer);
    let _ = done.send((direction, result)).await;
}
