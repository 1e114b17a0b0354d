//! Minimal forward HTTP/HTTPS proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server ──┬─ CONNECT ──▶ http::tunnel ◀══▶ destination host:port
//!                                                 │
//!                                                 └─ other ────▶ http::forward ──▶ absolute request URI
//! ```
//!
//! Plain requests are re-issued against their absolute request target and the
//! response is streamed back. CONNECT requests get a TCP connection to
//! `host:port` (port 443 by default), a `200`, and then a blind byte relay
//! in both directions until both sides are done.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
