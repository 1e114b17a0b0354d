//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1 connection, method dispatch)
//!         CONNECT  → tunnel.rs (dial destination, upgrade, byte relay)
//!         other    → axum Router → forward.rs (outbound request, streamed response)
//!     → headers.rs (connection-management headers dropped in both directions)
//!     → error.rs (failure → status code)
//! ```

pub mod error;
pub mod forward;
pub mod headers;
pub mod server;
pub mod tunnel;

pub use error::ProxyError;
pub use server::HttpServer;
