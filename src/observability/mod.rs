//! Observability subsystem.
//!
//! Operational errors (upstream failures, connect failures, upgrade failures,
//! mid-stream copy errors) go to the process-wide log stream. Nothing here is
//! part of the request/response contract.

pub mod logging;
