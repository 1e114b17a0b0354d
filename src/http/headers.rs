//! Connection-management header filtering.
//!
//! Exactly `Connection`, `Content-Length`, `Transfer-Encoding` and `Upgrade`
//! are dropped, in both directions. Framing headers are regenerated by hyper
//! for each hop. No other header is special-cased.

use axum::http::{header, HeaderMap, HeaderName};

pub static EXCLUDED_HEADERS: [HeaderName; 4] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn is_excluded(name: &HeaderName) -> bool {
    EXCLUDED_HEADERS.contains(name)
}

/// Append every non-excluded header of `src` to `dst`, value by value.
pub fn copy_forwardable(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src.iter() {
        if !is_excluded(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}
