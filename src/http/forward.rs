//! Plain request forwarding.
//!
//! Every non-CONNECT request is re-issued against its own absolute request
//! target with the same method, the filtered headers and the inbound body
//! attached as a stream. The response comes back the same way: status,
//! filtered headers, and a body that is streamed, never buffered.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::http::error::ProxyError;
use crate::http::headers;

/// Outbound client. Pooling is left to hyper-util's defaults.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the outbound client, able to reach both `http://` and `https://` targets.
pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpsConnector::new())
}

/// State injected into the forwarding handler.
#[derive(Clone)]
pub struct ForwardState {
    pub client: HttpClient,
}

/// Router fallback: every request that reaches the router is forwarded.
pub async fn forward_handler(State(state): State<ForwardState>, request: Request<Body>) -> Response {
    match forward(&state.client, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Forward one request and stream the destination's response back.
pub async fn forward(client: &HttpClient, request: Request<Body>) -> Result<Response, ProxyError> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let outbound = build_outbound(request).inspect_err(|e| {
        tracing::warn!(method = %method, uri = %uri, error = %e, "Failed to forward request");
    })?;

    let response = client.request(outbound).await.map_err(|e| {
        tracing::warn!(method = %method, uri = %uri, error = %e, "Failed to reach target");
        ProxyError::Upstream(e)
    })?;

    tracing::debug!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Forwarding response"
    );

    let (parts, body) = response.into_parts();
    // Status and headers are already committed once the body streams, so a
    // failure here can only be logged.
    let body = body.map_err(move |e| {
        tracing::warn!(method = %method, uri = %uri, error = %e, "Failed to copy response body");
        e
    });

    let mut forwarded = Response::new(Body::new(body));
    *forwarded.status_mut() = parts.status;
    headers::copy_forwardable(&parts.headers, forwarded.headers_mut());
    Ok(forwarded)
}

/// Derive the outbound request from the inbound one.
///
/// The request target is reused verbatim and must be absolute
/// (`http://host/path`); no Host-header resolution is attempted. A target
/// without scheme or authority cannot be reached and is reported as such,
/// before any network I/O.
pub fn build_outbound(request: Request<Body>) -> Result<Request<Body>, ProxyError> {
    let (parts, body) = request.into_parts();

    if parts.uri.scheme().is_none() || parts.uri.authority().is_none() {
        return Err(ProxyError::UnusableTarget(format!(
            "request target `{}` is not an absolute URI",
            parts.uri
        )));
    }

    let mut builder = Request::builder().method(parts.method).uri(parts.uri);
    if let Some(headers) = builder.headers_mut() {
        headers::copy_forwardable(&parts.headers, headers);
    }

    builder
        .body(body)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, Method, StatusCode};

    #[test]
    fn outbound_keeps_method_target_and_plain_headers() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/items/7?x=1")
            .header(header::HOST, "example.com")
            .header(header::CONNECTION, "keep-alive")
            .header(header::CONTENT_LENGTH, "4")
            .header("x-trace", "abc")
            .body(Body::from("data"))
            .unwrap();

        let outbound = build_outbound(request).unwrap();
        assert_eq!(outbound.method(), Method::PUT);
        assert_eq!(outbound.uri(), "http://example.com/items/7?x=1");
        assert_eq!(outbound.headers()["x-trace"], "abc");
        assert_eq!(outbound.headers()[header::HOST], "example.com");
        assert!(!outbound.headers().contains_key(header::CONNECTION));
        assert!(!outbound.headers().contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn relative_target_is_bad_gateway() {
        let request = Request::builder()
            .uri("/only/a/path")
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap();

        let err = build_outbound(request).unwrap_err();
        assert!(matches!(err, ProxyError::UnusableTarget(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unreachable_target_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = Request::builder()
            .uri(format!("http://{}/", addr))
            .body(Body::empty())
            .unwrap();

        let err = forward(&build_client(), request).await.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
