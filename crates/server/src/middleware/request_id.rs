//! Request correlation ids.
//!
//! The proxy in front of the server usually sets `x-request-id`; anything
//! missing or unusable is replaced with a UUID v4. The id ends up on the
//! `http_request` span, as a Sentry tag, in request extensions as
//! [`RequestId`], and on the response.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_UPSTREAM_LEN: usize = 128;

/// Correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Upstream ids are kept only if they are short, visible ASCII.
fn accept_upstream(raw: &str) -> Option<&str> {
    let usable = !raw.is_empty()
        && raw.len() <= MAX_UPSTREAM_LEN
        && raw.bytes().all(|b| b.is_ascii_graphic());
    usable.then_some(raw)
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(accept_upstream)
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    Span::current().record("request_id", request_id.as_str());
    sentry::configure_scope(|scope| scope.set_tag("request_id", &request_id));
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{Extension, Router, body::Body, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|Extension(id): Extension<RequestId>| async move { id.0 }))
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    async fn echoed(header: Option<&str>) -> (String, String) {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(REQUEST_ID_HEADER, value);
        }
        let request = builder.body(Body::empty()).unwrap_or_else(|e| panic!("{e}"));
        let response = app().oneshot(request).await.unwrap_or_else(|e| panic!("{e}"));
        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        (header, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_upstream_id_is_kept() {
        let (header, body) = echoed(Some("cf-8a1d2c")).await;
        assert_eq!(header, "cf-8a1d2c");
        assert_eq!(body, "cf-8a1d2c");
    }

    #[tokio::test]
    async fn test_missing_id_is_generated() {
        let (header, body) = echoed(None).await;
        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(header, body);
    }

    #[test]
    fn test_unusable_upstream_ids() {
        assert_eq!(accept_upstream(""), None);
        assert_eq!(accept_upstream("has space"), None);
        assert_eq!(accept_upstream(&"a".repeat(MAX_UPSTREAM_LEN + 1)), None);
        assert_eq!(accept_upstream("req-1"), Some("req-1"));
    }
}
