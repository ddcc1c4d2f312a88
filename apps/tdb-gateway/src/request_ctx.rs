use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tokio::task_local;
use uuid::Uuid;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
const MAX_ID_LEN: usize = 128;

task_local! {
    static REQ_ID: RequestId;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RequestId {
    id: String,
}

impl RequestId {
    pub(crate) fn as_str(&self) -> &str {
        &self.id
    }
}

/// Accept the caller's `x-request-id` or mint one, expose it to handlers and
/// echo it on the response.
pub(crate) async fn correlation_mw(mut req: Request<Body>, next: Next) -> Response {
    let header = HeaderName::from_static(HEADER_REQUEST_ID);
    let request_id = match req
        .headers()
        .get(&header)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_id)
    {
        Some(id) => RequestId { id },
        None => RequestId {
            id: Uuid::new_v4().to_string(),
        },
    };
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        req.headers_mut().insert(header.clone(), value);
    }
    req.extensions_mut().insert(request_id.clone());
    REQ_ID
        .scope(request_id.clone(), async move {
            let mut res = next.run(req).await;
            if res.headers().get(&header).is_none() {
                if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
                    res.headers_mut().insert(header, value);
                }
            }
            res
        })
        .await
}

pub(crate) fn current() -> Option<RequestId> {
    REQ_ID.try_with(|id| id.clone()).ok()
}

fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(trimmed.len().min(MAX_ID_LEN));
    for ch in trimmed.chars() {
        if ch.is_control() || ch == '\u{7f}' {
            continue;
        }
        if out.len() >= MAX_ID_LEN {
            break;
        }
        out.push(ch);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn normalize_id_trims_controls_and_limits_length() {
        assert_eq!(normalize_id("  abc  "), Some("abc".into()));
        assert!(normalize_id("   ").is_none());
        assert_eq!(normalize_id("a\u{0007}b\u{007f}c"), Some("abc".into()));
        let long = "x".repeat(MAX_ID_LEN + 24);
        assert_eq!(normalize_id(&long).unwrap().len(), MAX_ID_LEN);
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|| async move {
                    let id = current().expect("request id in scope");
                    id.as_str().to_string()
                }),
            )
            .layer(axum::middleware::from_fn(correlation_mw))
    }

    #[tokio::test]
    async fn provided_id_is_echoed() {
        let res = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "req-xyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()["x-request-id"], "req-xyz");
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"req-xyz");
    }

    #[tokio::test]
    async fn missing_id_is_generated() {
        let res = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = res
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
