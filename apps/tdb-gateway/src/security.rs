use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

fn add_hdr(h: &mut HeaderMap, name: &'static str, val: &str) {
    let name = HeaderName::from_static(name);
    if !h.contains_key(&name) {
        if let Ok(v) = HeaderValue::from_str(val) {
            h.insert(name, v);
        }
    }
}

/// Baseline response hardening; never overrides a header a handler set.
pub(crate) async fn headers_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let h = res.headers_mut();
    add_hdr(h, "x-content-type-options", "nosniff");
    add_hdr(h, "x-frame-options", "DENY");
    let refpol = std::env::var("TDB_REFERRER_POLICY").unwrap_or_else(|_| "no-referrer".into());
    add_hdr(h, "referrer-policy", &refpol);
    add_hdr(h, "cache-control", "no-store");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn adds_headers_without_clobbering() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([("cache-control", "max-age=5")], "ok") }),
            )
            .layer(axum::middleware::from_fn(headers_mw));
        let res = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(res.headers()["x-frame-options"], "DENY");
        assert_eq!(res.headers()["cache-control"], "max-age=5");
    }
}
