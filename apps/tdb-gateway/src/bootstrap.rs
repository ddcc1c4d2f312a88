use axum::Router;

use crate::{access_log, request_ctx, router::build_router, security, AppState};

pub(crate) fn attach_stateful_layers(router: Router<AppState>, state: AppState) -> Router<()> {
    router
        .with_state::<()>(state)
        .layer(axum::middleware::from_fn(request_ctx::correlation_mw))
}

pub(crate) fn attach_http_layers(router: Router<()>, concurrency_limit: usize) -> Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    // The signed token is the security boundary, not the origin.
    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: Router<()>) -> Router<()> {
    router
        .layer(axum::middleware::from_fn(access_log::access_log_mw))
        .layer(axum::middleware::from_fn(security::headers_mw))
}

/// Fully layered application for `state`.
pub(crate) fn build_app(state: AppState, concurrency_limit: usize) -> Router<()> {
    attach_global_layers(attach_http_layers(
        attach_stateful_layers(build_router(), state),
        concurrency_limit,
    ))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, TestGateway};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn cors_preflight_is_permissive() {
        let gw = TestGateway::new();
        let res = gw
            .app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/run")
                    .header("origin", "https://app.example")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "x-db-name,x-db-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn every_response_gets_request_id_and_hardening_headers() {
        let gw = TestGateway::new();
        let res = gw
            .app()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()["x-request-id"], "abc-123");
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(body_json(res).await["ok"], true);
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        let gw = TestGateway::new();
        let res = gw
            .app()
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
