//! Per-verb RPC routes: admit, decode, forward to the tenant's actor.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tdb_kernel::ActorError;
use tdb_protocol::{RpcRequest, RpcResponse, Verb};
use tracing::{debug, error, warn};

use crate::gateway::RequestContext;
use crate::responses;
use crate::AppState;

pub(crate) async fn rpc(state: AppState, verb: Verb, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = match state.pipeline().run(RequestContext::from_headers(&headers)) {
        Ok(ctx) => ctx,
        Err(rejection) => return rejection.into_response(),
    };
    let bookmark = ctx.bookmark.as_deref();
    // Route by the verified token's tenant, equal to x-db-name by now.
    let Some(tenant) = ctx.claims.as_ref().map(|c| c.tenant.as_str()) else {
        return responses::problem(StatusCode::UNAUTHORIZED, "missing_token", "no verified token");
    };
    let request = match RpcRequest::decode(verb, &body) {
        Ok(request) => request,
        Err(err) => {
            return responses::with_bookmark(
                responses::problem(
                    StatusCode::BAD_REQUEST,
                    "invalid_body",
                    format!("invalid {} body: {err}", verb.as_str()),
                ),
                bookmark,
            )
        }
    };

    match state.stub().send(tenant, &request, bookmark).await {
        Ok(reply) => {
            debug!(target: "tdb::gateway", tenant, verb = verb.as_str(), bookmark = %reply.bookmark, "rpc ok");
            responses::with_bookmark(
                (StatusCode::OK, Json(RpcResponse::ok(reply.results))).into_response(),
                Some(&reply.bookmark),
            )
        }
        Err(err) => responses::with_bookmark(actor_failure(tenant, verb, err), bookmark),
    }
}

fn actor_failure(tenant: &str, verb: Verb, err: ActorError) -> Response {
    if err.is_transient() {
        warn!(target: "tdb::gateway", tenant, verb = verb.as_str(), error = %err, "actor unavailable after retries");
        return responses::problem(StatusCode::SERVICE_UNAVAILABLE, "actor_unavailable", err.to_string());
    }
    match err {
        ActorError::Sql(msg) | ActorError::BadRequest(msg) => {
            debug!(target: "tdb::gateway", tenant, verb = verb.as_str(), error = %msg, "statement rejected");
            (StatusCode::BAD_REQUEST, Json(RpcResponse::err(msg))).into_response()
        }
        other => {
            error!(target: "tdb::gateway", tenant, verb = verb.as_str(), error = %other, "actor call failed");
            responses::internal(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, body_json, rpc_request, TestGateway, SECRET};
    use serde_json::json;
    use tdb_protocol::HEADER_BOOKMARK;
    use tower::ServiceExt;

    #[tokio::test]
    async fn authorised_calls_reach_the_actor_and_carry_bookmarks() {
        let gw = TestGateway::new();
        let token = gw.token("acme");

        let res = gw
            .app()
            .oneshot(rpc_request(
                "/api/exec",
                SECRET,
                Some("acme"),
                Some(&token),
                json!({"query": "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let first = res.headers()[HEADER_BOOKMARK].to_str().unwrap().to_string();

        let res = gw
            .app()
            .oneshot(rpc_request(
                "/api/run",
                SECRET,
                Some("acme"),
                Some(&token),
                json!({"query": "INSERT INTO t (v) VALUES (?) RETURNING id", "params": ["x"]}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let second = res.headers()[HEADER_BOOKMARK].to_str().unwrap().to_string();
        assert!(second > first);
        let body = body_json(res).await;
        assert_eq!(body, json!({"success": true, "results": [{"id": 1}]}));

        let res = gw
            .app()
            .oneshot(rpc_request(
                "/api/first",
                SECRET,
                Some("acme"),
                Some(&token),
                json!({"query": "SELECT v FROM t WHERE id = ?", "params": [1], "column": "v"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(res).await["results"], json!("x"));
    }

    #[tokio::test]
    async fn every_token_defect_is_401_and_never_forwarded() {
        let gw = TestGateway::new();
        let good = gw.token("acme");
        let other = gw.token("other");
        let expired = tdb_token::mint("acme", SECRET.as_bytes(), test_support::NOW - 1)
            .unwrap()
            .encode();
        let wrong_secret = tdb_token::mint("acme", b"not-the-secret", test_support::NOW + 60_000)
            .unwrap()
            .encode();
        let mut parts: Vec<&str> = good.split('.').collect();
        parts[2] = "soon";
        let non_numeric = parts.join(".");
        let three_parts = good.rsplitn(2, '.').nth(1).unwrap_or_default().to_string();

        for (token, code) in [
            (None, "missing_token"),
            (Some(three_parts.as_str()), "token_malformed"),
            (Some(other.as_str()), "token_tenant_mismatch"),
            (Some(non_numeric.as_str()), "token_invalid_expiry"),
            (Some(expired.as_str()), "token_expired"),
            (Some(wrong_secret.as_str()), "token_bad_signature"),
        ] {
            let res = gw
                .app()
                .oneshot(rpc_request("/api/run", SECRET, Some("acme"), token, json!({"query": "SELECT 1"})))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{code}");
            assert_eq!(body_json(res).await["code"], json!(code));
        }
        assert_eq!(gw.forwarded(), 0);
    }

    #[tokio::test]
    async fn token_expires_with_the_clock() {
        let gw = TestGateway::new();
        let token = gw.token("acme");
        let call = || {
            rpc_request("/api/run", SECRET, Some("acme"), Some(&token), json!({"query": "SELECT 1"}))
        };
        assert_eq!(gw.app().oneshot(call()).await.unwrap().status(), StatusCode::OK);
        gw.clock.advance(3_600_000);
        let res = gw.app().oneshot(call()).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["code"], json!("token_expired"));
    }

    #[tokio::test]
    async fn secret_and_tenant_header_checks_come_first() {
        let gw = TestGateway::new();
        let token = gw.token("acme");

        let res = gw
            .app()
            .oneshot(rpc_request("/api/run", "wrong", Some("acme"), Some(&token), json!({"query": "SELECT 1"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["code"], json!("invalid_secret"));

        let res = gw
            .app()
            .oneshot(rpc_request("/api/run", SECRET, None, Some(&token), json!({"query": "SELECT 1"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["code"], json!("missing_db_name"));
        assert_eq!(gw.forwarded(), 0);
    }

    #[tokio::test]
    async fn sql_errors_use_the_envelope_and_echo_the_bookmark() {
        let gw = TestGateway::new();
        let token = gw.token("acme");
        let mut req = rpc_request(
            "/api/run",
            SECRET,
            Some("acme"),
            Some(&token),
            json!({"query": "SELECT nope FROM"}),
        );
        req.headers_mut()
            .insert(HEADER_BOOKMARK, "feedface-0000000000000003".parse().unwrap());
        let res = gw.app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.headers()[HEADER_BOOKMARK], "feedface-0000000000000003");
        let body = body_json(res).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().contains("syntax"));
    }

    #[tokio::test]
    async fn malformed_body_is_a_400_problem() {
        let gw = TestGateway::new();
        let token = gw.token("acme");
        let res = gw
            .app()
            .oneshot(rpc_request("/api/batch", SECRET, Some("acme"), Some(&token), json!({"query": 1})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["code"], json!("invalid_body"));
    }

    #[tokio::test]
    async fn transient_failures_surface_as_503_after_retries() {
        let gw = TestGateway::failing();
        let token = gw.token("acme");
        let res = gw
            .app()
            .oneshot(rpc_request("/api/run", SECRET, Some("acme"), Some(&token), json!({"query": "SELECT 1"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(res).await["code"], json!("actor_unavailable"));
        assert_eq!(gw.forwarded(), tdb_kernel::DEFAULT_MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn activity_limiter_returns_429() {
        let gw = TestGateway::with_rate_limit(2);
        let token = gw.token("acme");
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let res = gw
                .app()
                .oneshot(rpc_request("/api/run", SECRET, Some("acme"), Some(&token), json!({"query": "SELECT 1"})))
                .await
                .unwrap();
            statuses.push(res.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
        assert_eq!(gw.forwarded(), 2);
    }

    #[tokio::test]
    async fn kv_routes_round_trip() {
        let gw = TestGateway::new();
        let token = gw.token("acme");
        let res = gw
            .app()
            .oneshot(rpc_request(
                "/api/kv/put",
                SECRET,
                Some("acme"),
                Some(&token),
                json!({"key": "user:1", "value": "ada"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = gw
            .app()
            .oneshot(rpc_request(
                "/api/kv/get",
                SECRET,
                Some("acme"),
                Some(&token),
                json!({"key": "user:1"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(res).await["results"]["value"], json!("ada"));
    }
}
