use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tdb_protocol::HEADER_DB_NAME;

use crate::request_ctx::HEADER_REQUEST_ID;

#[derive(Clone, Debug)]
struct Cfg {
    enabled: bool,
    sample_n: u64,
}

impl Cfg {
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: get("TDB_ACCESS_LOG").as_deref() == Some("1"),
            sample_n: get("TDB_ACCESS_SAMPLE_N")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1)
                .max(1),
        }
    }

    fn sampled(&self, n: u64) -> bool {
        self.sample_n <= 1 || n % self.sample_n == 0
    }
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg::from_lookup(|k| std::env::var(k).ok()));

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// One JSON line per request on the `http.access` target. Tokens and the
/// deployment secret are never included.
pub(crate) async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let tenant = req
        .headers()
        .get(HEADER_DB_NAME)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let res = next.run(req).await;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    if !CFG.sampled(n) {
        return res;
    }
    let obj = line(
        method.as_str(),
        &path,
        &res,
        started.elapsed().as_millis() as u64,
        tenant,
    );
    tracing::info!(target: "http.access", "{}", obj);
    res
}

/// This layer sits outside the correlation scope, so the id is read back
/// from the response header the correlation layer sets.
fn request_id_of(res: &Response) -> Option<String> {
    res.headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| crate::request_ctx::current().map(|id| id.as_str().to_string()))
}

fn line(method: &str, path: &str, res: &Response, dur_ms: u64, tenant: Option<String>) -> Value {
    let mut obj = json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "method": method,
        "path": path,
        "status": res.status().as_u16(),
        "dur_ms": dur_ms,
    });
    if let Some(t) = tenant {
        obj["tenant"] = Value::String(t);
    }
    if let Some(id) = request_id_of(res) {
        obj["request_id"] = Value::String(id);
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestGateway;
    use axum::body::Body;
    use tower::ServiceExt;

    #[test]
    fn cfg_from_lookup() {
        let cfg = Cfg::from_lookup(|k| match k {
            "TDB_ACCESS_LOG" => Some("1".into()),
            "TDB_ACCESS_SAMPLE_N" => Some("3".into()),
            _ => None,
        });
        assert!(cfg.enabled);
        assert!(!cfg.sampled(1));
        assert!(cfg.sampled(3));

        let off = Cfg::from_lookup(|_| None);
        assert!(!off.enabled);
        assert!(off.sampled(7));
    }

    #[tokio::test]
    async fn access_line_carries_the_request_id() {
        let gw = TestGateway::new();
        let res = gw
            .app()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(HEADER_REQUEST_ID, "trace-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let obj = line("GET", "/healthz", &res, 3, Some("acme".into()));
        assert_eq!(obj["request_id"], json!("trace-7"));
        assert_eq!(obj["status"], json!(200));
        assert_eq!(obj["tenant"], json!("acme"));

        let bare = Response::new(Body::empty());
        assert!(line("GET", "/x", &bare, 0, None).get("request_id").is_none());
    }
}
