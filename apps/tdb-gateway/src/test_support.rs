//! Shared fixtures for in-process router tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tdb_kernel::{
    ActorDirectory, ActorError, ActorReply, ActorTransport, Catalog, LocalTransport,
};
use tdb_protocol::{RpcRequest, HEADER_DB_NAME, HEADER_DB_TOKEN};
use tdb_token::{Clock, ManualClock};

use crate::config::GatewayConfig;
use crate::AppState;

pub(crate) const SECRET: &str = "test-deployment-secret";
pub(crate) const ADMIN: &str = "test-admin-token";
pub(crate) const NOW: u64 = 1_700_000_000_000;

pub(crate) fn config() -> GatewayConfig {
    GatewayConfig::from_lookup(|k| match k {
        "TDB_SECRET" => Some(SECRET.into()),
        "TDB_ADMIN_TOKEN" => Some(ADMIN.into()),
        "TDB_MEMORY" => Some("1".into()),
        _ => None,
    })
    .expect("test config")
}

/// Counts calls before handing them to the wrapped transport.
struct Counting {
    inner: Arc<dyn ActorTransport>,
    calls: AtomicUsize,
}

#[async_trait]
impl ActorTransport for Counting {
    async fn send(
        &self,
        tenant: &str,
        request: RpcRequest,
        bookmark: Option<String>,
    ) -> Result<ActorReply, ActorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.send(tenant, request, bookmark).await
    }
}

struct Unavailable;

#[async_trait]
impl ActorTransport for Unavailable {
    async fn send(
        &self,
        _tenant: &str,
        _request: RpcRequest,
        _bookmark: Option<String>,
    ) -> Result<ActorReply, ActorError> {
        Err(ActorError::Storage("storage unit recycled".into()))
    }
}

pub(crate) struct TestGateway {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    counting: Arc<Counting>,
}

impl TestGateway {
    pub(crate) fn new() -> Self {
        Self::with_config(config())
    }

    pub(crate) fn with_rate_limit(limit: u64) -> Self {
        let mut cfg = config();
        cfg.rate_limit = limit;
        Self::with_config(cfg)
    }

    pub(crate) fn with_config(cfg: GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new(NOW));
        let directory = Arc::new(ActorDirectory::in_memory(clock.clone()));
        Self::build(cfg, clock, Arc::new(LocalTransport::new(directory)))
    }

    /// Every actor call fails with a transient error.
    pub(crate) fn failing() -> Self {
        Self::build(config(), Arc::new(ManualClock::new(NOW)), Arc::new(Unavailable))
    }

    fn build(cfg: GatewayConfig, clock: Arc<ManualClock>, inner: Arc<dyn ActorTransport>) -> Self {
        let counting = Arc::new(Counting {
            inner,
            calls: AtomicUsize::new(0),
        });
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let catalog = Catalog::in_memory(dyn_clock.clone()).expect("catalog");
        let state = AppState::assemble(&cfg, dyn_clock, counting.clone(), catalog);
        Self {
            state,
            clock,
            counting,
        }
    }

    pub(crate) fn app(&self) -> Router {
        crate::bootstrap::build_app(self.state.clone(), 64)
    }

    pub(crate) fn token(&self, tenant: &str) -> String {
        tdb_token::mint(tenant, SECRET.as_bytes(), NOW + 3_600_000)
            .expect("mint")
            .encode()
    }

    /// Transport calls made so far, retries included.
    pub(crate) fn forwarded(&self) -> usize {
        self.counting.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn rpc_request(
    path: &str,
    secret: &str,
    tenant: Option<&str>,
    token: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {secret}"));
    if let Some(t) = tenant {
        builder = builder.header(HEADER_DB_NAME, t);
    }
    if let Some(t) = token {
        builder = builder.header(HEADER_DB_TOKEN, t);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub(crate) fn admin_request(
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

pub(crate) async fn body_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
