//! HTTP client for the gateway.
//!
//! One [`GatewayClient`] addresses one tenant. It sends the deployment
//! secret, tenant name and signed token on every call and carries the
//! `x-bookmark` header forward so reads observe earlier writes.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use tdb_protocol::{
    ProblemDetails, RpcClient, RpcError, RpcRequest, RpcResponse, HEADER_BOOKMARK, HEADER_DB_NAME,
    HEADER_DB_TOKEN,
};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid gateway url {0:?}")]
    InvalidUrl(String),
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("building http client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub secret: String,
    pub db: String,
    pub token: String,
}

pub struct GatewayClient {
    http: reqwest::Client,
    base: String,
    creds: Credentials,
    bookmark: Mutex<Option<String>>,
}

impl GatewayClient {
    pub fn new(base: &str, creds: Credentials) -> Result<Self, ClientError> {
        Self::with_timeout(base, creds, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base: &str,
        creds: Credentials,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = base.trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base));
        }
        for (name, value) in [
            ("secret", &creds.secret),
            ("db", &creds.db),
            ("token", &creds.token),
        ] {
            if value.trim().is_empty() {
                return Err(ClientError::Missing(name));
            }
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            creds,
            bookmark: Mutex::new(None),
        })
    }

    pub fn bookmark(&self) -> Option<String> {
        self.bookmark.lock().clone()
    }

    pub fn set_bookmark(&self, bookmark: Option<String>) {
        *self.bookmark.lock() = bookmark;
    }
}

/// Map a gateway reply to the verb's results.
///
/// Bodies carrying the `{success, ...}` envelope are decoded as such at any
/// status. Other failures are problem details; 503 means the actor stayed
/// unavailable through its retries.
pub fn decode_reply(status: StatusCode, body: &[u8]) -> Result<Value, RpcError> {
    if let Ok(envelope) = serde_json::from_slice::<RpcResponse>(body) {
        return envelope.into_result();
    }
    let detail = serde_json::from_slice::<ProblemDetails>(body)
        .ok()
        .and_then(|p| p.detail.or(Some(p.title)))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(RpcError::Transient(detail));
    }
    if status.is_success() {
        return Err(RpcError::Decode(detail));
    }
    Err(RpcError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

#[async_trait]
impl RpcClient for GatewayClient {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let verb = request.verb();
        let url = format!("{}{}", self.base, verb.path());
        let mut req = self
            .http
            .post(&url)
            .bearer_auth(&self.creds.secret)
            .header(HEADER_DB_NAME, &self.creds.db)
            .header(HEADER_DB_TOKEN, &self.creds.token)
            .json(&request.body());
        if let Some(bookmark) = self.bookmark() {
            req = req.header(HEADER_BOOKMARK, bookmark);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let status = resp.status();
        if let Some(bookmark) = resp
            .headers()
            .get(HEADER_BOOKMARK)
            .and_then(|v| v.to_str().ok())
        {
            *self.bookmark.lock() = Some(bookmark.to_string());
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        debug!(target: "tdb::client", verb = verb.as_str(), status = status.as_u16(), "gateway reply");
        decode_reply(status, &body)
    }
}
