use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tdb_protocol::{RpcClient, RpcError, RpcRequest};
use tracing::{info, warn};

use crate::actor::ActorReply;
use crate::directory::ActorDirectory;
use crate::error::ActorError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How a call physically reaches an actor.
#[async_trait]
pub trait ActorTransport: Send + Sync {
    async fn send(
        &self,
        tenant: &str,
        request: RpcRequest,
        bookmark: Option<String>,
    ) -> Result<ActorReply, ActorError>;
}

/// In-process transport over an [`ActorDirectory`].
#[derive(Clone)]
pub struct LocalTransport {
    directory: Arc<ActorDirectory>,
}

impl LocalTransport {
    pub fn new(directory: Arc<ActorDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<ActorDirectory> {
        &self.directory
    }
}

#[async_trait]
impl ActorTransport for LocalTransport {
    async fn send(
        &self,
        tenant: &str,
        request: RpcRequest,
        bookmark: Option<String>,
    ) -> Result<ActorReply, ActorError> {
        let directory = self.directory.clone();
        let tenant = tenant.to_string();
        tokio::task::spawn_blocking(move || {
            let actor = directory.get_or_open(&tenant)?;
            actor.dispatch(&request, bookmark.as_deref())
        })
        .await?
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Front for a transport that re-attempts transient failures.
///
/// Attempts are immediate (no backoff). The request is an owned value
/// captured before the loop so every attempt sends identical input.
#[derive(Clone)]
pub struct ActorStub {
    transport: Arc<dyn ActorTransport>,
    policy: RetryPolicy,
}

impl ActorStub {
    pub fn new(transport: Arc<dyn ActorTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn send(
        &self,
        tenant: &str,
        request: &RpcRequest,
        bookmark: Option<&str>,
    ) -> Result<ActorReply, ActorError> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .transport
                .send(tenant, request.clone(), bookmark.map(str::to_string))
                .await;
            match result {
                Ok(reply) => {
                    if attempt > 1 {
                        info!(target: "tdb::actor", tenant, attempt, "actor call recovered after retry");
                    }
                    return Ok(reply);
                }
                Err(err) if err.is_transient() && attempt < max => {
                    warn!(
                        target: "tdb::actor",
                        tenant,
                        attempt,
                        verb = request.verb().as_str(),
                        error = %err,
                        "transient actor failure; retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Bind this stub to one tenant.
    pub fn tenant(&self, tenant: impl Into<String>) -> TenantClient {
        TenantClient {
            stub: self.clone(),
            tenant: tenant.into(),
            bookmark: Mutex::new(None),
        }
    }
}

/// [`RpcClient`] for a single tenant that carries the bookmark forward
/// between calls.
pub struct TenantClient {
    stub: ActorStub,
    tenant: String,
    bookmark: Mutex<Option<String>>,
}

impl TenantClient {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn bookmark(&self) -> Option<String> {
        self.bookmark.lock().clone()
    }
}

#[async_trait]
impl RpcClient for TenantClient {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let bookmark = self.bookmark();
        let reply = self
            .stub
            .send(&self.tenant, &request, bookmark.as_deref())
            .await?;
        *self.bookmark.lock() = Some(reply.bookmark);
        Ok(reply.results)
    }
}
