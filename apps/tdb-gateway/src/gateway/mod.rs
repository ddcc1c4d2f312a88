//! Request admission as an ordered fold over independent components.
//!
//! Each component sees the [`RequestContext`] produced by the previous one
//! and either hands back a (possibly enriched) context or a [`Rejection`].
//! The first rejection ends the fold; nothing after it runs and the
//! request never reaches an actor.

mod auth;
mod limiter;

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tdb_protocol::{HEADER_BOOKMARK, HEADER_DB_NAME, HEADER_DB_TOKEN};
use tdb_token::{Clock, SignedToken};
use tracing::warn;

pub(crate) use auth::{SecretCheck, TenantHeader, TokenCheck};
pub(crate) use limiter::{ActivityLimiter, MemoryCounterStore};

use crate::responses;

/// Everything admission needs from the incoming request.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    pub authorization: Option<String>,
    pub tenant: Option<String>,
    pub token: Option<String>,
    pub bookmark: Option<String>,
    /// Set once the token has been verified.
    pub claims: Option<SignedToken>,
}

fn header_str(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RequestContext {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            authorization: header_str(headers, header::AUTHORIZATION),
            tenant: header_str(headers, HEADER_DB_NAME),
            token: header_str(headers, HEADER_DB_TOKEN),
            bookmark: header_str(headers, HEADER_BOOKMARK),
            claims: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rejection {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
}

impl Rejection {
    pub(crate) fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
        }
    }

    pub(crate) fn unauthorized(code: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, detail)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        responses::problem(self.status, self.code, self.detail)
    }
}

/// One admission step. Lower priorities run first.
pub(crate) trait Component: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u16;
    fn apply(&self, ctx: RequestContext) -> Result<RequestContext, Rejection>;
}

pub(crate) struct Pipeline {
    components: Vec<Box<dyn Component>>,
}

impl Pipeline {
    pub(crate) fn new(mut components: Vec<Box<dyn Component>>) -> Self {
        components.sort_by_key(|c| c.priority());
        Self { components }
    }

    /// Secret, tenant header, token, then the activity limiter when enabled.
    pub(crate) fn standard(
        secret: &str,
        clock: Arc<dyn Clock>,
        limiter: Option<ActivityLimiter>,
    ) -> Self {
        let mut components: Vec<Box<dyn Component>> = vec![
            Box::new(SecretCheck::new(secret)),
            Box::new(TenantHeader),
            Box::new(TokenCheck::new(secret, clock)),
        ];
        if let Some(limiter) = limiter {
            components.push(Box::new(limiter));
        }
        Self::new(components)
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub(crate) fn run(&self, ctx: RequestContext) -> Result<RequestContext, Rejection> {
        self.components.iter().try_fold(ctx, |ctx, component| {
            let tenant = ctx.tenant.clone();
            component.apply(ctx).inspect_err(|rejection| {
                warn!(
                    target: "tdb::gateway",
                    component = component.name(),
                    code = rejection.code,
                    status = rejection.status.as_u16(),
                    tenant = tenant.as_deref().unwrap_or("-"),
                    "request rejected"
                );
            })
        })
    }
}
