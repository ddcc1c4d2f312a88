use std::sync::Arc;

use axum::http::StatusCode;
use tdb_token::{constant_time_eq, verify, Clock};

use super::{Component, Rejection, RequestContext};

/// Deployment-wide bearer secret in `Authorization`.
pub(crate) struct SecretCheck {
    secret: Vec<u8>,
}

impl SecretCheck {
    pub(crate) fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }
}

impl Component for SecretCheck {
    fn name(&self) -> &'static str {
        "secret"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn apply(&self, ctx: RequestContext) -> Result<RequestContext, Rejection> {
        let presented = ctx
            .authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| {
                Rejection::unauthorized("missing_secret", "Authorization: Bearer <secret> required")
            })?;
        if !constant_time_eq(presented.as_bytes(), &self.secret) {
            return Err(Rejection::unauthorized(
                "invalid_secret",
                "deployment secret does not match",
            ));
        }
        Ok(ctx)
    }
}

/// Requires `x-db-name`.
pub(crate) struct TenantHeader;

impl Component for TenantHeader {
    fn name(&self) -> &'static str {
        "tenant"
    }

    fn priority(&self) -> u16 {
        20
    }

    fn apply(&self, ctx: RequestContext) -> Result<RequestContext, Rejection> {
        if ctx.tenant.is_none() {
            return Err(Rejection::new(
                StatusCode::BAD_REQUEST,
                "missing_db_name",
                "x-db-name header required",
            ));
        }
        Ok(ctx)
    }
}

/// Signed per-database token in `x-db-token`, bound to `x-db-name`.
pub(crate) struct TokenCheck {
    secret: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl TokenCheck {
    pub(crate) fn new(secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            clock,
        }
    }
}

impl Component for TokenCheck {
    fn name(&self) -> &'static str {
        "token"
    }

    fn priority(&self) -> u16 {
        30
    }

    fn apply(&self, mut ctx: RequestContext) -> Result<RequestContext, Rejection> {
        let tenant = ctx.tenant.as_deref().unwrap_or_default();
        let token = ctx
            .token
            .as_deref()
            .ok_or_else(|| Rejection::unauthorized("missing_token", "x-db-token header required"))?;
        let claims = verify(token, tenant, &self.secret, self.clock.now_ms())
            .map_err(|e| Rejection::unauthorized(e.code(), e.to_string()))?;
        ctx.claims = Some(claims);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdb_token::{mint, ManualClock};

    const SECRET: &str = "deploy-secret";
    const NOW: u64 = 1_700_000_000_000;

    fn ctx(auth: Option<&str>, tenant: Option<&str>, token: Option<&str>) -> RequestContext {
        RequestContext {
            authorization: auth.map(str::to_string),
            tenant: tenant.map(str::to_string),
            token: token.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn secret_check() {
        let check = SecretCheck::new(SECRET);
        assert!(check
            .apply(ctx(Some("Bearer deploy-secret"), None, None))
            .is_ok());
        let missing = check.apply(ctx(None, None, None)).unwrap_err();
        assert_eq!(missing.code, "missing_secret");
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        let basic = check.apply(ctx(Some("Basic abc"), None, None)).unwrap_err();
        assert_eq!(basic.code, "missing_secret");
        let wrong = check.apply(ctx(Some("Bearer nope"), None, None)).unwrap_err();
        assert_eq!(wrong.code, "invalid_secret");
    }

    #[test]
    fn tenant_header_required() {
        let err = TenantHeader.apply(ctx(None, None, None)).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(TenantHeader.apply(ctx(None, Some("acme"), None)).is_ok());
    }

    #[test]
    fn token_defects_map_to_codes() {
        let clock = Arc::new(ManualClock::new(NOW));
        let check = TokenCheck::new(SECRET, clock.clone());
        let good = mint("acme", SECRET.as_bytes(), NOW + 60_000).unwrap().encode();

        let ok = check.apply(ctx(None, Some("acme"), Some(&good))).unwrap();
        assert_eq!(ok.claims.unwrap().tenant, "acme");

        let code = |tenant: &str, token: Option<&str>| {
            check
                .apply(ctx(None, Some(tenant), token))
                .unwrap_err()
                .code
        };
        assert_eq!(code("acme", None), "missing_token");
        assert_eq!(code("acme", Some("a.b.c")), "token_malformed");
        assert_eq!(code("other", Some(&good)), "token_tenant_mismatch");
        let forged = format!("{}x", good);
        assert_eq!(code("acme", Some(&forged)), "token_bad_signature");

        clock.advance(60_001);
        assert_eq!(code("acme", Some(&good)), "token_expired");
    }
}
