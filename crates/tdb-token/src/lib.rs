//! Signed per-database tokens.
//!
//! Wire form: `<tenant>.<nonce>.<expiry-epoch-ms>.<signature>` where the
//! signature is `base64url(HMAC-SHA256("<tenant>.<nonce>.<expiry>", secret))`
//! without padding. Tokens carry no server-side state; every request
//! re-verifies them against the deployment secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token must have exactly 4 dot-separated parts")]
    Malformed,
    #[error("token was issued for a different database")]
    TenantMismatch,
    #[error("token expiry is not numeric")]
    InvalidExpiry,
    #[error("token expired")]
    Expired,
    #[error("token signature invalid")]
    BadSignature,
    #[error("tenant name {0:?} is not usable in a token")]
    InvalidTenant(String),
    #[error("signing secret must not be empty")]
    EmptySecret,
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => "token_malformed",
            TokenError::TenantMismatch => "token_tenant_mismatch",
            TokenError::InvalidExpiry => "token_invalid_expiry",
            TokenError::Expired => "token_expired",
            TokenError::BadSignature => "token_bad_signature",
            TokenError::InvalidTenant(_) => "token_invalid_tenant",
            TokenError::EmptySecret => "token_empty_secret",
        }
    }
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: u64) {
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A token split into its verified parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub tenant: String,
    pub nonce: String,
    pub expires_at_ms: u64,
    pub signature: String,
}

impl SignedToken {
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.tenant, self.nonce, self.expires_at_ms, self.signature
        )
    }
}

fn mac_for(secret: &[u8], payload: &str) -> Result<HmacSha256, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// base64url(HMAC-SHA256(payload, secret)), unpadded.
pub fn sign(payload: &str, secret: &[u8]) -> Result<String, TokenError> {
    let mac = mac_for(secret, payload)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn random_nonce() -> String {
    let mut buf = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn check_tenant(tenant: &str) -> Result<(), TokenError> {
    if tenant.is_empty() || tenant.contains('.') || tenant.chars().any(char::is_whitespace) {
        return Err(TokenError::InvalidTenant(tenant.to_string()));
    }
    Ok(())
}

/// Mint a token for `tenant` valid until `expires_at_ms`.
pub fn mint(tenant: &str, secret: &[u8], expires_at_ms: u64) -> Result<SignedToken, TokenError> {
    check_tenant(tenant)?;
    let nonce = random_nonce();
    let payload = format!("{tenant}.{nonce}.{expires_at_ms}");
    let signature = sign(&payload, secret)?;
    Ok(SignedToken {
        tenant: tenant.to_string(),
        nonce,
        expires_at_ms,
        signature,
    })
}

/// Verify `token` for the database named in the request.
///
/// Checks run in a fixed order and stop at the first failure: shape, tenant
/// binding, expiry, then signature.
pub fn verify(
    token: &str,
    expected_tenant: &str,
    secret: &[u8],
    now_ms: u64,
) -> Result<SignedToken, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [tenant, nonce, expiry, signature] = parts.as_slice() else {
        return Err(TokenError::Malformed);
    };
    if *tenant != expected_tenant {
        return Err(TokenError::TenantMismatch);
    }
    let expires_at_ms: u64 = expiry.parse().map_err(|_| TokenError::InvalidExpiry)?;
    if expires_at_ms <= now_ms {
        return Err(TokenError::Expired);
    }
    let supplied = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::BadSignature)?;
    let mac = mac_for(secret, &format!("{tenant}.{nonce}.{expiry}"))?;
    mac.verify_slice(&supplied)
        .map_err(|_| TokenError::BadSignature)?;
    Ok(SignedToken {
        tenant: tenant.to_string(),
        nonce: nonce.to_string(),
        expires_at_ms,
        signature: signature.to_string(),
    })
}

/// Byte comparison whose running time does not depend on where inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
