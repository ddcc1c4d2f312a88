use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::Args;
use tdb_token::{Clock, SystemClock};

const DEFAULT_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Args)]
pub struct MintArgs {
    /// Tenant (database name) the token is bound to
    #[arg(long)]
    pub tenant: String,
    /// Deployment secret
    #[arg(long, env = "TDB_SECRET", hide_env_values = true)]
    pub secret: String,
    /// Lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
    pub ttl_secs: u64,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Tenant the token must be bound to
    #[arg(long)]
    pub tenant: String,
    /// Deployment secret
    #[arg(long, env = "TDB_SECRET", hide_env_values = true)]
    pub secret: String,
    /// Encoded token
    pub token: String,
}

fn rfc3339(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Prints the token on stdout and its expiry on stderr.
pub fn mint(args: MintArgs) -> Result<()> {
    if args.ttl_secs == 0 {
        bail!("--ttl-secs must be positive");
    }
    let expires_at = SystemClock
        .now_ms()
        .saturating_add(args.ttl_secs.saturating_mul(1000));
    let token = tdb_token::mint(&args.tenant, args.secret.as_bytes(), expires_at)
        .context("minting token")?;
    println!("{}", token.encode());
    eprintln!("expires {}", rfc3339(expires_at));
    Ok(())
}

pub fn verify(args: VerifyArgs) -> Result<()> {
    let now = SystemClock.now_ms();
    match tdb_token::verify(args.token.trim(), &args.tenant, args.secret.as_bytes(), now) {
        Ok(claims) => {
            println!(
                "valid tenant={} expires={}",
                claims.tenant,
                rfc3339(claims.expires_at_ms)
            );
            Ok(())
        }
        Err(err) => bail!("invalid token ({}): {err}", err.code()),
    }
}
