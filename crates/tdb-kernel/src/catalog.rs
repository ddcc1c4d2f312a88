//! Admin catalog: Tenant and API Token records.
//!
//! Records are never hard-deleted; soft deletion stamps `deleted_at` and
//! callers filter on it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tdb_token::Clock;

use crate::directory::actor_id_for;

const MAX_NAME_LEN: usize = 64;

/// Requests that contradict a tenant's lifecycle state. Carried inside
/// `anyhow::Error`; callers `downcast_ref` to answer with a conflict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogConflict {
    #[error("tenant {0:?} was deleted")]
    Deleted(String),
    #[error("tenant {0:?} is not active")]
    Inactive(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TenantRecord {
    pub id: String,
    /// Stable routing key; embedded in tokens and sent as `x-db-name`.
    pub name: String,
    /// Human-facing name, changed by rename.
    pub label: String,
    pub actor_id: String,
    pub schema_version: i64,
    pub needs_update: bool,
    pub active: bool,
    pub archived: bool,
    pub created: String,
    pub updated: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApiTokenRecord {
    pub id: String,
    pub tenant_id: String,
    pub token: String,
    pub revoked: bool,
    pub expires_at_ms: Option<i64>,
    pub created: String,
    pub deleted_at: Option<String>,
}

impl ApiTokenRecord {
    pub fn is_usable(&self, now_ms: u64) -> bool {
        !self.revoked
            && self.deleted_at.is_none()
            && self.expires_at_ms.map_or(true, |at| at > now_ms as i64)
    }
}

pub fn validate_tenant_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        bail!("tenant name must be 1..={MAX_NAME_LEN} characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("tenant name {name:?} may only contain ASCII letters, digits, '-' and '_'");
    }
    Ok(())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn open(dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create catalog dir {}", dir.display()))?;
        let conn = Connection::open(dir.join("catalog.sqlite"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_conn(conn, clock)
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_conn(Connection::open_in_memory()?, clock)
    }

    fn from_conn(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL UNIQUE,
              label TEXT NOT NULL,
              actor_id TEXT NOT NULL,
              schema_version INTEGER NOT NULL DEFAULT 0,
              needs_update INTEGER NOT NULL DEFAULT 0,
              active INTEGER NOT NULL DEFAULT 1,
              archived INTEGER NOT NULL DEFAULT 0,
              created TEXT NOT NULL,
              updated TEXT NOT NULL,
              deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
              id TEXT PRIMARY KEY,
              tenant_id TEXT NOT NULL REFERENCES tenants(id),
              token TEXT NOT NULL,
              revoked INTEGER NOT NULL DEFAULT 0,
              expires_at_ms INTEGER,
              created TEXT NOT NULL,
              deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_tenant ON api_tokens(tenant_id);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<TenantRecord> {
        Ok(TenantRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            label: row.get(2)?,
            actor_id: row.get(3)?,
            schema_version: row.get(4)?,
            needs_update: row.get(5)?,
            active: row.get(6)?,
            archived: row.get(7)?,
            created: row.get(8)?,
            updated: row.get(9)?,
            deleted_at: row.get(10)?,
        })
    }

    fn token_from_row(row: &Row<'_>) -> rusqlite::Result<ApiTokenRecord> {
        Ok(ApiTokenRecord {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            token: row.get(2)?,
            revoked: row.get(3)?,
            expires_at_ms: row.get(4)?,
            created: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }

    const TENANT_COLS: &'static str = "id,name,label,actor_id,schema_version,needs_update,active,archived,created,updated,deleted_at";
    const TOKEN_COLS: &'static str = "id,tenant_id,token,revoked,expires_at_ms,created,deleted_at";

    pub fn get(&self, name: &str) -> Result<Option<TenantRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM tenants WHERE name = ?", Self::TENANT_COLS);
        Ok(conn
            .query_row(&sql, params![name], Self::tenant_from_row)
            .optional()?)
    }

    fn require(&self, name: &str) -> Result<TenantRecord> {
        self.get(name)?
            .ok_or_else(|| anyhow!("tenant {name:?} not found"))
    }

    /// Create the tenant, or return the existing record for the same name.
    pub fn provision(&self, name: &str) -> Result<TenantRecord> {
        self.ensure_tenant(name).map(|(tenant, _)| tenant)
    }

    /// Like [`Catalog::provision`], also reporting whether this call created
    /// the record. Concurrent callers for one name see exactly one `true`.
    pub fn ensure_tenant(&self, name: &str) -> Result<(TenantRecord, bool)> {
        validate_tenant_name(name)?;
        let now = now_rfc3339();
        let inserted = self.conn.lock().execute(
            "INSERT INTO tenants(id,name,label,actor_id,created,updated) VALUES (?,?,?,?,?,?)
             ON CONFLICT(name) DO NOTHING",
            params![
                uuid::Uuid::new_v4().to_string(),
                name,
                name,
                actor_id_for(name),
                now,
                now
            ],
        )?;
        let tenant = self.require(name)?;
        if tenant.deleted_at.is_some() {
            return Err(CatalogConflict::Deleted(name.to_string()).into());
        }
        Ok((tenant, inserted == 1))
    }

    pub fn list(&self, include_deleted: bool) -> Result<Vec<TenantRecord>> {
        let conn = self.conn.lock();
        let filter = if include_deleted {
            ""
        } else {
            " WHERE deleted_at IS NULL"
        };
        let sql = format!(
            "SELECT {} FROM tenants{} ORDER BY created ASC, name ASC",
            Self::TENANT_COLS,
            filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::tenant_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_tenant(&self, name: &str, set: &str, value: rusqlite::types::Value) -> Result<TenantRecord> {
        {
            let conn = self.conn.lock();
            let sql = format!("UPDATE tenants SET {set}, updated = ? WHERE name = ?");
            let n = conn.execute(&sql, params![value, now_rfc3339(), name])?;
            if n == 0 {
                bail!("tenant {name:?} not found");
            }
        }
        self.require(name)
    }

    pub fn rename(&self, name: &str, label: &str) -> Result<TenantRecord> {
        if label.trim().is_empty() {
            bail!("label must not be empty");
        }
        self.update_tenant(name, "label = ?", label.trim().to_string().into())
    }

    /// Record a successful migration run; clears the needs-update flag.
    pub fn set_schema_version(&self, name: &str, version: i64) -> Result<TenantRecord> {
        self.update_tenant(name, "needs_update = 0, schema_version = ?", version.into())
    }

    pub fn mark_needs_update(&self, name: &str, flag: bool) -> Result<TenantRecord> {
        self.update_tenant(name, "needs_update = ?", i64::from(flag).into())
    }

    pub fn archive(&self, name: &str) -> Result<TenantRecord> {
        self.update_tenant(name, "active = 0, archived = ?", 1i64.into())
    }

    /// Stamp `deleted_at` on the tenant and its tokens.
    pub fn soft_delete(&self, name: &str) -> Result<TenantRecord> {
        let record = self.require(name)?;
        let now = now_rfc3339();
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE tenants SET active = 0, deleted_at = COALESCE(deleted_at, ?), updated = ? WHERE id = ?",
                params![now, now, record.id],
            )?;
            conn.execute(
                "UPDATE api_tokens SET deleted_at = COALESCE(deleted_at, ?) WHERE tenant_id = ?",
                params![now, record.id],
            )?;
        }
        self.require(name)
    }

    /// Mint a signed token for `name` and store it as a new API Token Record.
    /// Earlier tokens stay valid until revoked or expired.
    pub fn issue_token(&self, name: &str, secret: &[u8], ttl: Duration) -> Result<ApiTokenRecord> {
        let tenant = self.require(name)?;
        if tenant.deleted_at.is_some() {
            return Err(CatalogConflict::Deleted(name.to_string()).into());
        }
        if !tenant.active {
            return Err(CatalogConflict::Inactive(name.to_string()).into());
        }
        let expires_at_ms = self.clock.now_ms() + ttl.as_millis() as u64;
        let signed = tdb_token::mint(&tenant.name, secret, expires_at_ms)?;
        let record = ApiTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant.id,
            token: signed.encode(),
            revoked: false,
            expires_at_ms: Some(expires_at_ms as i64),
            created: now_rfc3339(),
            deleted_at: None,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_tokens(id,tenant_id,token,revoked,expires_at_ms,created) VALUES (?,?,?,0,?,?)",
            params![
                record.id,
                record.tenant_id,
                record.token,
                record.expires_at_ms,
                record.created
            ],
        )?;
        Ok(record)
    }

    pub fn revoke_token(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE api_tokens SET revoked = 1 WHERE id = ? AND revoked = 0",
            params![id],
        )?;
        Ok(n > 0)
    }

    pub fn list_tokens(&self, name: &str) -> Result<Vec<ApiTokenRecord>> {
        let tenant = self.require(name)?;
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM api_tokens WHERE tenant_id = ? ORDER BY created DESC, rowid DESC",
            Self::TOKEN_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![tenant.id], Self::token_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Newest token that is neither revoked, expired, nor deleted.
    pub fn active_token(&self, name: &str) -> Result<Option<ApiTokenRecord>> {
        let now = self.clock.now_ms();
        Ok(self
            .list_tokens(name)?
            .into_iter()
            .find(|t| t.is_usable(now)))
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn ensure_tenant_async(&self, name: &str) -> Result<(TenantRecord, bool)> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.ensure_tenant(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_async(&self, name: &str) -> Result<Option<TenantRecord>> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.get(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_async(&self, include_deleted: bool) -> Result<Vec<TenantRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list(include_deleted))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn issue_token_async(
        &self,
        name: &str,
        secret: &[u8],
        ttl: Duration,
    ) -> Result<ApiTokenRecord> {
        let k = self.clone();
        let name = name.to_string();
        let secret = secret.to_vec();
        tokio::task::spawn_blocking(move || k.issue_token(&name, &secret, ttl))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn revoke_token_async(&self, id: &str) -> Result<bool> {
        let k = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || k.revoke_token(&id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn soft_delete_async(&self, name: &str) -> Result<TenantRecord> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.soft_delete(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn set_schema_version_async(&self, name: &str, version: i64) -> Result<TenantRecord> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.set_schema_version(&name, version))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn mark_needs_update_async(&self, name: &str, flag: bool) -> Result<TenantRecord> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.mark_needs_update(&name, flag))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn rename_async(&self, name: &str, label: &str) -> Result<TenantRecord> {
        let k = self.clone();
        let name = name.to_string();
        let label = label.to_string();
        tokio::task::spawn_blocking(move || k.rename(&name, &label))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn active_token_async(&self, name: &str) -> Result<Option<ApiTokenRecord>> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.active_token(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdb_token::ManualClock;

    const SECRET: &[u8] = b"s3cret";

    fn catalog() -> (Catalog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (Catalog::in_memory(clock.clone()).unwrap(), clock)
    }

    #[test]
    fn provisioning_is_idempotent_and_stably_addressed() {
        let (cat, _) = catalog();
        let a = cat.provision("acme").unwrap();
        let b = cat.provision("acme").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.actor_id, actor_id_for("acme"));
        assert_eq!(a.schema_version, 0);
        assert!(a.active && !a.archived && !a.needs_update);
        assert!(cat.provision("bad.name").is_err());
        assert!(cat.provision("").is_err());
    }

    #[test]
    fn concurrent_provisioning_creates_one_record() {
        let (cat, _) = catalog();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cat = cat.clone();
                std::thread::spawn(move || cat.ensure_tenant("acme"))
            })
            .collect();
        let results: Vec<(TenantRecord, bool)> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        assert!(results.iter().all(|(t, _)| t == &results[0].0));
        assert_eq!(cat.list(true).unwrap().len(), 1);
    }

    #[test]
    fn lifecycle_conflicts_are_typed() {
        let (cat, _) = catalog();
        cat.provision("acme").unwrap();
        cat.archive("acme").unwrap();
        let err = cat.issue_token("acme", SECRET, Duration::from_secs(60)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CatalogConflict>(),
            Some(&CatalogConflict::Inactive("acme".into()))
        );
        cat.soft_delete("acme").unwrap();
        let err = cat.provision("acme").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CatalogConflict>(),
            Some(&CatalogConflict::Deleted("acme".into()))
        );
    }

    #[test]
    fn rename_and_migration_flags_update_record() {
        let (cat, _) = catalog();
        cat.provision("acme").unwrap();
        let renamed = cat.rename("acme", "Acme Corp").unwrap();
        assert_eq!(renamed.label, "Acme Corp");
        assert_eq!(renamed.name, "acme");
        assert!(cat.mark_needs_update("acme", true).unwrap().needs_update);
        let migrated = cat.set_schema_version("acme", 3).unwrap();
        assert_eq!(migrated.schema_version, 3);
        assert!(!migrated.needs_update);
        let archived = cat.archive("acme").unwrap();
        assert!(archived.archived && !archived.active);
        assert!(cat.rename("missing", "x").is_err());
    }

    #[test]
    fn soft_delete_hides_but_keeps_records() {
        let (cat, _) = catalog();
        cat.provision("acme").unwrap();
        cat.provision("globex").unwrap();
        cat.issue_token("acme", SECRET, Duration::from_secs(60)).unwrap();
        let deleted = cat.soft_delete("acme").unwrap();
        assert!(deleted.deleted_at.is_some());
        assert_eq!(cat.list(false).unwrap().len(), 1);
        assert_eq!(cat.list(true).unwrap().len(), 2);
        assert!(cat.active_token("acme").unwrap().is_none());
        assert!(cat.provision("acme").is_err());
    }

    #[test]
    fn active_token_filters_revoked_and_expired() {
        let (cat, clock) = catalog();
        cat.provision("acme").unwrap();
        let old = cat.issue_token("acme", SECRET, Duration::from_secs(10)).unwrap();
        clock.advance(1);
        let newer = cat.issue_token("acme", SECRET, Duration::from_secs(3600)).unwrap();
        assert_eq!(cat.active_token("acme").unwrap().unwrap().id, newer.id);

        assert!(cat.revoke_token(&newer.id).unwrap());
        assert!(!cat.revoke_token(&newer.id).unwrap());
        assert_eq!(cat.active_token("acme").unwrap().unwrap().id, old.id);

        clock.advance(10_000);
        assert!(cat.active_token("acme").unwrap().is_none());
        assert_eq!(cat.list_tokens("acme").unwrap().len(), 2);
    }

    #[test]
    fn issued_tokens_verify_against_the_secret() {
        let (cat, clock) = catalog();
        cat.provision("acme").unwrap();
        let rec = cat.issue_token("acme", SECRET, Duration::from_secs(60)).unwrap();
        let verified = tdb_token::verify(&rec.token, "acme", SECRET, clock.now_ms()).unwrap();
        assert_eq!(verified.expires_at_ms as i64, rec.expires_at_ms.unwrap());
    }

    #[test]
    fn catalog_persists_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        {
            let cat = Catalog::open(tmp.path(), clock.clone()).unwrap();
            cat.provision("acme").unwrap();
        }
        let cat = Catalog::open(tmp.path(), clock).unwrap();
        assert!(cat.get("acme").unwrap().is_some());
    }
}
