//! Ordered key-value space stored beside the tenant's SQL tables.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tdb_protocol::{KvEntry, KvKey, KvListReq, KvListResult, KvPutReq};

use crate::error::ActorError;

pub(crate) const MAX_KEY_BYTES: usize = 512;
pub(crate) const DEFAULT_LIST_LIMIT: u32 = 1000;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS _kv (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL,
          metadata TEXT,
          expires_at INTEGER
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS idx_kv_expires ON _kv(expires_at);
        "#,
    )
}

fn check_key(key: &str) -> Result<(), ActorError> {
    if key.is_empty() {
        return Err(ActorError::BadRequest("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(ActorError::BadRequest(format!(
            "key exceeds {MAX_KEY_BYTES} bytes"
        )));
    }
    Ok(())
}

fn parse_json(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

pub(crate) fn get(conn: &Connection, key: &str, now_secs: i64) -> Result<Value, ActorError> {
    check_key(key)?;
    let row: Option<(String, Option<String>, Option<i64>)> = conn
        .query_row(
            "SELECT value, metadata, expires_at FROM _kv WHERE key = ?",
            params![key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((value, metadata, expires_at)) = row else {
        return Ok(Value::Null);
    };
    if expires_at.is_some_and(|at| at <= now_secs) {
        conn.execute("DELETE FROM _kv WHERE key = ?", params![key])?;
        return Ok(Value::Null);
    }
    let entry = KvEntry {
        value: serde_json::from_str(&value).unwrap_or(Value::String(value)),
        metadata: parse_json(metadata),
        expiration: expires_at,
    };
    serde_json::to_value(entry).map_err(|e| ActorError::Storage(e.to_string()))
}

pub(crate) fn put(conn: &Connection, req: &KvPutReq, now_secs: i64) -> Result<Value, ActorError> {
    check_key(&req.key)?;
    let expires_at = match (req.expiration, req.expiration_ttl) {
        (Some(at), _) => Some(at),
        (None, Some(ttl)) if ttl > 0 => Some(now_secs + ttl),
        (None, Some(_)) => {
            return Err(ActorError::BadRequest(
                "expirationTtl must be positive".into(),
            ))
        }
        (None, None) => None,
    };
    if expires_at.is_some_and(|at| at <= now_secs) {
        return Err(ActorError::BadRequest("expiration is in the past".into()));
    }
    let metadata = req.metadata.as_ref().map(Value::to_string);
    conn.execute(
        "INSERT INTO _kv(key, value, metadata, expires_at) VALUES (?,?,?,?)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value, metadata=excluded.metadata, expires_at=excluded.expires_at",
        params![req.key, req.value.to_string(), metadata, expires_at],
    )?;
    Ok(serde_json::json!({ "key": req.key }))
}

pub(crate) fn delete(conn: &Connection, key: &str) -> Result<Value, ActorError> {
    check_key(key)?;
    let n = conn.execute("DELETE FROM _kv WHERE key = ?", params![key])?;
    Ok(serde_json::json!({ "deleted": n > 0 }))
}

fn encode_cursor(key: &str) -> String {
    hex::encode(key.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<String, ActorError> {
    hex::decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ActorError::BadRequest("invalid list cursor".into()))
}

pub(crate) fn list(conn: &Connection, req: &KvListReq, now_secs: i64) -> Result<Value, ActorError> {
    conn.execute(
        "DELETE FROM _kv WHERE expires_at IS NOT NULL AND expires_at <= ?",
        params![now_secs],
    )?;
    let limit = req
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, DEFAULT_LIST_LIMIT);
    let prefix = req.prefix.clone().unwrap_or_default();
    let after = req.cursor.as_deref().map(decode_cursor).transpose()?;

    let (cmp, order) = if req.reverse {
        ("<", "DESC")
    } else {
        (">", "ASC")
    };
    let mut sql = String::from(
        "SELECT key, metadata, expires_at FROM _kv WHERE substr(key, 1, ?1) = ?2",
    );
    if after.is_some() {
        sql.push_str(&format!(" AND key {cmp} ?4"));
    }
    sql.push_str(&format!(" ORDER BY key {order} LIMIT ?3"));

    let prefix_len = prefix.chars().count() as i64;
    let fetch = i64::from(limit) + 1;
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = match &after {
        Some(cursor) => stmt.query(params![prefix_len, prefix, fetch, cursor])?,
        None => stmt.query(params![prefix_len, prefix, fetch])?,
    };
    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        keys.push(KvKey {
            name: row.get(0)?,
            metadata: parse_json(row.get(1)?),
            expiration: row.get(2)?,
        });
    }
    let list_complete = keys.len() <= limit as usize;
    keys.truncate(limit as usize);
    let cursor = if list_complete {
        None
    } else {
        keys.last().map(|k| encode_cursor(&k.name))
    };
    let result = KvListResult {
        keys,
        list_complete,
        cursor,
    };
    serde_json::to_value(result).map_err(|e| ActorError::Storage(e.to_string()))
}
