use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::{json, Value};
use tdb_protocol::{FirstReq, RpcRequest, Statement};
use tdb_token::Clock;
use tracing::{debug, warn};

use crate::error::ActorError;
use crate::kv;
use crate::value::{row_array, row_object, to_sql};

pub const HISTORY_TABLE: &str = "migrations_history";

#[derive(Debug, Clone)]
pub enum Location {
    Memory,
    File(PathBuf),
}

/// Result of one dispatched call plus the bookmark to hand back.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorReply {
    pub results: Value,
    pub bookmark: String,
}

struct Outcome {
    results: Value,
    wrote: bool,
}

impl Outcome {
    fn read(results: Value) -> Self {
        Self {
            results,
            wrote: false,
        }
    }

    fn write(results: Value) -> Self {
        Self {
            results,
            wrote: true,
        }
    }
}

#[derive(Clone, Copy)]
enum Shape {
    Objects,
    Arrays,
}

/// One tenant's storage unit: an embedded SQLite engine plus the ordered
/// key-value space, serialised behind a single connection.
pub struct Actor {
    id: String,
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
    bootstrapped: AtomicBool,
}

impl Actor {
    pub fn open(
        id: &str,
        location: &Location,
        clock: Arc<dyn Clock>,
        busy_timeout: Duration,
    ) -> Result<Self, ActorError> {
        let storage = |e: rusqlite::Error| ActorError::Storage(e.to_string());
        let conn = match location {
            Location::Memory => Connection::open_in_memory().map_err(storage)?,
            Location::File(path) => {
                let conn = Connection::open(path).map_err(storage)?;
                conn.pragma_update(None, "journal_mode", "WAL")
                    .map_err(storage)?;
                conn.pragma_update(None, "synchronous", "NORMAL")
                    .map_err(storage)?;
                conn
            }
        };
        conn.busy_timeout(busy_timeout).map_err(storage)?;
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        Ok(Self {
            id: id.to_string(),
            conn: Mutex::new(conn),
            clock,
            seq: AtomicU64::new(0),
            bootstrapped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bookmark(&self) -> String {
        format!("{}-{:016x}", self.bookmark_prefix(), self.seq.load(Ordering::SeqCst))
    }

    fn bookmark_prefix(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    /// Fold a client-supplied bookmark into the commit sequence. Bookmarks
    /// minted by another actor, or that fail to parse, are ignored.
    fn observe_bookmark(&self, bookmark: Option<&str>) {
        let Some(raw) = bookmark else { return };
        let Some((prefix, seq_hex)) = raw.split_once('-') else {
            return;
        };
        if prefix != self.bookmark_prefix() {
            return;
        }
        if let Ok(seen) = u64::from_str_radix(seq_hex, 16) {
            let prev = self.seq.fetch_max(seen, Ordering::SeqCst);
            if seen > prev {
                debug!(
                    target: "tdb::actor",
                    actor = %self.id,
                    seen,
                    prev,
                    "bookmark ahead of local sequence; actor restarted"
                );
            }
        }
    }

    fn ensure_bootstrap(&self, conn: &Connection) -> Result<(), ActorError> {
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(());
        }
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS migrations_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              tag TEXT NOT NULL UNIQUE,
              created_at INTEGER NOT NULL
            );
            "#,
        )?;
        kv::init(conn)?;
        self.bootstrapped.store(true, Ordering::Release);
        Ok(())
    }

    /// Execute one call. A "no such table" failure re-initialises the
    /// bookkeeping tables and retries the call exactly once.
    pub fn dispatch(
        &self,
        request: &RpcRequest,
        bookmark: Option<&str>,
    ) -> Result<ActorReply, ActorError> {
        self.observe_bookmark(bookmark);
        let mut conn = self.conn.lock();
        self.ensure_bootstrap(&conn)?;
        let outcome = match self.execute(&mut conn, request) {
            Err(err) if err.is_missing_table() => {
                warn!(
                    target: "tdb::actor",
                    actor = %self.id,
                    verb = request.verb().as_str(),
                    error = %err,
                    "missing table; re-initialising bookkeeping and retrying once"
                );
                self.bootstrapped.store(false, Ordering::Release);
                self.ensure_bootstrap(&conn)?;
                self.execute(&mut conn, request)?
            }
            other => other?,
        };
        if outcome.wrote {
            self.seq.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ActorReply {
            results: outcome.results,
            bookmark: self.bookmark(),
        })
    }

    fn execute(&self, conn: &mut Connection, request: &RpcRequest) -> Result<Outcome, ActorError> {
        let now_secs = (self.clock.now_ms() / 1000) as i64;
        match request {
            RpcRequest::Run(stmt) => statement(conn, stmt, Shape::Objects),
            RpcRequest::Raw(stmt) => statement(conn, stmt, Shape::Arrays),
            RpcRequest::First(req) => first(conn, req),
            RpcRequest::Exec(req) => exec(conn, &req.query),
            RpcRequest::Batch(stmts) => batch(conn, stmts),
            RpcRequest::KvGet(req) => Ok(Outcome::read(kv::get(conn, &req.key, now_secs)?)),
            RpcRequest::KvPut(req) => Ok(Outcome::write(kv::put(conn, req, now_secs)?)),
            RpcRequest::KvDelete(req) => Ok(Outcome::write(kv::delete(conn, &req.key)?)),
            RpcRequest::KvList(req) => Ok(Outcome::read(kv::list(conn, req, now_secs)?)),
        }
    }
}

fn statement(conn: &Connection, stmt: &Statement, shape: Shape) -> Result<Outcome, ActorError> {
    let mut prepared = conn.prepare(&stmt.query)?;
    let wrote = !prepared.readonly();
    let columns: Vec<String> = prepared
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let params = rusqlite::params_from_iter(stmt.params.iter().map(to_sql));
    let mut rows = prepared.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(match shape {
            Shape::Objects => row_object(&columns, row)?,
            Shape::Arrays => row_array(columns.len(), row)?,
        });
    }
    Ok(Outcome {
        results: Value::Array(out),
        wrote,
    })
}

fn first(conn: &Connection, req: &FirstReq) -> Result<Outcome, ActorError> {
    let stmt = Statement::new(req.query.clone(), req.params.clone());
    let outcome = statement(conn, &stmt, Shape::Objects)?;
    let row = match outcome.results {
        Value::Array(rows) => rows.into_iter().next(),
        _ => None,
    };
    let results = match (row, req.column.as_deref()) {
        (None, _) => Value::Null,
        (Some(row), None) => row,
        (Some(row), Some(column)) => row
            .get(column)
            .cloned()
            .ok_or_else(|| ActorError::Sql(format!("column not found: {column}")))?,
    };
    Ok(Outcome {
        results,
        wrote: outcome.wrote,
    })
}

fn exec(conn: &Connection, query: &str) -> Result<Outcome, ActorError> {
    let started = Instant::now();
    let total = |conn: &Connection| -> Result<i64, ActorError> {
        Ok(conn.query_row("SELECT total_changes()", [], |r| r.get(0))?)
    };
    let before = total(conn)?;
    conn.execute_batch(query)?;
    let changes = total(conn)? - before;
    Ok(Outcome::write(json!({
        "changes": changes,
        "last_row_id": conn.last_insert_rowid(),
        "duration_ms": started.elapsed().as_millis() as u64,
    })))
}

/// All statements commit together or not at all.
fn batch(conn: &mut Connection, stmts: &[Statement]) -> Result<Outcome, ActorError> {
    let tx = conn.transaction()?;
    let mut results = Vec::with_capacity(stmts.len());
    let mut wrote = false;
    for (idx, stmt) in stmts.iter().enumerate() {
        let outcome = statement(&tx, stmt, Shape::Objects).inspect_err(|err| {
            debug!(target: "tdb::actor", statement = idx, error = %err, "batch rolled back");
        })?;
        wrote |= outcome.wrote;
        results.push(outcome.results);
    }
    tx.commit()?;
    Ok(Outcome {
        results: Value::Array(results),
        wrote,
    })
}
