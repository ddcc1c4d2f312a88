use std::collections::HashSet;

use serde_json::{json, Value};
use tdb_protocol::{RpcClient, Statement};
use tracing::{info, warn};

use crate::error::MigrateError;
use crate::journal::Migration;

const HISTORY_QUERY: &str = "SELECT tag FROM migrations_history ORDER BY id";
const HISTORY_INSERT: &str = "INSERT INTO migrations_history (tag, created_at) VALUES (?, ?)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub skipped: usize,
    /// Index of the newest journal entry now recorded, plus one.
    pub schema_version: i64,
}

pub async fn applied_tags(client: &dyn RpcClient) -> Result<HashSet<String>, MigrateError> {
    let rows = client
        .run(HISTORY_QUERY, Vec::new())
        .await
        .map_err(MigrateError::History)?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("tag").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// Apply every unrecorded migration in index order, one atomic batch each.
///
/// Stops at the first failing batch; entries applied before it stay
/// recorded.
pub async fn apply(
    client: &dyn RpcClient,
    migrations: &[Migration],
    now_ms: i64,
) -> Result<ApplyReport, MigrateError> {
    let done = applied_tags(client).await?;
    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.idx);

    let mut report = ApplyReport::default();
    for migration in ordered {
        if done.contains(&migration.tag) {
            report.skipped += 1;
            report.schema_version = i64::from(migration.idx) + 1;
            continue;
        }
        let mut batch: Vec<Statement> = migration
            .statements()
            .into_iter()
            .map(Statement::bare)
            .collect();
        let count = batch.len();
        batch.push(Statement::new(
            HISTORY_INSERT,
            vec![json!(migration.tag), json!(now_ms)],
        ));
        if let Err(source) = client.batch(batch).await {
            warn!(target: "tdb::migrate", tag = %migration.tag, error = %source, "migration failed; aborting run");
            return Err(MigrateError::Apply {
                tag: migration.tag.clone(),
                source,
            });
        }
        info!(target: "tdb::migrate", tag = %migration.tag, statements = count, "migration applied");
        report.applied.push(migration.tag.clone());
        report.schema_version = i64::from(migration.idx) + 1;
    }
    Ok(report)
}
