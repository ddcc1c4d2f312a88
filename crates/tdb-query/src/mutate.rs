//! Single-statement mutations. Every statement returns the affected rows.

use serde_json::{Map, Value};

use crate::error::{ident, QueryError};
use crate::select::{Compiled, Query};

fn object<'a>(v: &'a Value, what: &str) -> Result<&'a Map<String, Value>, QueryError> {
    v.as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| QueryError::InvalidMutation(format!("{what} must be a non-empty object")))
}

fn filter_groups(filter: Option<&Value>) -> Vec<Value> {
    filter.cloned().into_iter().collect()
}

/// One record or an array of records with identical keys.
pub fn compile_insert(table: &str, records: &Value) -> Result<Compiled, QueryError> {
    let table = ident(table)?;
    let rows: Vec<&Map<String, Value>> = match records {
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|r| object(r, "insert record"))
            .collect::<Result<_, _>>()?,
        Value::Array(_) => return Err(QueryError::InvalidMutation("nothing to insert".into())),
        single => vec![object(single, "insert record")?],
    };
    let mut columns: Vec<&String> = rows[0].keys().collect();
    columns.sort();
    for c in &columns {
        ident(c)?;
    }
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut tuples = Vec::with_capacity(rows.len());
    for row in &rows {
        if row.len() != columns.len() || columns.iter().any(|c| !row.contains_key(*c)) {
            return Err(QueryError::InvalidMutation(
                "all inserted records must have the same columns".into(),
            ));
        }
        for c in &columns {
            params.push(row[*c].clone());
        }
        tuples.push(format!("({})", vec!["?"; columns.len()].join(", ")));
    }
    let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    Ok(Compiled {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES {} RETURNING *",
            names.join(", "),
            tuples.join(", ")
        ),
        params,
    })
}

pub fn compile_update(
    table: &str,
    values: &Value,
    filter: Option<&Value>,
) -> Result<Compiled, QueryError> {
    let table = ident(table)?;
    let set = object(values, "update values")?;
    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(set.len());
    for (column, value) in set {
        assignments.push(format!("{} = ?", ident(column)?));
        params.push(value.clone());
    }
    let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
    sql.push_str(&Query::where_clause(&filter_groups(filter), &mut params)?);
    sql.push_str(" RETURNING *");
    Ok(Compiled { sql, params })
}

pub fn compile_delete(table: &str, filter: Option<&Value>) -> Result<Compiled, QueryError> {
    let table = ident(table)?;
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {table}");
    sql.push_str(&Query::where_clause(&filter_groups(filter), &mut params)?);
    sql.push_str(" RETURNING *");
    Ok(Compiled { sql, params })
}

pub fn compile_count(table: &str, filter: Option<&Value>) -> Result<Compiled, QueryError> {
    let table = ident(table)?;
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) AS count FROM {table}");
    sql.push_str(&Query::where_clause(&filter_groups(filter), &mut params)?);
    Ok(Compiled { sql, params })
}
