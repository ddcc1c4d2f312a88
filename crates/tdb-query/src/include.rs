//! Relation includes resolved with one batched `IN` lookup per include.

use std::collections::HashMap;

use serde_json::Value;
use tdb_protocol::RpcClient;
use tracing::debug;

use crate::error::{ident, QueryError};
use crate::filter::in_list;
use crate::registry::TableRegistry;
use crate::select::Query;

#[derive(Debug, Clone, PartialEq)]
pub enum Include {
    /// Resolve by naming convention. If rows carry `<singular(table)>Id`
    /// the include is a parent lookup on the related primary key,
    /// otherwise a child lookup on `<singular(own table)>Id`. Attached
    /// under the table name.
    Auto { table: String },
    /// Join `row[local_key]` to `table.foreign_key`, attached as `alias`.
    /// A single object when `foreign_key` is the related primary key, an
    /// array otherwise.
    Explicit {
        table: String,
        local_key: String,
        foreign_key: String,
        alias: String,
    },
}

/// English singular for conventional table names.
pub fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "xes", "ches", "shes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") && word.len() > 1 {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

#[derive(Debug, PartialEq)]
struct Plan {
    table: String,
    alias: String,
    local_key: String,
    foreign_key: String,
    many: bool,
}

fn plan(include: &Include, own_table: &str, rows: &[Value], registry: &TableRegistry) -> Plan {
    match include {
        Include::Auto { table } => {
            let parent_col = format!("{}Id", singular(table));
            let is_parent = rows.iter().any(|r| r.get(&parent_col).is_some());
            if is_parent {
                Plan {
                    table: table.clone(),
                    alias: table.clone(),
                    local_key: parent_col,
                    foreign_key: registry.key_column(table).to_string(),
                    many: false,
                }
            } else {
                Plan {
                    table: table.clone(),
                    alias: table.clone(),
                    local_key: registry.key_column(own_table).to_string(),
                    foreign_key: format!("{}Id", singular(own_table)),
                    many: true,
                }
            }
        }
        Include::Explicit {
            table,
            local_key,
            foreign_key,
            alias,
        } => Plan {
            table: table.clone(),
            alias: alias.clone(),
            local_key: local_key.clone(),
            foreign_key: foreign_key.clone(),
            many: foreign_key != registry.key_column(table),
        },
    }
}

fn group_key(v: &Value) -> String {
    v.to_string()
}

pub(crate) async fn resolve(
    client: &dyn RpcClient,
    registry: &TableRegistry,
    own_table: &str,
    rows: &mut [Value],
    include: &Include,
) -> Result<(), QueryError> {
    let plan = plan(include, own_table, rows, registry);
    let fail = |reason: String| QueryError::Include {
        alias: plan.alias.clone(),
        reason,
    };
    ident(&plan.alias).map_err(|e| fail(e.to_string()))?;

    let mut keys: Vec<Value> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for row in rows.iter() {
        if let Some(v) = row.get(&plan.local_key).filter(|v| !v.is_null()) {
            if seen.insert(group_key(v)) {
                keys.push(v.clone());
            }
        }
    }

    let mut related: HashMap<String, Vec<Value>> = HashMap::new();
    if !keys.is_empty() {
        let compiled = Query::from(plan.table.clone())
            .r#where(in_list(&plan.foreign_key, keys))
            .compile()?;
        debug!(target: "tdb::query", include = %plan.alias, sql = %compiled.sql, "resolving include");
        for row in client.run(&compiled.sql, compiled.params).await? {
            let key = row
                .get(&plan.foreign_key)
                .map(group_key)
                .ok_or_else(|| fail(format!("related rows lack column {}", plan.foreign_key)))?;
            related.entry(key).or_default().push(row);
        }
    }

    for row in rows.iter_mut() {
        let matches = row
            .get(&plan.local_key)
            .and_then(|v| related.get(&group_key(v)))
            .cloned()
            .unwrap_or_default();
        let attached = if plan.many {
            Value::Array(matches)
        } else {
            matches.into_iter().next().unwrap_or(Value::Null)
        };
        if let Some(obj) = row.as_object_mut() {
            obj.insert(plan.alias.clone(), attached);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn singular_forms() {
        assert_eq!(singular("users"), "user");
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("boxes"), "box");
        assert_eq!(singular("addresses"), "address");
        assert_eq!(singular("parent"), "parent");
        assert_eq!(singular("class"), "class");
    }

    #[test]
    fn auto_plan_prefers_parent_when_row_has_the_column() {
        let registry = TableRegistry::default();
        let rows = vec![json!({"id": 1, "parentId": 5})];
        let p = plan(
            &Include::Auto { table: "parent".into() },
            "child",
            &rows,
            &registry,
        );
        assert_eq!(p.local_key, "parentId");
        assert_eq!(p.foreign_key, "id");
        assert!(!p.many);

        let p = plan(
            &Include::Auto { table: "posts".into() },
            "users",
            &[json!({"id": 1})],
            &registry,
        );
        assert_eq!(p.local_key, "id");
        assert_eq!(p.foreign_key, "userId");
        assert!(p.many);
    }

    #[test]
    fn explicit_plan_uses_descriptor() {
        let p = plan(
            &Include::Explicit {
                table: "users".into(),
                local_key: "managerId".into(),
                foreign_key: "id".into(),
                alias: "manager".into(),
            },
            "users",
            &[],
            &TableRegistry::default(),
        );
        assert_eq!(p.alias, "manager");
        assert!(!p.many);
    }
}
