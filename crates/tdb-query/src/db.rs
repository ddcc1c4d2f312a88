use std::sync::Arc;

use serde_json::{json, Map, Value};
use tdb_protocol::RpcClient;

use crate::error::QueryError;
use crate::include;
use crate::mutate::{compile_count, compile_delete, compile_insert, compile_update};
use crate::registry::{TableMeta, TableRegistry};
use crate::select::{Compiled, Query};

/// Query front end over any [`RpcClient`].
#[derive(Clone)]
pub struct Db {
    client: Arc<dyn RpcClient>,
    registry: Arc<TableRegistry>,
}

impl Db {
    pub fn new(client: Arc<dyn RpcClient>, registry: TableRegistry) -> Self {
        Self {
            client,
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Accessor for a registered table.
    pub fn table(&self, name: &str) -> Result<TableRef<'_>, QueryError> {
        let meta = self
            .registry
            .get(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))?;
        Ok(TableRef { db: self, meta })
    }

    async fn run(&self, compiled: Compiled) -> Result<Vec<Value>, QueryError> {
        Ok(self.client.run(&compiled.sql, compiled.params).await?)
    }

    /// Run a select and attach its includes.
    pub async fn all(&self, query: &Query) -> Result<Vec<Value>, QueryError> {
        let mut rows = self.run(query.compile()?).await?;
        if rows.is_empty() {
            return Ok(rows);
        }
        for inc in &query.includes {
            include::resolve(
                self.client.as_ref(),
                &self.registry,
                &query.table,
                &mut rows,
                inc,
            )
            .await?;
        }
        Ok(rows)
    }

    pub async fn first(&self, query: Query) -> Result<Option<Value>, QueryError> {
        Ok(self.all(&query.limit(1)).await?.into_iter().next())
    }
}

/// Operations bound to one registered table.
pub struct TableRef<'a> {
    db: &'a Db,
    meta: &'a TableMeta,
}

impl TableRef<'_> {
    pub fn meta(&self) -> &TableMeta {
        self.meta
    }

    pub fn query(&self) -> Query {
        Query::from(self.meta.name.clone())
    }

    pub async fn all(&self, query: &Query) -> Result<Vec<Value>, QueryError> {
        self.db.all(query).await
    }

    /// Row by primary key.
    pub async fn find(&self, key: Value) -> Result<Option<Value>, QueryError> {
        let mut filter = Map::new();
        filter.insert(self.meta.key_column().to_string(), json!({ "eq": key }));
        self.db.first(self.query().r#where(Value::Object(filter))).await
    }

    pub async fn count(&self, filter: Option<Value>) -> Result<i64, QueryError> {
        let rows = self
            .db
            .run(compile_count(&self.meta.name, filter.as_ref())?)
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    pub async fn insert(&self, records: Value) -> Result<Vec<Value>, QueryError> {
        self.db.run(compile_insert(&self.meta.name, &records)?).await
    }

    pub async fn update(&self, values: Value, filter: Option<Value>) -> Result<Vec<Value>, QueryError> {
        self.db
            .run(compile_update(&self.meta.name, &values, filter.as_ref())?)
            .await
    }

    pub async fn delete(&self, filter: Option<Value>) -> Result<Vec<Value>, QueryError> {
        self.db
            .run(compile_delete(&self.meta.name, filter.as_ref())?)
            .await
    }
}
