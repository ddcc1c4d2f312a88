use std::collections::BTreeMap;

use tdb_migrate::Schema;

const DEFAULT_KEY: &str = "id";

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
}

impl TableMeta {
    /// Single-column key used for lookups; `id` for composite or unknown keys.
    pub fn key_column(&self) -> &str {
        match self.primary_key.as_slice() {
            [single] => single,
            _ => DEFAULT_KEY,
        }
    }
}

/// Logical table name to accessor metadata, built once from a schema.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableMeta>,
}

impl TableRegistry {
    pub fn from_schema(schema: &Schema) -> Self {
        let mut registry = Self::default();
        for table in &schema.tables {
            registry.register(TableMeta {
                name: table.name.clone(),
                primary_key: table.primary_key().into_iter().map(str::to_string).collect(),
                columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            });
        }
        registry
    }

    pub fn register(&mut self, meta: TableMeta) {
        self.tables.insert(meta.name.clone(), meta);
    }

    pub fn get(&self, name: &str) -> Option<&TableMeta> {
        self.tables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn key_column(&self, table: &str) -> &str {
        self.get(table).map(TableMeta::key_column).unwrap_or(DEFAULT_KEY)
    }
}
