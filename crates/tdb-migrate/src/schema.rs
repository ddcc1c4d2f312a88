//! Declarative schema snapshots.
//!
//! A snapshot is the normalised JSON form of a schema: tables in declared
//! order, each with typed columns, an optional composite key and indexes.
//! Normalisation makes two snapshots of the same schema compare equal.

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default = "snapshot_version")]
    pub version: u32,
    #[serde(default)]
    pub tables: Vec<Table>,
}

fn snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub composite_primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub autoincrement: bool,
    /// Raw SQL default expression, e.g. `0`, `'draft'`, `CURRENT_TIMESTAMP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// SQL identifiers accepted in schemas and queries.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_ident(kind: &str, name: &str) -> Result<(), MigrateError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(MigrateError::InvalidSchema(format!(
            "invalid {kind} name {name:?}"
        )))
    }
}

fn normalize_type(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.as_str() {
        "INT" | "BIGINT" | "SMALLINT" | "BOOLEAN" | "BOOL" => "INTEGER".into(),
        "STRING" | "VARCHAR" | "CHAR" | "CLOB" | "JSON" => "TEXT".into(),
        "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => "REAL".into(),
        "" => "BLOB".into(),
        _ => upper,
    }
}

impl Schema {
    pub fn from_json(raw: &str) -> Result<Self, MigrateError> {
        let schema: Schema = serde_json::from_str(raw)
            .map_err(|e| MigrateError::InvalidSchema(e.to_string()))?;
        schema.normalized()
    }

    pub fn to_json(&self) -> String {
        // A Schema holds only strings, bools and vectors.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Validate identifiers and canonicalise types, keys and index names.
    pub fn normalized(mut self) -> Result<Self, MigrateError> {
        self.version = SNAPSHOT_VERSION;
        let mut seen_tables = std::collections::HashSet::new();
        for table in &mut self.tables {
            check_ident("table", &table.name)?;
            if !seen_tables.insert(table.name.clone()) {
                return Err(MigrateError::InvalidSchema(format!(
                    "duplicate table {:?}",
                    table.name
                )));
            }
            table.normalize()?;
        }
        Ok(self)
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns forming the primary key, composite or single.
    pub fn primary_key(&self) -> Vec<&str> {
        if !self.composite_primary_key.is_empty() {
            return self.composite_primary_key.iter().map(String::as_str).collect();
        }
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    fn normalize(&mut self) -> Result<(), MigrateError> {
        if self.columns.is_empty() {
            return Err(MigrateError::InvalidSchema(format!(
                "table {:?} has no columns",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for col in &mut self.columns {
            check_ident("column", &col.name)?;
            if !seen.insert(col.name.clone()) {
                return Err(MigrateError::InvalidSchema(format!(
                    "duplicate column {}.{}",
                    self.name, col.name
                )));
            }
            col.sql_type = normalize_type(&col.sql_type);
            col.default = col
                .default
                .take()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
            if col.primary_key {
                col.not_null = true;
            }
            if let Some(r) = &col.references {
                check_ident("table", &r.table)?;
                check_ident("column", &r.column)?;
            }
        }
        if self.columns.iter().filter(|c| c.primary_key).count() > 1
            && self.composite_primary_key.is_empty()
        {
            self.composite_primary_key = self
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect();
        }
        if !self.composite_primary_key.is_empty() {
            for name in &self.composite_primary_key {
                if self.column(name).is_none() {
                    return Err(MigrateError::InvalidSchema(format!(
                        "primary key column {}.{} does not exist",
                        self.name, name
                    )));
                }
            }
            for col in &mut self.columns {
                if self.composite_primary_key.contains(&col.name) {
                    col.primary_key = false;
                    col.not_null = true;
                }
            }
        }
        for index in &mut self.indexes {
            if index.columns.is_empty() {
                return Err(MigrateError::InvalidSchema(format!(
                    "index on {:?} has no columns",
                    self.name
                )));
            }
            for c in &index.columns {
                if !self.columns.iter().any(|col| &col.name == c) {
                    return Err(MigrateError::InvalidSchema(format!(
                        "index column {}.{} does not exist",
                        self.name, c
                    )));
                }
            }
            if index.name.is_empty() {
                let suffix = if index.unique { "unique" } else { "idx" };
                index.name = format!("{}_{}_{}", self.name, index.columns.join("_"), suffix);
            }
            check_ident("index", &index.name)?;
        }
        self.indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }
}
