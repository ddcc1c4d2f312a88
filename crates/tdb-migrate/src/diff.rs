//! Snapshot diff to SQL.
//!
//! Additive changes compile to plain DDL. Anything SQLite cannot alter in
//! place, or that destroys data, is reported as a warning next to the best
//! SQL available (sometimes only a comment) so the generated file can be
//! reviewed before it is applied.

use std::fmt::Write as _;

use crate::schema::{Column, Index, Schema, Table};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.warnings.is_empty()
    }

    fn warn(&mut self, warning: String, sql: String) {
        self.warnings.push(warning);
        self.statements.push(sql);
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn column_def(col: &Column, in_create: bool) -> String {
    let mut def = format!("{} {}", quote(&col.name), col.sql_type);
    if in_create && col.primary_key {
        def.push_str(" PRIMARY KEY");
        if col.autoincrement && col.sql_type == "INTEGER" {
            def.push_str(" AUTOINCREMENT");
        }
    }
    if col.not_null {
        def.push_str(" NOT NULL");
    }
    if in_create && col.unique && !col.primary_key {
        def.push_str(" UNIQUE");
    }
    if let Some(default) = &col.default {
        let _ = write!(def, " DEFAULT {default}");
    }
    if let Some(r) = &col.references {
        let _ = write!(def, " REFERENCES {}({})", quote(&r.table), quote(&r.column));
        if let Some(action) = &r.on_delete {
            let _ = write!(def, " ON DELETE {}", action.to_ascii_uppercase());
        }
    }
    def
}

pub fn create_table_sql(table: &Table) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("\t{}", column_def(c, true)))
        .collect();
    if !table.composite_primary_key.is_empty() {
        let cols: Vec<String> = table.composite_primary_key.iter().map(|c| quote(c)).collect();
        lines.push(format!("\tPRIMARY KEY({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote(&table.name),
        lines.join(",\n")
    )
}

pub fn create_index_sql(table: &str, index: &Index) -> String {
    let cols: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        cols.join(", ")
    )
}

fn drop_index_sql(index: &Index) -> String {
    format!("DROP INDEX IF EXISTS {};", quote(&index.name))
}

/// Full DDL for a schema with no baseline.
pub fn create_all(schema: &Schema) -> Diff {
    diff(&Schema::default(), schema)
}

pub fn diff(prev: &Schema, next: &Schema) -> Diff {
    let mut out = Diff::default();
    for table in &next.tables {
        match prev.table(&table.name) {
            None => {
                out.statements.push(create_table_sql(table));
                for index in &table.indexes {
                    out.statements.push(create_index_sql(&table.name, index));
                }
            }
            Some(old) => diff_table(old, table, &mut out),
        }
    }
    for old in &prev.tables {
        if next.table(&old.name).is_none() {
            out.warn(
                format!("table {:?} was removed; its data will be dropped", old.name),
                format!("DROP TABLE {};", quote(&old.name)),
            );
        }
    }
    out
}

fn diff_table(old: &Table, new: &Table, out: &mut Diff) {
    let t = &new.name;

    for index in &old.indexes {
        let kept = new.indexes.iter().any(|i| i == index);
        if !kept {
            out.statements.push(drop_index_sql(index));
        }
    }

    if old.composite_primary_key != new.composite_primary_key {
        out.warn(
            format!("primary key of {t:?} changed; SQLite requires a table rebuild"),
            format!(
                "-- {}: primary key ({}) -> ({}) needs a manual table rebuild",
                t,
                old.composite_primary_key.join(", "),
                new.composite_primary_key.join(", ")
            ),
        );
    }

    for col in &old.columns {
        if new.column(&col.name).is_some() {
            continue;
        }
        if col.primary_key {
            out.warn(
                format!("primary key column {t}.{} was removed", col.name),
                format!(
                    "-- {t}.{}: dropping a primary key column needs a manual table rebuild",
                    col.name
                ),
            );
        } else {
            out.warn(
                format!("column {t}.{} was removed; its data will be dropped", col.name),
                format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    quote(t),
                    quote(&col.name)
                ),
            );
        }
    }

    for col in &new.columns {
        match old.column(&col.name) {
            None => add_column(t, col, out),
            Some(prev) if prev != col => alter_column(t, prev, col, out),
            Some(_) => {}
        }
    }

    for index in &new.indexes {
        let existed = old.indexes.iter().any(|i| i == index);
        if !existed {
            out.statements.push(create_index_sql(t, index));
        }
    }
}

fn add_column(t: &str, col: &Column, out: &mut Diff) {
    if col.primary_key {
        out.warn(
            format!("primary key column {t}.{} cannot be added in place", col.name),
            format!(
                "-- {t}.{}: adding a primary key column needs a manual table rebuild",
                col.name
            ),
        );
        return;
    }
    let mut col = col.clone();
    if col.not_null && col.default.is_none() {
        out.warnings.push(format!(
            "column {t}.{} is NOT NULL without a default; added as nullable",
            col.name
        ));
        col.not_null = false;
    }
    out.statements.push(format!(
        "ALTER TABLE {} ADD COLUMN {};",
        quote(t),
        column_def(&col, false)
    ));
    if col.unique {
        let index = Index {
            name: format!("{t}_{}_unique", col.name),
            columns: vec![col.name.clone()],
            unique: true,
        };
        out.statements.push(create_index_sql(t, &index));
    }
}

fn alter_column(t: &str, prev: &Column, next: &Column, out: &mut Diff) {
    let c = &next.name;
    if prev.sql_type != next.sql_type {
        out.warn(
            format!(
                "column {t}.{c} changed type {} -> {}",
                prev.sql_type, next.sql_type
            ),
            format!(
                "-- {t}.{c}: type {} -> {} needs a manual table rebuild",
                prev.sql_type, next.sql_type
            ),
        );
    }
    if prev.primary_key != next.primary_key {
        out.warn(
            format!("column {t}.{c} changed primary key membership"),
            format!("-- {t}.{c}: primary key change needs a manual table rebuild"),
        );
    }
    let constraints_changed = prev.not_null != next.not_null
        || prev.default != next.default
        || prev.references != next.references
        || prev.autoincrement != next.autoincrement;
    if constraints_changed && prev.primary_key == next.primary_key {
        out.warn(
            format!("column {t}.{c} changed constraints"),
            format!(
                "-- {t}.{c}: constraints changed to `{}`; needs a manual table rebuild",
                column_def(next, false)
            ),
        );
    }
    if prev.unique != next.unique {
        let index = Index {
            name: format!("{t}_{c}_unique"),
            columns: vec![c.clone()],
            unique: true,
        };
        if next.unique {
            out.statements.push(create_index_sql(t, &index));
        } else {
            out.warn(
                format!("column {t}.{c} is no longer unique"),
                format!(
                    "-- {t}.{c}: drop the inline UNIQUE constraint with a table rebuild; {}",
                    drop_index_sql(&index)
                ),
            );
        }
    }
}
