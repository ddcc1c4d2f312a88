//! Schema snapshots, diff-to-SQL generation and journal application.

mod apply;
mod diff;
mod error;
mod generate;
mod journal;
mod schema;

pub use apply::{applied_tags, apply, ApplyReport};
pub use diff::{create_all, create_index_sql, create_table_sql, diff, Diff};
pub use error::MigrateError;
pub use generate::{generate, render_sql, GenerateOptions, Generated};
pub use journal::{
    split_statements, Journal, JournalEntry, Migration, MigrationDir, BREAKPOINT,
};
pub use schema::{is_identifier, Column, Index, Reference, Schema, Table, SNAPSHOT_VERSION};
