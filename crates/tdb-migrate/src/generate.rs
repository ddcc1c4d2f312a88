use tracing::info;

use crate::diff::{create_all, diff, Diff};
use crate::error::MigrateError;
use crate::journal::{JournalEntry, MigrationDir, BREAKPOINT};
use crate::schema::Schema;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Explicit tag; defaults to `<idx:04>_init` or `<idx:04>_migration`.
    pub tag: Option<String>,
    /// Baseline to diff against instead of the stored snapshot.
    pub from_schema: Option<Schema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// `None` when the schema did not change.
    pub entry: Option<JournalEntry>,
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
}

/// Render statements as a migration file.
pub fn render_sql(diff: &Diff) -> String {
    let mut out = String::new();
    for warning in &diff.warnings {
        out.push_str("-- WARNING: ");
        out.push_str(warning);
        out.push('\n');
    }
    out.push_str(&diff.statements.join(&format!("\n{BREAKPOINT}\n")));
    out.push('\n');
    out
}

/// Produce the next migration for `schema` in `dir`.
///
/// The baseline is, in order: `opts.from_schema`, the stored snapshot, or
/// nothing (full `CREATE` statements). The stored snapshot always advances
/// to `schema`; a file and journal entry are only written when the diff is
/// non-empty.
pub fn generate(
    dir: &MigrationDir,
    schema: &Schema,
    opts: GenerateOptions,
) -> Result<Generated, MigrateError> {
    let schema = schema.clone().normalized()?;
    let mut journal = dir.load_journal()?;
    let baseline = match opts.from_schema {
        Some(from) => Some(from.normalized()?),
        None => dir.load_snapshot()?,
    };
    let first = baseline.is_none();
    let diff = match &baseline {
        Some(prev) => diff(prev, &schema),
        None => create_all(&schema),
    };

    if diff.is_empty() {
        dir.save_snapshot(&schema)?;
        info!(target: "tdb::migrate", dir = %dir.root().display(), "schema unchanged; no migration written");
        return Ok(Generated {
            entry: None,
            statements: Vec::new(),
            warnings: Vec::new(),
        });
    }

    let idx = journal.next_idx();
    let tag = opts.tag.unwrap_or_else(|| {
        format!("{idx:04}_{}", if first { "init" } else { "migration" })
    });
    if journal.contains(&tag) {
        return Err(MigrateError::TagExists(tag));
    }
    let entry = JournalEntry { idx, tag };
    journal.entries.push(entry.clone());
    journal.validate()?;

    dir.write_sql(&entry.tag, &render_sql(&diff))?;
    dir.save_journal(&journal)?;
    dir.save_snapshot(&schema)?;
    info!(
        target: "tdb::migrate",
        tag = %entry.tag,
        idx,
        statements = diff.statements.len(),
        warnings = diff.warnings.len(),
        "migration generated"
    );
    Ok(Generated {
        entry: Some(entry),
        statements: diff.statements,
        warnings: diff.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::split_statements;

    fn users(extra: &str) -> Schema {
        Schema::from_json(&format!(
            r#"{{"tables":[{{"name":"users","columns":[
                {{"name":"id","type":"integer","primaryKey":true}},
                {{"name":"email","type":"text"}}{extra}]}}]}}"#
        ))
        .unwrap()
    }

    #[test]
    fn first_generation_writes_create_statements() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        let out = generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        let entry = out.entry.unwrap();
        assert_eq!(entry, JournalEntry { idx: 0, tag: "0000_init".into() });
        let sql = std::fs::read_to_string(dir.sql_path("0000_init")).unwrap();
        assert!(sql.starts_with("CREATE TABLE \"users\""));
        assert_eq!(dir.load_snapshot().unwrap().unwrap(), users(""));
        assert_eq!(dir.load_journal().unwrap().entries.len(), 1);
    }

    #[test]
    fn unchanged_schema_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        let again = generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        assert!(again.entry.is_none());
        assert_eq!(dir.load_journal().unwrap().entries.len(), 1);
    }

    #[test]
    fn later_generation_diffs_against_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        let next = users(r#",{"name":"age","type":"integer"}"#);
        let out = generate(
            &dir,
            &next,
            GenerateOptions {
                tag: Some("0001_add_age".into()),
                from_schema: None,
            },
        )
        .unwrap();
        assert_eq!(out.entry.unwrap().idx, 1);
        let sql = std::fs::read_to_string(dir.sql_path("0001_add_age")).unwrap();
        assert_eq!(
            split_statements(&sql),
            vec!["ALTER TABLE \"users\" ADD COLUMN \"age\" INTEGER;"]
        );
        let dup = generate(
            &dir,
            &users(r#",{"name":"x","type":"text"}"#),
            GenerateOptions {
                tag: Some("0001_add_age".into()),
                from_schema: None,
            },
        );
        assert!(matches!(dup, Err(MigrateError::TagExists(_))));
    }

    #[test]
    fn explicit_baseline_wins_over_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        let out = generate(
            &dir,
            &users(""),
            GenerateOptions {
                tag: None,
                from_schema: Some(Schema::default()),
            },
        )
        .unwrap();
        assert_eq!(out.entry.unwrap().tag, "0001_migration");
        assert!(out.statements[0].starts_with("CREATE TABLE"));
    }

    #[test]
    fn warnings_are_written_as_header_comments() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        generate(&dir, &users(r#",{"name":"age","type":"integer"}"#), GenerateOptions::default())
            .unwrap();
        let out = generate(&dir, &users(""), GenerateOptions::default()).unwrap();
        assert_eq!(out.warnings.len(), 1);
        let sql = std::fs::read_to_string(dir.sql_path("0001_migration")).unwrap();
        assert!(sql.starts_with("-- WARNING: column users.age was removed"));
    }
}
