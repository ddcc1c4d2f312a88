//! On-disk layout of one schema's migrations:
//!
//! ```text
//! <dir>/<tag>.sql
//! <dir>/meta/_journal.json   {"entries":[{"idx":0,"tag":"0000_init"}, ...]}
//! <dir>/meta/_schema.json    last generated snapshot
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;
use crate::schema::Schema;

pub const BREAKPOINT: &str = "--> statement-breakpoint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub idx: u32,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    #[serde(default)]
    pub entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn next_idx(&self) -> u32 {
        self.entries.last().map(|e| e.idx + 1).unwrap_or(0)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    /// Entries must carry unique tags and strictly increasing indexes.
    pub fn validate(&self) -> Result<(), MigrateError> {
        let mut prev: Option<u32> = None;
        let mut tags = std::collections::HashSet::new();
        for entry in &self.entries {
            if prev.is_some_and(|p| entry.idx <= p) {
                return Err(MigrateError::InvalidJournal(format!(
                    "index {} of {:?} is out of order",
                    entry.idx, entry.tag
                )));
            }
            if !tags.insert(entry.tag.as_str()) {
                return Err(MigrateError::InvalidJournal(format!(
                    "duplicate tag {:?}",
                    entry.tag
                )));
            }
            if entry.tag.is_empty() || entry.tag.contains(['/', '\\']) {
                return Err(MigrateError::InvalidJournal(format!(
                    "invalid tag {:?}",
                    entry.tag
                )));
            }
            prev = Some(entry.idx);
        }
        Ok(())
    }
}

/// A journal entry together with its SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub idx: u32,
    pub tag: String,
    pub sql: String,
}

impl Migration {
    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.sql)
    }
}

#[derive(Debug, Clone)]
pub struct MigrationDir {
    root: PathBuf,
}

impl MigrationDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.meta().join("_journal.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.meta().join("_schema.json")
    }

    pub fn sql_path(&self, tag: &str) -> PathBuf {
        self.root.join(format!("{tag}.sql"))
    }

    pub fn load_journal(&self) -> Result<Journal, MigrateError> {
        let path = self.journal_path();
        let journal: Journal = match read_optional(&path)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| MigrateError::Json {
                path: path.clone(),
                source,
            })?,
            None => Journal::default(),
        };
        journal.validate()?;
        Ok(journal)
    }

    pub fn save_journal(&self, journal: &Journal) -> Result<(), MigrateError> {
        let raw = serde_json::to_string_pretty(journal).map_err(|source| MigrateError::Json {
            path: self.journal_path(),
            source,
        })?;
        write_file(&self.journal_path(), &raw)
    }

    pub fn load_snapshot(&self) -> Result<Option<Schema>, MigrateError> {
        read_optional(&self.snapshot_path())?
            .map(|raw| Schema::from_json(&raw))
            .transpose()
    }

    pub fn save_snapshot(&self, schema: &Schema) -> Result<(), MigrateError> {
        write_file(&self.snapshot_path(), &schema.to_json())
    }

    pub fn write_sql(&self, tag: &str, sql: &str) -> Result<(), MigrateError> {
        write_file(&self.sql_path(tag), sql)
    }

    /// Journal entries with their SQL, in ascending index order.
    pub fn load_migrations(&self) -> Result<Vec<Migration>, MigrateError> {
        let journal = self.load_journal()?;
        journal
            .entries
            .into_iter()
            .map(|entry| {
                let path = self.sql_path(&entry.tag);
                let sql = read_optional(&path)?
                    .ok_or_else(|| MigrateError::MissingSql(entry.tag.clone()))?;
                Ok(Migration {
                    idx: entry.idx,
                    tag: entry.tag,
                    sql,
                })
            })
            .collect()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, MigrateError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MigrateError::io(path, e)),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), MigrateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| MigrateError::io(path, e))
}

fn is_comment_only(chunk: &str) -> bool {
    chunk
        .lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with("--"))
}

/// Split on top-level `;`, ignoring semicolons inside quotes and comments.
fn split_on_semicolons(sql: &str, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        current.push(c);
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '[' => quote = Some(']'),
                '-' if chars.peek() == Some(&'-') => {
                    for next in chars.by_ref() {
                        current.push(next);
                        if next == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    let mut prev = '\0';
                    for next in chars.by_ref() {
                        current.push(next);
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                }
                ';' => {
                    push_chunk(&current, out);
                    current.clear();
                }
                _ => {}
            },
        }
    }
    push_chunk(&current, out);
}

fn push_chunk(chunk: &str, out: &mut Vec<String>) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() && !is_comment_only(trimmed) && trimmed != ";" {
        out.push(trimmed.to_string());
    }
}

/// Break a migration file into executable statements.
///
/// Files written by the generator separate statements with
/// [`BREAKPOINT`]; hand-written files fall back to `;` splitting.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    if sql.contains(BREAKPOINT) {
        for chunk in sql.split(BREAKPOINT) {
            push_chunk(chunk, &mut out);
        }
    } else {
        split_on_semicolons(sql, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_breakpoints() {
        let sql = format!(
            "-- WARNING: x\nCREATE TABLE a (x);\n{BREAKPOINT}\n-- only a note\n{BREAKPOINT}\nCREATE INDEX i ON a (x);\n"
        );
        assert_eq!(
            split_statements(&sql),
            vec!["-- WARNING: x\nCREATE TABLE a (x);", "CREATE INDEX i ON a (x);"]
        );
    }

    #[test]
    fn splits_on_semicolons_outside_quotes_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b');\n-- c; d\nINSERT INTO t VALUES (\"x;y\"); /* e; f */ SELECT 1";
        assert_eq!(
            split_statements(sql),
            vec![
                "INSERT INTO t VALUES ('a;b');",
                "-- c; d\nINSERT INTO t VALUES (\"x;y\");",
                "/* e; f */ SELECT 1",
            ]
        );
    }

    #[test]
    fn journal_round_trips_and_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        assert_eq!(dir.load_journal().unwrap(), Journal::default());
        let journal = Journal {
            entries: vec![
                JournalEntry { idx: 0, tag: "0000_init".into() },
                JournalEntry { idx: 1, tag: "0001_more".into() },
            ],
        };
        dir.save_journal(&journal).unwrap();
        let loaded = dir.load_journal().unwrap();
        assert_eq!(loaded, journal);
        assert_eq!(loaded.next_idx(), 2);

        let bad = Journal {
            entries: vec![
                JournalEntry { idx: 1, tag: "a".into() },
                JournalEntry { idx: 1, tag: "b".into() },
            ],
        };
        assert!(matches!(bad.validate(), Err(MigrateError::InvalidJournal(_))));
    }

    #[test]
    fn missing_sql_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        dir.save_journal(&Journal {
            entries: vec![JournalEntry { idx: 0, tag: "0000_init".into() }],
        })
        .unwrap();
        assert!(matches!(
            dir.load_migrations(),
            Err(MigrateError::MissingSql(tag)) if tag == "0000_init"
        ));
    }
}
