use std::path::PathBuf;

use tdb_protocol::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid journal: {0}")]
    InvalidJournal(String),
    #[error("migration {0:?} already exists")]
    TagExists(String),
    #[error("missing SQL file for migration {0:?}")]
    MissingSql(String),
    #[error("reading migration history: {0}")]
    History(#[source] RpcError),
    #[error("migration {tag} failed: {source}")]
    Apply {
        tag: String,
        #[source]
        source: RpcError,
    },
}

impl MigrateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag of the migration whose batch failed, if that is what happened.
    pub fn failed_tag(&self) -> Option<&str> {
        match self {
            Self::Apply { tag, .. } => Some(tag),
            _ => None,
        }
    }
}
