use tdb_protocol::RpcError;

/// Message fragments that identify a transient infrastructure failure.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "network connection lost",
    "connection reset",
    "actor was reset",
    "storage unit recycled",
];

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The engine rejected the statement. Never retried.
    #[error("{0}")]
    Sql(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("network connection lost: {0}")]
    ConnectionLost(String),
    #[error("actor was reset: {0}")]
    Reset(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("join error: {0}")]
    Join(String),
}

impl ActorError {
    pub fn is_transient(&self) -> bool {
        match self {
            ActorError::ConnectionLost(_) | ActorError::Reset(_) => true,
            ActorError::Storage(msg) => has_transient_signature(msg),
            _ => false,
        }
    }

    pub fn is_missing_table(&self) -> bool {
        match self {
            ActorError::Sql(msg) => msg.to_ascii_lowercase().contains("no such table"),
            _ => false,
        }
    }
}

pub fn has_transient_signature(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

impl From<rusqlite::Error> for ActorError {
    fn from(err: rusqlite::Error) -> Self {
        ActorError::Sql(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ActorError {
    fn from(err: tokio::task::JoinError) -> Self {
        ActorError::Join(err.to_string())
    }
}

impl From<ActorError> for RpcError {
    fn from(err: ActorError) -> Self {
        if err.is_transient() {
            return RpcError::Transient(err.to_string());
        }
        match err {
            ActorError::Sql(msg) => RpcError::Remote(msg),
            ActorError::BadRequest(msg) => RpcError::Remote(msg),
            other => RpcError::Transport(other.to_string()),
        }
    }
}
