use tdb_protocol::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("unknown table {0:?}")]
    UnknownTable(String),
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("include {alias:?}: {reason}")]
    Include { alias: String, reason: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

pub(crate) fn ident(name: &str) -> Result<&str, QueryError> {
    if tdb_migrate::is_identifier(name) {
        Ok(name)
    } else {
        Err(QueryError::InvalidIdentifier(name.to_string()))
    }
}
