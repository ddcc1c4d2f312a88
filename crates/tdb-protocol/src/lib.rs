use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HEADER_DB_NAME: &str = "x-db-name";
pub const HEADER_DB_TOKEN: &str = "x-db-token";
pub const HEADER_BOOKMARK: &str = "x-bookmark";

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: Option<String>,
    pub code: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: u16, title: &str, code: &str, detail: impl Into<String>) -> Self {
        Self {
            r#type: "about:blank".into(),
            title: title.into(),
            status,
            detail: Some(detail.into()),
            code: Some(code.into()),
        }
    }
}

/// One parameterized SQL statement.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Statement {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(query: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }

    pub fn bare(query: impl Into<String>) -> Self {
        Self::new(query, Vec::new())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ExecReq {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct FirstReq {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvGetReq {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvPutReq {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Absolute expiry, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
    /// Relative expiry, seconds from now.
    #[serde(
        default,
        rename = "expirationTtl",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_ttl: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvDeleteReq {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct KvListReq {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvEntry {
    pub value: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub expiration: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvKey {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub expiration: Option<i64>,
}

/// Prefix-bounded page of keys plus the continuation cursor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct KvListResult {
    pub keys: Vec<KvKey>,
    pub list_complete: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Run,
    Exec,
    Batch,
    Raw,
    First,
    KvGet,
    KvPut,
    KvDelete,
    KvList,
}

impl Verb {
    pub const ALL: [Verb; 9] = [
        Verb::Run,
        Verb::Exec,
        Verb::Batch,
        Verb::Raw,
        Verb::First,
        Verb::KvGet,
        Verb::KvPut,
        Verb::KvDelete,
        Verb::KvList,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Verb::Run => "/api/run",
            Verb::Exec => "/api/exec",
            Verb::Batch => "/api/batch",
            Verb::Raw => "/api/raw",
            Verb::First => "/api/first",
            Verb::KvGet => "/api/kv/get",
            Verb::KvPut => "/api/kv/put",
            Verb::KvDelete => "/api/kv/delete",
            Verb::KvList => "/api/kv/list",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Run => "run",
            Verb::Exec => "exec",
            Verb::Batch => "batch",
            Verb::Raw => "raw",
            Verb::First => "first",
            Verb::KvGet => "kv.get",
            Verb::KvPut => "kv.put",
            Verb::KvDelete => "kv.delete",
            Verb::KvList => "kv.list",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.path() == path)
    }
}

/// A fully decoded call against one Storage Actor.
///
/// Requests are plain owned values so a caller can hold one across retry
/// attempts; the HTTP body they were parsed from is consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    Run(Statement),
    Exec(ExecReq),
    Batch(Vec<Statement>),
    Raw(Statement),
    First(FirstReq),
    KvGet(KvGetReq),
    KvPut(KvPutReq),
    KvDelete(KvDeleteReq),
    KvList(KvListReq),
}

impl RpcRequest {
    pub fn verb(&self) -> Verb {
        match self {
            RpcRequest::Run(_) => Verb::Run,
            RpcRequest::Exec(_) => Verb::Exec,
            RpcRequest::Batch(_) => Verb::Batch,
            RpcRequest::Raw(_) => Verb::Raw,
            RpcRequest::First(_) => Verb::First,
            RpcRequest::KvGet(_) => Verb::KvGet,
            RpcRequest::KvPut(_) => Verb::KvPut,
            RpcRequest::KvDelete(_) => Verb::KvDelete,
            RpcRequest::KvList(_) => Verb::KvList,
        }
    }

    /// Decode a JSON body for the given verb.
    pub fn decode(verb: Verb, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match verb {
            Verb::Run => RpcRequest::Run(serde_json::from_slice(body)?),
            Verb::Exec => RpcRequest::Exec(serde_json::from_slice(body)?),
            Verb::Batch => RpcRequest::Batch(serde_json::from_slice(body)?),
            Verb::Raw => RpcRequest::Raw(serde_json::from_slice(body)?),
            Verb::First => RpcRequest::First(serde_json::from_slice(body)?),
            Verb::KvGet => RpcRequest::KvGet(serde_json::from_slice(body)?),
            Verb::KvPut => RpcRequest::KvPut(serde_json::from_slice(body)?),
            Verb::KvDelete => RpcRequest::KvDelete(serde_json::from_slice(body)?),
            Verb::KvList => RpcRequest::KvList(serde_json::from_slice(body)?),
        })
    }

    /// JSON body as sent over the wire.
    pub fn body(&self) -> Value {
        let encoded = match self {
            RpcRequest::Run(s) | RpcRequest::Raw(s) => serde_json::to_value(s),
            RpcRequest::Exec(r) => serde_json::to_value(r),
            RpcRequest::Batch(b) => serde_json::to_value(b),
            RpcRequest::First(r) => serde_json::to_value(r),
            RpcRequest::KvGet(r) => serde_json::to_value(r),
            RpcRequest::KvPut(r) => serde_json::to_value(r),
            RpcRequest::KvDelete(r) => serde_json::to_value(r),
            RpcRequest::KvList(r) => serde_json::to_value(r),
        };
        encoded.unwrap_or(Value::Null)
    }
}

/// `{success, results|error}` envelope returned by every verb.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(results: Value) -> Self {
        Self {
            success: true,
            results: Some(results),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        if self.success {
            Ok(self.results.unwrap_or(Value::Null))
        } else {
            Err(RpcError::Remote(
                self.error.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum RpcError {
    /// The store rejected the call (bad SQL, constraint violation, ...).
    #[error("{0}")]
    Remote(String),
    /// Retries were exhausted on a transient infrastructure failure.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

/// Anything that can execute RPC verbs against one tenant.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError>;

    async fn run(&self, query: &str, params: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let results = self
            .call(RpcRequest::Run(Statement::new(query, params)))
            .await?;
        rows_of(results)
    }

    async fn exec(&self, query: &str) -> Result<Value, RpcError> {
        self.call(RpcRequest::Exec(ExecReq {
            query: query.to_string(),
        }))
        .await
    }

    async fn batch(&self, statements: Vec<Statement>) -> Result<Vec<Value>, RpcError> {
        let results = self.call(RpcRequest::Batch(statements)).await?;
        rows_of(results)
    }

    async fn first(
        &self,
        query: &str,
        params: Vec<Value>,
        column: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call(RpcRequest::First(FirstReq {
            query: query.to_string(),
            params,
            column: column.map(str::to_string),
        }))
        .await
    }
}

fn rows_of(results: Value) -> Result<Vec<Value>, RpcError> {
    match results {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(RpcError::Decode(format!("expected array, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verb_paths_round_trip() {
        for verb in Verb::ALL {
            assert_eq!(Verb::from_path(verb.path()), Some(verb));
        }
        assert_eq!(Verb::from_path("/api/nope"), None);
    }

    #[test]
    fn batch_body_is_a_bare_array() {
        let body = br#"[{"query":"SELECT 1"},{"query":"SELECT ?","params":[2]}]"#;
        let req = RpcRequest::decode(Verb::Batch, body).unwrap();
        match &req {
            RpcRequest::Batch(stmts) => {
                assert_eq!(stmts.len(), 2);
                assert!(stmts[0].params.is_empty());
                assert_eq!(stmts[1].params, vec![json!(2)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(req.body().is_array());
    }

    #[test]
    fn kv_put_accepts_camel_case_ttl() {
        let req = RpcRequest::decode(
            Verb::KvPut,
            br#"{"key":"a","value":1,"expirationTtl":60}"#,
        )
        .unwrap();
        let RpcRequest::KvPut(put) = req else {
            panic!("expected kv put")
        };
        assert_eq!(put.expiration_ttl, Some(60));
        assert_eq!(put.expiration, None);
    }

    #[test]
    fn failed_envelope_maps_to_remote_error() {
        let resp: RpcResponse =
            serde_json::from_value(json!({"success": false, "error": "boom"})).unwrap();
        assert_eq!(resp.into_result(), Err(RpcError::Remote("boom".into())));
        let ok = RpcResponse::ok(json!([1]));
        assert_eq!(ok.into_result().unwrap(), json!([1]));
    }
}
