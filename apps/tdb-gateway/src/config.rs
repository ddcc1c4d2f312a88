use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_CONCURRENCY: usize = 1024;
const DEFAULT_RATE_LIMIT: u64 = 600;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
const DEFAULT_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_BUSY_MS: u64 = 5000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid TDB_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid TDB_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid TDB_BIND: {0}")]
    InvalidBind(String),
    #[error("invalid {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("TDB_SECRET is not set; refusing to start without a deployment secret")]
    MissingSecret,
}

/// On-disk shape of the optional `TDB_CONFIG` file. Every key may be
/// overridden by its environment variable.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    port: Option<u16>,
    max_concurrency: Option<usize>,
    secret: Option<String>,
    admin_token: Option<String>,
    data_dir: Option<PathBuf>,
    memory: Option<bool>,
    migrations_dir: Option<PathBuf>,
    rate_limit: Option<u64>,
    rate_window_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
    sqlite_busy_ms: Option<u64>,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
    pub secret: String,
    pub admin_token: Option<String>,
    pub data_dir: PathBuf,
    pub memory: bool,
    pub migrations_dir: Option<PathBuf>,
    /// Requests per tenant per window; 0 disables the limiter.
    pub rate_limit: u64,
    pub rate_window: Duration,
    pub token_ttl: Duration,
    /// SQLite busy timeout for actor connections.
    pub busy_timeout: Duration,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("addr", &self.addr)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("secret", &"<redacted>")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("data_dir", &self.data_dir)
            .field("memory", &self.memory)
            .field("migrations_dir", &self.migrations_dir)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window", &self.rate_window)
            .field("token_ttl", &self.token_ttl)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn number<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value })
    })
    .transpose()
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Resolve configuration: defaults, then the `TDB_CONFIG` file, then
    /// environment variables.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match non_empty(get("TDB_CONFIG")) {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let concurrency_limit = match non_empty(get("TDB_HTTP_MAX_CONC")) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidConcurrency(raw))?,
            None => file.max_concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        };

        let bind = non_empty(get("TDB_BIND"))
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.into());
        let port = match non_empty(get("TDB_PORT")) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };
        let host = if bind.contains(':') && !bind.starts_with('[') {
            format!("[{bind}]")
        } else {
            bind.clone()
        };
        let addr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;

        let secret = non_empty(get("TDB_SECRET"))
            .or(non_empty(file.secret))
            .ok_or(ConfigError::MissingSecret)?;
        let admin_token = non_empty(get("TDB_ADMIN_TOKEN")).or(non_empty(file.admin_token));

        let data_dir = non_empty(get("TDB_DATA_DIR"))
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let memory = get("TDB_MEMORY")
            .map(|v| truthy(&v))
            .or(file.memory)
            .unwrap_or(false);
        let migrations_dir = non_empty(get("TDB_MIGRATIONS_DIR"))
            .map(PathBuf::from)
            .or(file.migrations_dir);

        let rate_limit = number("TDB_RATE_LIMIT", non_empty(get("TDB_RATE_LIMIT")))?
            .or(file.rate_limit)
            .unwrap_or(DEFAULT_RATE_LIMIT);
        let window_secs: u64 =
            number("TDB_RATE_WINDOW_SECS", non_empty(get("TDB_RATE_WINDOW_SECS")))?
                .or(file.rate_window_secs)
                .unwrap_or(DEFAULT_RATE_WINDOW_SECS)
                .max(1);
        let ttl_secs: u64 = number("TDB_TOKEN_TTL_SECS", non_empty(get("TDB_TOKEN_TTL_SECS")))?
            .or(file.token_ttl_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let busy_ms: u64 = number("TDB_SQLITE_BUSY_MS", non_empty(get("TDB_SQLITE_BUSY_MS")))?
            .or(file.sqlite_busy_ms)
            .unwrap_or(DEFAULT_BUSY_MS);

        Ok(Self {
            addr,
            concurrency_limit,
            secret,
            admin_token,
            data_dir,
            memory,
            migrations_dir,
            rate_limit,
            rate_window: Duration::from_secs(window_secs),
            token_ttl: Duration::from_secs(ttl_secs),
            busy_timeout: Duration::from_millis(busy_ms),
        })
    }
}
