use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Target used by the gateway's per-request access lines.
pub const ACCESS_TARGET: &str = "http.access";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

/// Rolling file sink for access lines, enabled by `TDB_ACCESS_LOG_ROLL=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRollConfig {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessRollConfig {
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if get("TDB_ACCESS_LOG_ROLL").as_deref() != Some("1") {
            return None;
        }
        let dir = get("TDB_ACCESS_LOG_DIR")
            .or_else(|| get("TDB_LOGS_DIR"))
            .unwrap_or_else(|| "logs".to_string());
        let prefix = get("TDB_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into());
        let rotation = match get("TDB_ACCESS_LOG_ROTATION")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        };
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

/// Console tracing filtered by `RUST_LOG` (default `info`).
pub fn init() {
    init_with_default("info");
}

/// Same as [`init`] with a different fallback filter; the CLI uses `warn`.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    if let Some(cfg) = AccessRollConfig::from_env() {
        if std::fs::create_dir_all(&cfg.dir).is_err() {
            tracing::warn!(directory = %cfg.dir, "failed to create access log directory");
        }
        let writer = match cfg.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&cfg.dir, &cfg.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&cfg.dir, &cfg.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&cfg.dir, &cfg.prefix),
        };
        let (nb, guard) = tracing_appender::non_blocking(writer);
        let _ = ACCESS_GUARD.set(guard);
        let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
        let access_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(nb)
            .with_filter(targets);
        let _ = registry.with(access_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn roll_disabled_by_default() {
        assert_eq!(AccessRollConfig::from_lookup(lookup(&[])), None);
        assert_eq!(
            AccessRollConfig::from_lookup(lookup(&[("TDB_ACCESS_LOG_ROLL", "0")])),
            None
        );
    }

    #[test]
    fn roll_reads_dir_prefix_and_rotation() {
        let cfg = AccessRollConfig::from_lookup(lookup(&[
            ("TDB_ACCESS_LOG_ROLL", "1"),
            ("TDB_LOGS_DIR", "/var/log/tdb"),
            ("TDB_ACCESS_LOG_ROTATION", "Hourly"),
        ]))
        .unwrap();
        assert_eq!(cfg.dir, "/var/log/tdb");
        assert_eq!(cfg.prefix, "http-access");
        assert_eq!(cfg.rotation, Rotation::Hourly);
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init_with_default("warn");
    }
}
