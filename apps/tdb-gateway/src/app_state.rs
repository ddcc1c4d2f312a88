use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tdb_kernel::{ActorDirectory, ActorStub, ActorTransport, Catalog, LocalTransport, StorageMode};
use tdb_token::Clock;
use tracing::info;

use crate::config::GatewayConfig;
use crate::gateway::{ActivityLimiter, MemoryCounterStore, Pipeline};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    stub: ActorStub,
    catalog: Catalog,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    secret: String,
    admin_token: Option<String>,
    migrations_dir: Option<PathBuf>,
    token_ttl: Duration,
}

impl AppState {
    /// Open the actor directory and catalog described by `cfg`.
    pub(crate) fn open(cfg: &GatewayConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let (mode, catalog) = if cfg.memory {
            (
                StorageMode::Memory,
                Catalog::in_memory(clock.clone()).context("opening in-memory catalog")?,
            )
        } else {
            std::fs::create_dir_all(&cfg.data_dir)
                .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;
            (
                StorageMode::Disk(cfg.data_dir.clone()),
                Catalog::open(&cfg.data_dir, clock.clone())
                    .with_context(|| format!("opening catalog in {}", cfg.data_dir.display()))?,
            )
        };
        info!(target: "tdb::gateway", storage = ?mode, "storage ready");
        let directory = Arc::new(ActorDirectory::new(mode, clock.clone(), cfg.busy_timeout));
        Ok(Self::assemble(
            cfg,
            clock,
            Arc::new(LocalTransport::new(directory)),
            catalog,
        ))
    }

    pub(crate) fn assemble(
        cfg: &GatewayConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn ActorTransport>,
        catalog: Catalog,
    ) -> Self {
        let limiter = (cfg.rate_limit > 0).then(|| {
            ActivityLimiter::new(
                Arc::new(MemoryCounterStore::default()),
                clock.clone(),
                cfg.rate_limit,
                cfg.rate_window,
            )
        });
        let pipeline = Pipeline::standard(&cfg.secret, clock.clone(), limiter);
        info!(target: "tdb::gateway", components = ?pipeline.names(), "admission pipeline");
        Self {
            inner: Arc::new(Inner {
                stub: ActorStub::new(transport),
                catalog,
                pipeline,
                clock,
                secret: cfg.secret.clone(),
                admin_token: cfg.admin_token.clone(),
                migrations_dir: cfg.migrations_dir.clone(),
                token_ttl: cfg.token_ttl,
            }),
        }
    }

    pub(crate) fn stub(&self) -> &ActorStub {
        &self.inner.stub
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn secret(&self) -> &[u8] {
        self.inner.secret.as_bytes()
    }

    pub(crate) fn admin_token(&self) -> Option<&str> {
        self.inner.admin_token.as_deref()
    }

    pub(crate) fn migrations_dir(&self) -> Option<&PathBuf> {
        self.inner.migrations_dir.as_ref()
    }

    pub(crate) fn token_ttl(&self) -> Duration {
        self.inner.token_ttl
    }
}
