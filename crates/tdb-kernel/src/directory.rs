use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::Digest as _;
use tdb_token::Clock;
use tracing::info;

use crate::actor::{Actor, Location};
use crate::error::ActorError;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Stable actor address for a tenant name: the same name always reaches the
/// same physical unit.
pub fn actor_id_for(tenant: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(b"tenantdb/actor/");
    hasher.update(tenant.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

#[derive(Debug, Clone)]
pub enum StorageMode {
    Memory,
    Disk(PathBuf),
}

/// Opens and caches one [`Actor`] per tenant.
pub struct ActorDirectory {
    mode: StorageMode,
    clock: Arc<dyn Clock>,
    busy_timeout: Duration,
    actors: Mutex<HashMap<String, Arc<Actor>>>,
}

impl ActorDirectory {
    /// `busy_timeout` applies to every connection this directory opens.
    pub fn new(mode: StorageMode, clock: Arc<dyn Clock>, busy_timeout: Duration) -> Self {
        Self {
            mode,
            clock,
            busy_timeout,
            actors: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(StorageMode::Memory, clock, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    fn location(&self, actor_id: &str) -> Result<Location, ActorError> {
        match &self.mode {
            StorageMode::Memory => Ok(Location::Memory),
            StorageMode::Disk(root) => {
                let dir = root.join("actors");
                std::fs::create_dir_all(&dir).map_err(|e| ActorError::Storage(e.to_string()))?;
                Ok(Location::File(dir.join(format!("{actor_id}.sqlite"))))
            }
        }
    }

    /// Blocking; call from `spawn_blocking` on async paths.
    pub fn get_or_open(&self, tenant: &str) -> Result<Arc<Actor>, ActorError> {
        let actor_id = actor_id_for(tenant);
        let mut actors = self.actors.lock();
        if let Some(actor) = actors.get(&actor_id) {
            return Ok(actor.clone());
        }
        let location = self.location(&actor_id)?;
        let actor = Arc::new(Actor::open(
            &actor_id,
            &location,
            self.clock.clone(),
            self.busy_timeout,
        )?);
        info!(target: "tdb::actor", tenant, actor = %actor_id, "actor opened");
        actors.insert(actor_id, actor.clone());
        Ok(actor)
    }

    /// Drop the cached unit for `tenant`; the next call reopens it. In-memory
    /// actors lose their contents.
    pub fn recycle(&self, tenant: &str) -> bool {
        self.actors.lock().remove(&actor_id_for(tenant)).is_some()
    }

    pub fn open_count(&self) -> usize {
        self.actors.lock().len()
    }
}
