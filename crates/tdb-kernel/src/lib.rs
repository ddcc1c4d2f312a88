//! Per-tenant storage units, the retrying stub in front of them, and the
//! admin catalog that records which tenants exist.

mod actor;
mod catalog;
mod directory;
mod error;
mod kv;
mod stub;
mod value;

pub use actor::{Actor, ActorReply, Location, HISTORY_TABLE};
pub use catalog::{validate_tenant_name, ApiTokenRecord, Catalog, CatalogConflict, TenantRecord};
pub use directory::{actor_id_for, ActorDirectory, StorageMode, DEFAULT_BUSY_TIMEOUT};
pub use error::{has_transient_signature, ActorError};
pub use stub::{
    ActorStub, ActorTransport, LocalTransport, RetryPolicy, TenantClient, DEFAULT_MAX_ATTEMPTS,
};
