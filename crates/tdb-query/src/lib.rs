//! Runtime query compiler: structured filters, ordering, pagination and
//! relation includes compiled to parameterised SQL.

mod db;
mod error;
mod filter;
mod include;
mod mutate;
mod registry;
mod select;

pub use db::{Db, TableRef};
pub use error::QueryError;
pub use filter::{Op, Predicate};
pub use include::{singular, Include};
pub use mutate::{compile_count, compile_delete, compile_insert, compile_update};
pub use registry::{TableMeta, TableRegistry};
pub use select::{Compiled, Direction, Query};
