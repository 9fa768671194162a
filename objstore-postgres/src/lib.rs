//! PostgreSQL-family backend for the transactional object-storage engine
//! described in `spec.md`. Consumers construct an [`Engine`] via
//! [`Engine::initialize`], open transactions against it, and drive
//! object/blob CRUD through the methods on `engine::*`. The `Transaction`,
//! `Writer`, `Cache`, and `PersistentObject` traits in [`traits`] are the
//! seams an upper layer (ORM/behavior layer) implements.

#[macro_use]
extern crate slog_scope;

pub mod engine;
pub mod pool;
pub mod row;
pub mod sql_registry;
pub mod traits;
pub mod vacuum;

pub use engine::txn::PgTransaction;
pub use engine::Engine;
pub use pool::PgPool;
pub use row::{BlobChunkRow, ConflictRow, ObjectRow};
pub use sql_registry::SqlRegistry;
pub use vacuum::{VacuumClosed, VacuumWorker};
