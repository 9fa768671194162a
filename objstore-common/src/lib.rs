//! Types shared by every backend-specific storage crate: the error
//! taxonomy, pool-state reporting, and the `Oid`/`Tid` identity types.

pub mod constants;
pub mod error;
pub mod ids;
pub mod pool_state;

pub use constants::{
    table_name_singular, BAD_CONNECTION_RESTART_DELAY, DEFAULT_BLOBS_TABLE,
    DEFAULT_OBJECTS_TABLE, LARGE_RECORD_SIZE, MAX_OID_LENGTH, TRASH_OID,
};
pub use error::{DbError, DbErrorIntrospect};
pub use ids::{Oid, Tid};
pub use pool_state::{GetPoolState, PoolState};
