use std::time::Duration;

/// Fixed width for every oid-bearing column (`zoid`, `of`, `parent_id`,
/// `bid`). Schema bootstrap (`engine::schema`) rewrites column widths when
/// this constant changes.
pub const MAX_OID_LENGTH: usize = 32;

/// Sentinel parent oid for logically-deleted rows pending vacuum.
pub const TRASH_OID: &str = "_____TRASHED_____";

/// Minimum time since the last pool (re)initialization before
/// `restart_connection` is allowed to fire again, to prevent thrashing.
pub const BAD_CONNECTION_RESTART_DELAY: Duration = Duration::from_millis(250);

/// Logged informationally when a single object's serialized state is at
/// least this large.
pub const LARGE_RECORD_SIZE: usize = 1 << 24;

/// Default table names, used both as `Settings::default()`'s values and as
/// the plural forms `table_name_singular` compares a configured name against.
pub const DEFAULT_OBJECTS_TABLE: &str = "objects";
pub const DEFAULT_BLOBS_TABLE: &str = "blobs";

/// `objects` -> `object`, `blobs` -> `blob`; any other configured table name
/// is used verbatim as its own index-name prefix. Mirrors the bootstrap
/// logic that derives `{object_table_name}_tid` etc.
pub fn table_name_singular(configured: &str, default_plural: &str, default_singular: &str) -> String {
    if configured == default_plural {
        default_singular.to_string()
    } else {
        configured.to_string()
    }
}
