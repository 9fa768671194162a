//! External contracts (`spec.md` §4.5): the interfaces the engine calls
//! into but does not implement. Expressed as `async_trait` traits, matching
//! the teacher's `#[async_trait(?Send)] trait Db` convention — the engine
//! is generic over these, the upper layer supplies concrete types.

use async_trait::async_trait;
use serde_json::Value;

use objstore_common::{Oid, Tid};

/// A single logical database transaction: the session it runs on, the set
/// of objects it has touched so far, and the hook the engine uses to queue
/// trashed oids for vacuuming after commit. `session()`/`lock()` return
/// borrows rather than owned handles — unlike `Writer`/`Cache`, a
/// transaction's connection is pinned for its whole lifetime, so the
/// engine's concrete `PgTransaction` (see `engine::txn`) hands out
/// references to it instead of fresh acquisitions per call.
pub trait Transaction: Send + Sync {
    /// The write tid allocated for this transaction.
    fn tid(&self) -> Tid;

    /// oids this transaction has stored, for conflict-detection.
    fn modified(&self) -> Vec<Oid>;

    /// Marks `oid` as deleted within this transaction's view (used when a
    /// foreign-key violation on store indicates a stale cache entry).
    fn mark_deleted(&self, oid: &Oid);

    /// The session this transaction is pinned to.
    fn session(&self) -> &deadpool_postgres::Client;

    /// Serializes operations against this transaction's session. Streamed
    /// traversals (`items`, `read_blob_chunks`) deliberately don't acquire
    /// it (`spec.md` §5).
    fn lock(&self) -> &tokio::sync::Mutex<()>;

    /// Registers a trashed oid to be enqueued onto the vacuum worker only
    /// once this transaction's backend transaction has committed.
    fn add_after_commit_hook(&self, oid: Oid);
}

/// Serializes an application object into the opaque state buffer and JSON
/// projection the object row stores, plus the scalar columns `store`
/// positions alongside them.
pub trait Writer {
    fn serialize(&self) -> Vec<u8>;
    fn get_json(&self) -> Value;
    fn part(&self) -> i64;
    fn resource(&self) -> bool;
    fn of(&self) -> Option<Oid>;
    fn parent_id(&self) -> Option<Oid>;
    fn id(&self) -> Option<String>;
    fn r#type(&self) -> String;
}

/// Notified after a successful store so the upper layer can keep its cache
/// of object state in sync.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn store_object(&self, oid: &Oid, tid: Tid, pickled: &[u8]);
}

/// The minimal shape of a persistent object the store path needs: whether
/// this is its first write, and the serial it carries going in.
pub trait PersistentObject {
    /// True for a first `store` (drives the INSERT/UPSERT path choice).
    fn is_new(&self) -> bool;
    /// The `otid` this write expects to supersede; `None` on first store.
    fn serial(&self) -> Option<Tid>;
}
