//! Transaction lifecycle (`spec.md` §4.3 "Transaction handling"), grounded
//! on `start_transaction`/`commit`/`abort` in the retrieved Python source.
//! The engine issues `BEGIN`/`COMMIT`/`ROLLBACK` directly over the pinned
//! session rather than wrapping `tokio_postgres::Transaction<'_>`, since
//! that type borrows its connection and can't be stored alongside it in a
//! struct the upper layer holds across awaits — raw statements give the
//! same backend-transaction semantics without the self-reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex as AsyncMutex;
use tokio_postgres::error::SqlState;

use objstore_common::{DbError, Oid, Tid};

use crate::traits::Transaction;

use super::Engine;

/// Concrete realization of the `Transaction` external contract for this
/// backend. One per logical transaction; dropped (which also drops its
/// pinned `deadpool_postgres::Client`, returning it to the pool) on
/// commit or abort.
pub struct PgTransaction {
    tid: Tid,
    conn: deadpool_postgres::Client,
    lock: AsyncMutex<()>,
    in_backend_txn: AtomicBool,
    modified: StdMutex<Vec<Oid>>,
    deleted: StdMutex<Vec<Oid>>,
    after_commit: StdMutex<Vec<Oid>>,
}

impl Transaction for PgTransaction {
    fn tid(&self) -> Tid {
        self.tid
    }

    fn modified(&self) -> Vec<Oid> {
        self.modified.lock().expect("modified lock").clone()
    }

    fn mark_deleted(&self, oid: &Oid) {
        self.deleted.lock().expect("deleted lock").push(oid.clone());
    }

    fn session(&self) -> &deadpool_postgres::Client {
        &self.conn
    }

    fn lock(&self) -> &AsyncMutex<()> {
        &self.lock
    }

    fn add_after_commit_hook(&self, oid: Oid) {
        self.after_commit.lock().expect("after_commit lock").push(oid);
    }
}

impl PgTransaction {
    pub(crate) fn track_modified(&self, oid: Oid) {
        self.modified.lock().expect("modified lock").push(oid);
    }

    pub fn deleted(&self) -> Vec<Oid> {
        self.deleted.lock().expect("deleted lock").clone()
    }
}

impl Engine {
    /// Opens a scoped session and starts a backend transaction on it
    /// (`start_transaction`, `spec.md` §4.3), retrying up to 3 times
    /// following the same restart ladder as the original: an
    /// `InternalServerError`-equivalent (sqlstate class `XX`) requires a
    /// manual `ROLLBACK` first because the backend believes it is still in
    /// a transaction; a "connection is closed" style failure or a session
    /// that reports itself as having a manually-started transaction both
    /// restart on a fresh session.
    pub async fn start_transaction(self: &std::sync::Arc<Self>) -> Result<PgTransaction, DbError> {
        let tid = self.get_next_tid().await?;
        self.start_transaction_with_tid(tid, 0).await
    }

    async fn start_transaction_with_tid(
        self: &std::sync::Arc<Self>,
        tid: Tid,
        retries: u32,
    ) -> Result<PgTransaction, DbError> {
        let conn = self.acquire_session().await?;
        let begin = if self.settings.read_only {
            "BEGIN TRANSACTION READ ONLY"
        } else {
            "BEGIN"
        };

        match conn.batch_execute(begin).await {
            Ok(()) => Ok(PgTransaction {
                tid,
                conn,
                lock: AsyncMutex::new(()),
                in_backend_txn: AtomicBool::new(true),
                modified: StdMutex::new(Vec::new()),
                deleted: StdMutex::new(Vec::new()),
                after_commit: StdMutex::new(Vec::new()),
            }),
            Err(e) => {
                if retries > 2 {
                    return Err(e.into());
                }

                let is_internal_error = e
                    .as_db_error()
                    .map(|d| d.code().code().starts_with("XX"))
                    .unwrap_or(false);
                let manually_started = e.to_string().contains("manually started transaction");
                let closed = is_bad_connection_message(&e);

                if is_internal_error {
                    let _ = conn.batch_execute("ROLLBACK").await;
                } else if manually_started {
                    let _ = conn.batch_execute("ROLLBACK").await;
                }

                if is_internal_error || manually_started || closed {
                    drop(conn);
                    return Box::pin(self.start_transaction_with_tid(tid, retries + 1)).await;
                }
                Err(e.into())
            }
        }
    }

    /// `commit(txn)`: awaits the backend transaction's commit under the
    /// transaction lock, then enqueues every after-commit hook oid onto the
    /// vacuum worker, matching the original's `_txn_oid_commit_hook`.
    pub async fn commit(&self, txn: &PgTransaction) -> Result<Tid, DbError> {
        if txn.in_backend_txn.load(Ordering::SeqCst) {
            let _guard = txn.lock.lock().await;
            txn.conn.batch_execute("COMMIT").await?;
            txn.in_backend_txn.store(false, Ordering::SeqCst);
        } else if !self.settings.transaction_strategy.is_none()
            && !self.settings.transaction_strategy.is_tidonly()
        {
            warn!("commit() called with no backend transaction to commit");
        }

        for oid in txn.after_commit.lock().expect("after_commit lock").drain(..) {
            self.vacuum_enqueue(oid).await;
        }
        Ok(txn.tid)
    }

    /// `abort(txn)`: rolls back the backend transaction if one is open,
    /// swallowing interface errors from an already-closed session.
    pub async fn abort(&self, txn: &PgTransaction) {
        if txn.in_backend_txn.load(Ordering::SeqCst) {
            let _guard = txn.lock.lock().await;
            let _ = txn.conn.batch_execute("ROLLBACK").await;
            txn.in_backend_txn.store(false, Ordering::SeqCst);
        }
    }
}

fn is_bad_connection_message(e: &tokio_postgres::Error) -> bool {
    crate::pool::is_bad_connection_error(&e.to_string())
        || e.as_db_error()
            .map(|d| *d.code() == SqlState::CONNECTION_EXCEPTION)
            .unwrap_or(false)
}
