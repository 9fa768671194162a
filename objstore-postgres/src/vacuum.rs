//! Background physical-deletion worker (`spec.md` §4.4), grounded on
//! `PGVacuum` in the retrieved Python source: a bootstrap scan of
//! currently-trashed oids, a FIFO of oids to reclaim, and a run loop that
//! dequeues and issues `DELETE_OBJECT` one connection at a time. Modeled
//! here as a `tokio::sync::mpsc` channel driving a `tokio::task::JoinHandle`
//! rather than `asyncio.Queue` + a driven task, since that's the idiomatic
//! `tokio` shape for "one producer-consumer queue per background worker".

use std::sync::Arc;

use deadpool_postgres::Pool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use objstore_common::Oid;

use crate::sql_registry::SqlRegistry;

/// Handle to the running vacuum task. Cloning shares the same queue; the
/// task itself is owned by exactly one `VacuumWorker` instance.
pub struct VacuumWorker {
    sender: Option<mpsc::UnboundedSender<Oid>>,
    handle: Option<JoinHandle<()>>,
}

impl VacuumWorker {
    /// Spawns the run loop and kicks off the bootstrap scan for oids
    /// already trashed (`GET_TRASHED_OBJECTS`) before the first `vacuum()`
    /// run. Mirrors `PGVacuum.initialize`/`_initialize`.
    pub fn spawn(pool: Pool, sql: Arc<SqlRegistry>, objects_table: String) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Oid>();
        let bootstrap_sender = sender.clone();
        let bootstrap_pool = pool.clone();
        let bootstrap_sql = Arc::clone(&sql);
        let bootstrap_table = objects_table.clone();

        let handle = tokio::spawn(async move {
            bootstrap(&bootstrap_pool, &bootstrap_sql, &bootstrap_table, &bootstrap_sender).await;

            while let Some(oid) = receiver.recv().await {
                if let Err(e) = vacuum_one(&pool, &sql, &objects_table, &oid).await {
                    warn!("error vacuuming oid {}: {}", oid, e);
                }
            }
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Enqueues a trashed oid for reclamation. Fails explicitly once the
    /// worker has started shutting down, matching `add_to_queue` raising
    /// after `_closed` is set.
    pub fn add_to_queue(&self, oid: Oid) -> Result<(), VacuumClosed> {
        match &self.sender {
            Some(sender) => sender.send(oid).map_err(|_| VacuumClosed),
            None => Err(VacuumClosed),
        }
    }

    /// Drains the queue, then cancels the driving task: close the sender so
    /// `recv()` returns `None` once every already-queued oid has been
    /// vacuumed, then await the handle. This is the `tokio` analogue of
    /// `queue.join()` followed by `task.cancel()`.
    pub async fn finalize(&mut self) {
        // Dropping the last sender lets the run loop's `recv()` observe a
        // closed channel once it has drained everything already queued,
        // rather than aborting mid-delete.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[derive(Debug)]
pub struct VacuumClosed;

impl std::fmt::Display for VacuumClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vacuum worker is closing down")
    }
}

impl std::error::Error for VacuumClosed {}

async fn bootstrap(
    pool: &Pool,
    sql: &SqlRegistry,
    objects_table: &str,
    sender: &mpsc::UnboundedSender<Oid>,
) {
    let conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("vacuum bootstrap: couldn't acquire a connection: {}", e);
            return;
        }
    };

    let statement = sql.get("GET_TRASHED_OBJECTS", objects_table);
    let rows = match conn.query(&statement, &[]).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("vacuum bootstrap: error listing trashed objects: {}", e);
            return;
        }
    };

    for row in rows {
        let zoid: String = row.get("zoid");
        if let Ok(oid) = Oid::new(zoid) {
            // Duplicate enqueues (racing against a concurrent commit's
            // after-commit hook) are idempotent: DELETE on a missing row
            // is a no-op.
            let _ = sender.send(oid);
        }
    }
}

async fn vacuum_one(
    pool: &Pool,
    sql: &SqlRegistry,
    objects_table: &str,
    oid: &Oid,
) -> Result<(), deadpool_postgres::PoolError> {
    let conn = pool.get().await?;
    let statement = sql.get("DELETE_OBJECT", objects_table);
    if let Err(e) = conn.execute(&statement, &[&oid.as_str()]).await {
        warn!("error deleting trashed object {}: {}", oid, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_to_queue_after_close_reports_closed() {
        let worker = VacuumWorker {
            sender: None,
            handle: None,
        };
        let oid = Oid::new("x").unwrap();
        assert!(worker.add_to_queue(oid).is_err());
    }
}
