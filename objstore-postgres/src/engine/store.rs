//! Object CRUD (`spec.md` §4.3 "Load"/"Store"/"Delete"), grounded on
//! `Storage.load`/`store`/`delete` in the retrieved Python source. All three
//! operate on the transaction's own session, under its lock.

use objstore_common::{DbError, LARGE_RECORD_SIZE, Oid, Tid};
use tokio_postgres::error::SqlState;

use crate::engine::txn::PgTransaction;
use crate::row::ObjectRow;
use crate::traits::{Cache, PersistentObject, Transaction, Writer};

use super::Engine;

impl Engine {
    /// `load(txn, oid)`: `GET_OID` on the transaction's session, under its
    /// lock. Fails `NotFound` if no such row exists.
    pub async fn load(&self, txn: &PgTransaction, oid: &Oid) -> Result<ObjectRow, DbError> {
        let statement = self.sql.get("GET_OID", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&oid.as_str()]).await?;
        rows.first()
            .map(ObjectRow::from_row)
            .ok_or_else(|| DbError::not_found(oid.to_string()))
    }

    /// `store(txn, writer, obj, cache)`: the 12-positional-parameter
    /// UPSERT/UPDATE protocol (`spec.md` §4.3 "Store").
    pub async fn store(
        &self,
        txn: &PgTransaction,
        oid: &Oid,
        writer: &dyn Writer,
        obj: &dyn PersistentObject,
        cache: Option<&dyn Cache>,
    ) -> Result<Tid, DbError> {
        let pickled = writer.serialize();
        let json = writer.get_json();

        if pickled.len() >= LARGE_RECORD_SIZE {
            warn!("storing a large record for oid {oid}: {} bytes", pickled.len());
        }

        let is_insert = obj.is_new() || obj.serial().is_none();
        let statement_name = if is_insert { "NAIVE_UPSERT" } else { "UPDATE" };
        let statement = self.sql.get(statement_name, self.objects_table());

        let otid = obj.serial().unwrap_or(Tid::ZERO);
        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 12] = [
            &oid.as_str(),
            &txn.tid().as_i64(),
            &(pickled.len() as i64),
            &writer.part(),
            &writer.resource(),
            &writer.of().as_ref().map(|o| o.as_str().to_string()),
            &otid.as_i64(),
            &writer.parent_id().as_ref().map(|o| o.as_str().to_string()),
            &writer.id(),
            &writer.r#type(),
            &json,
            &pickled,
        ];

        let count: i64 = {
            let _guard = txn.lock().lock().await;
            match txn.session().query_one(&statement, &params).await {
                Ok(row) => row.get::<_, i64>(0),
                Err(e) => {
                    return Err(translate_store_error(
                        e,
                        txn,
                        oid,
                        writer.parent_id().as_ref(),
                        writer.id().as_deref(),
                    ))
                }
            }
        };

        if count != 1 {
            if is_insert {
                error!("insert of oid {oid} affected {count} rows, expected 1");
                return Err(DbError::fatal(format!(
                    "insert of oid {oid} affected {count} rows, expected 1"
                )));
            }
            return Err(DbError::tid_conflict(
                oid.to_string(),
                format!("update of oid {oid} affected {count} rows, current tid no longer matches otid"),
            ));
        }

        txn.track_modified(oid.clone());
        if let Some(cache) = cache {
            cache.store_object(oid, txn.tid(), &pickled).await;
        }
        Ok(txn.tid())
    }

    /// `delete(txn, oid)`: two-phase. Reparents the row onto `TRASH_OID`
    /// immediately and registers an after-commit hook that enqueues the oid
    /// for physical deletion once the transaction commits.
    pub async fn delete(&self, txn: &PgTransaction, oid: &Oid) -> Result<(), DbError> {
        let statement = self.sql.get("TRASH_PARENT_ID", self.objects_table());
        {
            let _guard = txn.lock().lock().await;
            txn.session().execute(&statement, &[&oid.as_str()]).await?;
        }
        txn.track_modified(oid.clone());
        txn.add_after_commit_hook(oid.clone());
        Ok(())
    }
}

fn translate_store_error(
    e: tokio_postgres::Error,
    txn: &PgTransaction,
    oid: &Oid,
    parent_id: Option<&Oid>,
    id: Option<&str>,
) -> DbError {
    if let Some(db_err) = e.as_db_error() {
        match *db_err.code() {
            SqlState::UNIQUE_VIOLATION if db_err.detail().map(|d| d.contains("Key (parent_id, id)")).unwrap_or(false) => {
                return DbError::conflict_id_on_container(
                    parent_id.map(Oid::to_string).unwrap_or_default(),
                    id.unwrap_or_default().to_string(),
                );
            }
            SqlState::FOREIGN_KEY_VIOLATION => {
                txn.mark_deleted(oid);
                return DbError::tid_conflict(oid.to_string(), "foreign key violation, cache likely stale".to_string());
            }
            _ if db_err.message().contains("deadlock detected") => {
                return DbError::conflict("deadlock detected");
            }
            _ => {}
        }
    }
    let as_string = e.to_string();
    if as_string.contains("another operation is in progress") {
        return DbError::conflict("another operation is in progress");
    }
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_record_threshold_matches_shared_constant() {
        assert_eq!(LARGE_RECORD_SIZE, 1 << 24);
    }
}
