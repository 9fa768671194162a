//! Conflict detection (`spec.md` §4.3 "Conflict detection"), run on the
//! shared read session under the storage lock rather than the
//! transaction's own session, since the transaction's session may have a
//! live unlocked cursor (`items`, `read_blob_chunks`) that a sub-query on
//! the same connection would deadlock against.

use objstore_common::{DbError, Oid};

use crate::engine::txn::PgTransaction;
use crate::row::ConflictRow;
use crate::traits::Transaction;

use super::Engine;

/// Below this many modified oids, a targeted `ANY($oids)` query is cheaper
/// than scanning every row newer than the caller's tid.
const OID_FILTER_THRESHOLD: usize = 1000;

impl Engine {
    /// `get_conflicts(txn)`: rows with `tid > txn.tid()`, scoped to the
    /// oids this transaction touched when that set is small enough to be
    /// worth filtering on.
    pub async fn get_conflicts(&self, txn: &PgTransaction) -> Result<Vec<ConflictRow>, DbError> {
        let modified = txn.modified();
        let storage = self.lock_storage().await;

        let rows = if modified.len() < OID_FILTER_THRESHOLD {
            let statement = self.sql.get("TXN_CONFLICTS_ON_OIDS", self.objects_table());
            let oids: Vec<&str> = modified.iter().map(Oid::as_str).collect();
            storage
                .read
                .conn
                .query(&statement, &[&txn.tid().as_i64(), &oids])
                .await?
        } else {
            let statement = self.sql.get("TXN_CONFLICTS", self.objects_table());
            storage.read.conn.query(&statement, &[&txn.tid().as_i64()]).await?
        };

        Ok(rows.iter().map(ConflictRow::from_row).collect())
    }

    /// Convenience used by callers that only care whether any conflict
    /// exists, without needing the full row set.
    pub async fn has_conflicts(&self, txn: &PgTransaction) -> Result<bool, DbError> {
        Ok(!self.get_conflicts(txn).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_filter_threshold_matches_the_thousand_oid_cutover() {
        assert_eq!(OID_FILTER_THRESHOLD, 1000);
    }
}

