//! Traversal and introspection (`spec.md` §4.3 "Traversal operations",
//! `SPEC_FULL.md` §1.2). Everything here runs on the transaction's session
//! under its lock, except `items`, which streams a cursor and deliberately
//! skips the lock: a sub-query issued against the same session while that
//! cursor is open would deadlock the connection against itself.

use futures::{Stream, StreamExt};
use objstore_common::{DbError, Oid, TRASH_OID};

use crate::engine::txn::PgTransaction;
use crate::row::ObjectRow;
use crate::traits::Transaction;

use super::Engine;

impl Engine {
    /// `keys(parent)`: child ids under `parent`.
    pub async fn keys(&self, txn: &PgTransaction, parent: &Oid) -> Result<Vec<Option<String>>, DbError> {
        let statement = self.sql.get("GET_CHILDREN_KEYS", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&parent.as_str()]).await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// `get_child(parent, id)`.
    pub async fn get_child(
        &self,
        txn: &PgTransaction,
        parent: &Oid,
        id: &str,
    ) -> Result<Option<ObjectRow>, DbError> {
        let statement = self.sql.get("GET_CHILD", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&parent.as_str(), &id]).await?;
        Ok(rows.first().map(ObjectRow::from_row))
    }

    /// `get_children(parent, ids)`: batch lookup of named children.
    pub async fn get_children(
        &self,
        txn: &PgTransaction,
        parent: &Oid,
        ids: &[String],
    ) -> Result<Vec<ObjectRow>, DbError> {
        let statement = self.sql.get("GET_CHILDREN_BATCH", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&parent.as_str(), &ids]).await?;
        Ok(rows.iter().map(ObjectRow::from_row).collect())
    }

    /// `has_key(parent, id)`.
    pub async fn has_key(&self, txn: &PgTransaction, parent: &Oid, id: &str) -> Result<bool, DbError> {
        let statement = self.sql.get("EXIST_CHILD", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&parent.as_str(), &id]).await?;
        Ok(!rows.is_empty())
    }

    /// `len(parent)`: number of children under `parent`.
    pub async fn len(&self, txn: &PgTransaction, parent: &Oid) -> Result<i64, DbError> {
        let statement = self.sql.get("NUM_CHILDREN", self.objects_table());
        let _guard = txn.lock().lock().await;
        let row = txn.session().query_one(&statement, &[&parent.as_str()]).await?;
        Ok(row.get(0))
    }

    /// `items(parent)`: a lazy unlocked stream of every child row. Not
    /// guarded by the transaction lock, matching `spec.md` §4.3 and §5.
    pub async fn items(
        &self,
        txn: &PgTransaction,
        parent: &Oid,
    ) -> Result<impl Stream<Item = Result<ObjectRow, DbError>> + '_, DbError> {
        let statement = self.sql.get("GET_CHILDREN", self.objects_table());
        let params: Vec<String> = vec![parent.as_str().to_string()];
        let row_stream = txn
            .session()
            .query_raw(&statement, params)
            .await?
            .map(|row| row.map(|r| ObjectRow::from_row(&r)).map_err(DbError::from));
        Ok(row_stream)
    }

    /// `get_annotation(of, id)`: annotation lookup, filtering trashed rows.
    pub async fn get_annotation(
        &self,
        txn: &PgTransaction,
        of: &Oid,
        id: &str,
    ) -> Result<Option<ObjectRow>, DbError> {
        let statement = self.sql.get("GET_ANNOTATION", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&of.as_str(), &id]).await?;
        Ok(rows
            .iter()
            .find(|r| r.get::<_, Option<String>>("parent_id").as_deref() != Some(TRASH_OID))
            .map(ObjectRow::from_row))
    }

    /// `get_annotation_keys(of)`: annotation ids, filtering trashed rows.
    pub async fn get_annotation_keys(&self, txn: &PgTransaction, of: &Oid) -> Result<Vec<String>, DbError> {
        let statement = self.sql.get("GET_ANNOTATIONS_KEYS", self.objects_table());
        let _guard = txn.lock().lock().await;
        let rows = txn.session().query(&statement, &[&of.as_str()]).await?;
        Ok(rows
            .iter()
            .filter(|r| r.get::<_, Option<String>>("parent_id").as_deref() != Some(TRASH_OID))
            .filter_map(|r| r.get("id"))
            .collect())
    }

    /// `get_page_of_keys(parent, page, page_size)`: stable pagination over
    /// child ids, ordered by `zoid`. `page` is 1-based, matching
    /// `PGObjectsStorage.get_page_of_keys`.
    pub async fn get_page_of_keys(
        &self,
        txn: &PgTransaction,
        parent: &Oid,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<Option<String>>, DbError> {
        let statement = self.sql.get("BATCHED_GET_CHILDREN_KEYS", self.objects_table());
        let offset = page_offset(page, page_size);
        let _guard = txn.lock().lock().await;
        let rows = txn
            .session()
            .query(&statement, &[&parent.as_str(), &page_size, &offset])
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// `get_total_number_of_objects()` (`SPEC_FULL.md` §1.2): whole-table
    /// `count(*)`, run on the shared read session since it isn't scoped to a
    /// transaction.
    pub async fn get_total_number_of_objects(&self) -> Result<i64, DbError> {
        let statement = self.sql.get("NUM_ROWS", self.objects_table());
        let storage = self.lock_storage().await;
        let row = storage.read.conn.query_one(&statement, &[]).await?;
        Ok(row.get(0))
    }

    /// `get_total_number_of_resources()`.
    pub async fn get_total_number_of_resources(&self) -> Result<i64, DbError> {
        let statement = self.sql.get("NUM_RESOURCES", self.objects_table());
        let storage = self.lock_storage().await;
        let row = storage.read.conn.query_one(&statement, &[]).await?;
        Ok(row.get(0))
    }

    /// `get_total_resources_of_type(type)`.
    pub async fn get_total_resources_of_type(&self, r#type: &str) -> Result<i64, DbError> {
        let statement = self.sql.get("NUM_RESOURCES_BY_TYPE", self.objects_table());
        let storage = self.lock_storage().await;
        let row = storage.read.conn.query_one(&statement, &[&r#type]).await?;
        Ok(row.get(0))
    }

    /// `get_page_of_resources_of_type(type, page, page_size)`: paginated
    /// listing of resource rows of `type`, ordered by `zoid`. `page` is
    /// 1-based, matching `PGObjectsStorage.get_page_of_resources_of_type`.
    pub async fn get_page_of_resources_of_type(
        &self,
        r#type: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<ObjectRow>, DbError> {
        let statement = self.sql.get("RESOURCES_BY_TYPE", self.objects_table());
        let offset = page_offset(page, page_size);
        let storage = self.lock_storage().await;
        let rows = storage
            .read
            .conn
            .query(&statement, &[&r#type, &page_size, &offset])
            .await?;
        Ok(rows.iter().map(ObjectRow::from_row).collect())
    }
}

/// `page` is 1-based (page 1 is the first page, matching
/// `PGObjectsStorage`'s `(page - 1) * page_size` convention); a page below 1
/// clamps to the first page rather than computing a negative offset.
fn page_offset(page: i64, page_size: i64) -> i64 {
    page.saturating_sub(1).max(0).saturating_mul(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets_are_derived_from_one_based_page_numbers() {
        assert_eq!(page_offset(1, 25), 0, "the first page starts at offset 0");
        assert_eq!(page_offset(3, 25), 50);
    }

    #[test]
    fn page_offset_clamps_pages_below_one() {
        assert_eq!(page_offset(0, 25), 0);
        assert_eq!(page_offset(-5, 25), 0);
    }
}
