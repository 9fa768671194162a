use objstore_common::{Oid, Tid};

/// One row of the objects table (`spec.md` §3 "Object row").
#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub zoid: Oid,
    pub tid: Tid,
    pub state_size: i64,
    pub resource: bool,
    pub of: Option<Oid>,
    pub parent_id: Option<Oid>,
    pub id: Option<String>,
    pub r#type: String,
    pub state: Vec<u8>,
}

impl ObjectRow {
    pub(crate) fn from_row(row: &tokio_postgres::Row) -> Self {
        ObjectRow {
            zoid: Oid::new(row.get::<_, String>("zoid")).expect("oid already persisted, within bound"),
            tid: Tid(row.get("tid")),
            state_size: row.get("state_size"),
            resource: row.get("resource"),
            of: row
                .get::<_, Option<String>>("of")
                .map(|v| Oid::new(v).expect("oid already persisted, within bound")),
            parent_id: row
                .get::<_, Option<String>>("parent_id")
                .map(|v| Oid::new(v).expect("oid already persisted, within bound")),
            id: row.get("id"),
            r#type: row.get("type"),
            state: row.get("state"),
        }
    }
}

/// One row of the blob chunks table, keyed by `(bid, zoid, chunk_index)`.
#[derive(Debug, Clone)]
pub struct BlobChunkRow {
    pub bid: String,
    pub zoid: Oid,
    pub chunk_index: i32,
    pub data: Vec<u8>,
}

impl BlobChunkRow {
    pub(crate) fn from_row(row: &tokio_postgres::Row) -> Self {
        BlobChunkRow {
            bid: row.get("bid"),
            zoid: Oid::new(row.get::<_, String>("zoid")).expect("oid already persisted, within bound"),
            chunk_index: row.get("chunk_index"),
            data: row.get("data"),
        }
    }
}

/// A row from `TXN_CONFLICTS`/`TXN_CONFLICTS_ON_OIDS`: enough of the object
/// row to let the caller decide whether its own view is stale.
#[derive(Debug, Clone)]
pub struct ConflictRow {
    pub zoid: Oid,
    pub tid: Tid,
    pub state_size: i64,
    pub resource: bool,
    pub r#type: String,
    pub id: Option<String>,
}

impl ConflictRow {
    pub(crate) fn from_row(row: &tokio_postgres::Row) -> Self {
        ConflictRow {
            zoid: Oid::new(row.get::<_, String>("zoid")).expect("oid already persisted, within bound"),
            tid: Tid(row.get("tid")),
            state_size: row.get("state_size"),
            resource: row.get("resource"),
            r#type: row.get("type"),
            id: row.get("id"),
        }
    }
}
