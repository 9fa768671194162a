//! Named, `{table_name}`-templated statement catalog. Analogous to the
//! teacher's `STD_COLLS` static table: a fixed set of strings known at
//! compile time, looked up by name rather than constructed dynamically.

use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;

use objstore_common::MAX_OID_LENGTH;

fn wrap_return_count(statement: &str) -> String {
    format!("WITH rows AS (\n{statement}\n    RETURNING 1\n)\nSELECT count(*) FROM rows")
}

lazy_static! {
    static ref NAIVE_UPSERT: String = format!(
        r#"INSERT INTO {{table_name}}
(zoid, tid, state_size, part, resource, of, otid, parent_id, id, type, json, state)
VALUES ($1::varchar({MAX_OID_LENGTH}), $2::bigint, $3::bigint, $4::bigint, $5::boolean,
        $6::varchar({MAX_OID_LENGTH}), $7::bigint, $8::varchar({MAX_OID_LENGTH}),
        $9::text, $10::text, $11::jsonb, $12::bytea)
ON CONFLICT (zoid)
DO UPDATE SET
    tid = EXCLUDED.tid,
    state_size = EXCLUDED.state_size,
    part = EXCLUDED.part,
    resource = EXCLUDED.resource,
    of = EXCLUDED.of,
    otid = EXCLUDED.otid,
    parent_id = EXCLUDED.parent_id,
    id = EXCLUDED.id,
    type = EXCLUDED.type,
    json = EXCLUDED.json,
    state = EXCLUDED.state"#
    );
    static ref UPSERT: String = wrap_return_count(&format!("{}\nWHERE\n    tid = EXCLUDED.otid", *NAIVE_UPSERT));
    static ref NAIVE_UPSERT_WRAPPED: String = wrap_return_count(&NAIVE_UPSERT);

    static ref NAIVE_UPDATE: String = format!(
        r#"UPDATE {{table_name}}
SET
    tid = $2::bigint,
    state_size = $3::bigint,
    part = $4::bigint,
    resource = $5::boolean,
    of = $6::varchar({MAX_OID_LENGTH}),
    otid = $7::bigint,
    parent_id = $8::varchar({MAX_OID_LENGTH}),
    id = $9::text,
    type = $10::text,
    json = $11::jsonb,
    state = $12::bytea
WHERE
    zoid = $1::varchar({MAX_OID_LENGTH})"#
    );
    static ref UPDATE: String = wrap_return_count(&format!("{}\n    AND tid = $7::bigint", *NAIVE_UPDATE));
    static ref NAIVE_UPDATE_WRAPPED: String = wrap_return_count(&NAIVE_UPDATE);

    static ref TXN_CONFLICTS: String = "SELECT zoid, tid, state_size, resource, type, id\nFROM {table_name}\nWHERE tid > $1".to_string();
    static ref TXN_CONFLICTS_ON_OIDS: String = format!("{}\nAND zoid = ANY($2)", *TXN_CONFLICTS);

    static ref REGISTRY: HashMap<&'static str, String> = {
        let mut m: HashMap<&'static str, String> = HashMap::new();
        m.insert("GET_OID", format!(
            "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {{table_name}}\nWHERE zoid = $1::varchar({MAX_OID_LENGTH})"
        ));
        m.insert("GET_CHILDREN_KEYS", "SELECT id\nFROM {table_name}\nWHERE parent_id = $1".to_string());
        m.insert("GET_ANNOTATIONS_KEYS", "SELECT id, parent_id\nFROM {table_name}\nWHERE of = $1".to_string());
        m.insert("GET_CHILD", "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {table_name}\nWHERE parent_id = $1 AND id = $2".to_string());
        m.insert("GET_CHILDREN_BATCH", "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {table_name}\nWHERE parent_id = $1 AND id = ANY($2)".to_string());
        m.insert("EXIST_CHILD", "SELECT zoid\nFROM {table_name}\nWHERE parent_id = $1 AND id = $2".to_string());
        m.insert("HAS_OBJECT", "SELECT zoid\nFROM {table_name}\nWHERE zoid = $1".to_string());
        m.insert("INSERT_BLOB_STUB", format!(
            "INSERT INTO {{table_name}}\n(zoid, tid, state_size, part, resource, type)\nVALUES ($1::varchar({MAX_OID_LENGTH}), -1, 0, 0, TRUE, 'stub')\nON CONFLICT (zoid) DO NOTHING"
        ));
        m.insert("GET_ANNOTATION", "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {table_name}\nWHERE of = $1 AND id = $2".to_string());
        m.insert("NAIVE_UPSERT", NAIVE_UPSERT_WRAPPED.clone());
        m.insert("UPSERT", UPSERT.clone());
        m.insert("NAIVE_UPDATE", NAIVE_UPDATE_WRAPPED.clone());
        m.insert("UPDATE", UPDATE.clone());
        m.insert("NUM_CHILDREN", "SELECT count(*) FROM {table_name} WHERE parent_id = $1".to_string());
        m.insert("NUM_ROWS", "SELECT count(*) FROM {table_name}".to_string());
        m.insert("NUM_RESOURCES", "SELECT count(*) FROM {table_name} WHERE resource is TRUE".to_string());
        m.insert("NUM_RESOURCES_BY_TYPE", "SELECT count(*) FROM {table_name} WHERE type = $1".to_string());
        m.insert("RESOURCES_BY_TYPE", "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {table_name}\nWHERE type = $1\nORDER BY zoid\nLIMIT $2 OFFSET $3".to_string());
        m.insert("GET_CHILDREN", "SELECT zoid, tid, state_size, resource, of, parent_id, id, type, state\nFROM {table_name}\nWHERE parent_id = $1".to_string());
        m.insert("TRASH_PARENT_ID", format!(
            "UPDATE {{table_name}}\nSET parent_id = '{}'\nWHERE zoid = $1", objstore_common::TRASH_OID
        ));
        m.insert("INSERT_BLOB_CHUNK", "INSERT INTO {table_name}\n(bid, zoid, chunk_index, data)\nVALUES ($1, $2, $3::int, $4)".to_string());
        m.insert("READ_BLOB_CHUNK", "SELECT * FROM {table_name}\nWHERE bid = $1 AND chunk_index = $2::int".to_string());
        // See design note on the resolved read_blob_chunks open question: a
        // real statement ordered by chunk_index, not the original's raw bid.
        m.insert("READ_BLOB_CHUNKS", "SELECT * FROM {table_name}\nWHERE bid = $1\nORDER BY chunk_index".to_string());
        m.insert("DELETE_BLOB", "DELETE FROM {table_name} WHERE bid = $1".to_string());
        m.insert("TXN_CONFLICTS", TXN_CONFLICTS.clone());
        m.insert("TXN_CONFLICTS_ON_OIDS", TXN_CONFLICTS_ON_OIDS.clone());
        m.insert("BATCHED_GET_CHILDREN_KEYS", "SELECT id\nFROM {table_name}\nWHERE parent_id = $1\nORDER BY zoid\nLIMIT $2 OFFSET $3".to_string());
        m.insert("DELETE_OBJECT", "DELETE FROM {table_name} WHERE zoid = $1".to_string());
        m.insert("GET_TRASHED_OBJECTS", format!(
            "SELECT zoid FROM {{table_name}} WHERE parent_id = '{}'", objstore_common::TRASH_OID
        ));
        m.insert("CREATE_TRASH", format!(
            "INSERT INTO {{table_name}} (zoid, tid, state_size, part, resource, type)\nSELECT '{}', 0, 0, 0, FALSE, 'TRASH_REF'\nWHERE NOT EXISTS (SELECT * FROM {{table_name}} WHERE zoid = '{}')",
            objstore_common::TRASH_OID, objstore_common::TRASH_OID
        ));
        m
    };
}

/// Materializes statement templates against configured table names, caching
/// the result per `(name, table)` so repeated lookups after the first are a
/// read-lock hash hit. Panics on an unknown statement name: the registry's
/// contents are fixed at compile time, so an unknown name is a programmer
/// error, not a runtime condition.
#[derive(Default)]
pub struct SqlRegistry {
    materialized: RwLock<HashMap<(&'static str, String), String>>,
}

impl SqlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &'static str, table_name: &str) -> String {
        let key = (name, table_name.to_string());
        if let Some(hit) = self.materialized.read().expect("sql registry read lock").get(&key) {
            return hit.clone();
        }

        let template = REGISTRY
            .get(name)
            .unwrap_or_else(|| panic!("unknown SQL statement {name:?}"));
        let materialized = template.replace("{table_name}", table_name);

        self.materialized
            .write()
            .expect("sql registry write lock")
            .insert(key, materialized.clone());
        materialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializes_and_caches_per_table() {
        let registry = SqlRegistry::new();
        let first = registry.get("GET_OID", "objects");
        assert!(first.contains("FROM objects"));
        let second = registry.get("GET_OID", "objects");
        assert_eq!(first, second);

        let other_table = registry.get("GET_OID", "widgets");
        assert!(other_table.contains("FROM widgets"));
    }

    #[test]
    fn count_wrapping_statements_return_a_single_count_row() {
        let registry = SqlRegistry::new();
        let upsert = registry.get("NAIVE_UPSERT", "objects");
        assert!(upsert.starts_with("WITH rows AS ("));
        assert!(upsert.trim_end().ends_with("SELECT count(*) FROM rows"));
    }

    #[test]
    #[should_panic(expected = "unknown SQL statement")]
    fn unknown_statement_name_panics() {
        let registry = SqlRegistry::new();
        registry.get("NOT_A_REAL_STATEMENT", "objects");
    }

    #[test]
    fn blob_stub_insert_carries_the_sentinel_tid_and_resource_flag() {
        let registry = SqlRegistry::new();
        let stub = registry.get("INSERT_BLOB_STUB", "objects");
        assert!(stub.contains("-1"));
        assert!(stub.contains("'stub'"));
        // Matches the grounding source's stub insert (`pg.py:889`), which
        // flags the placeholder as a resource.
        assert!(stub.contains("TRUE, 'stub'"));
    }

    #[test]
    fn child_and_annotation_lookups_select_the_same_columns_as_get_oid() {
        let registry = SqlRegistry::new();
        let get_oid = registry.get("GET_OID", "objects");
        for name in [
            "GET_CHILD",
            "GET_CHILDREN_BATCH",
            "GET_CHILDREN",
            "GET_ANNOTATION",
            "RESOURCES_BY_TYPE",
        ] {
            let statement = registry.get(name, "objects");
            for column in ["of", "parent_id"] {
                assert!(
                    statement.contains(column),
                    "{name} must select {column} like GET_OID does ({get_oid:?})"
                );
            }
        }
    }
}
