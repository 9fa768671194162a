//! Schema bootstrap and migration (`spec.md` §4.3 "Schema bootstrap"),
//! grounded on `PostgresqlStorage.initialize`/`create`/`has_unique_constraint`
//! in the retrieved Python source.

use objstore_common::{DbError, MAX_OID_LENGTH};
use objstore_settings::Settings;

use crate::sql_registry::SqlRegistry;

fn object_table_ddl(objects_table: &str) -> String {
    format!(
        r#"CREATE TABLE {objects_table} (
    zoid VARCHAR({MAX_OID_LENGTH}) NOT NULL PRIMARY KEY,
    tid BIGINT NOT NULL,
    state_size BIGINT NOT NULL,
    part BIGINT NOT NULL,
    resource BOOLEAN NOT NULL,
    of VARCHAR({MAX_OID_LENGTH}) REFERENCES {objects_table} ON DELETE CASCADE,
    otid BIGINT,
    parent_id VARCHAR({MAX_OID_LENGTH}) REFERENCES {objects_table} ON DELETE CASCADE,
    id TEXT,
    type TEXT NOT NULL,
    json JSONB,
    state BYTEA
)"#
    )
}

fn blob_table_ddl(blobs_table: &str, objects_table: &str) -> String {
    format!(
        r#"CREATE TABLE {blobs_table} (
    bid VARCHAR({MAX_OID_LENGTH}) NOT NULL,
    zoid VARCHAR({MAX_OID_LENGTH}) NOT NULL REFERENCES {objects_table} ON DELETE CASCADE,
    chunk_index INT NOT NULL,
    data BYTEA,
    PRIMARY KEY (bid, zoid, chunk_index)
)"#
    )
}

fn index_statements(objects_table: &str, object_prefix: &str, blobs_table: &str, blob_prefix: &str) -> Vec<String> {
    vec![
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_tid ON {objects_table} (tid)"),
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_of ON {objects_table} (of)"),
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_part ON {objects_table} (part)"),
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_parent ON {objects_table} (parent_id)"),
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_id ON {objects_table} (id)"),
        format!("CREATE INDEX IF NOT EXISTS {object_prefix}_type ON {objects_table} (type)"),
        format!("CREATE INDEX IF NOT EXISTS {blob_prefix}_bid ON {blobs_table} (bid)"),
        format!("CREATE INDEX IF NOT EXISTS {blob_prefix}_zoid ON {blobs_table} (zoid)"),
        format!("CREATE INDEX IF NOT EXISTS {blob_prefix}_chunk ON {blobs_table} (chunk_index)"),
        "CREATE SEQUENCE IF NOT EXISTS tid_sequence".to_string(),
    ]
}

fn unique_constraint_ddl(objects_table: &str) -> String {
    format!(
        "ALTER TABLE {objects_table} ADD CONSTRAINT {objects_table}_parent_id_id_key UNIQUE (parent_id, id)"
    )
}

/// Emits table/index/sequence definitions then the unique constraint.
/// Swallows unique-violations on table creation: two initializers racing to
/// create the same schema is expected (`spec.md` §9 "trash row creation is
/// racy" applies here too).
async fn create(conn: &deadpool_postgres::Client, settings: &Settings) -> Result<(), DbError> {
    info!("creating initial database objects");
    let objects_table = &settings.objects_table_name;
    let blobs_table = &settings.blobs_table_name;
    let object_prefix = settings.objects_index_prefix();
    let blob_prefix = settings.blobs_index_prefix();

    let mut statements = vec![
        object_table_ddl(objects_table),
        blob_table_ddl(blobs_table, objects_table),
    ];
    statements.extend(index_statements(objects_table, &object_prefix, blobs_table, &blob_prefix));

    for statement in statements {
        if let Err(e) = conn.batch_execute(&statement).await {
            if !is_unique_violation(&e) {
                return Err(e.into());
            }
        }
    }

    conn.batch_execute(&unique_constraint_ddl(objects_table))
        .await
        .map_err(DbError::from)?;
    Ok(())
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.as_db_error()
        .map(|d| *d.code() == tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
        .unwrap_or(false)
}

fn is_undefined_table(e: &tokio_postgres::Error) -> bool {
    e.as_db_error()
        .map(|d| *d.code() == tokio_postgres::error::SqlState::UNDEFINED_TABLE)
        .unwrap_or(false)
}

async fn has_unique_constraint(
    conn: &deadpool_postgres::Client,
    objects_table: &str,
) -> Result<bool, DbError> {
    let rows = conn
        .query(
            "SELECT tc.constraint_name FROM information_schema.table_constraints AS tc \
             WHERE tc.constraint_name = $1 AND tc.constraint_type = 'UNIQUE'",
            &[&format!("{objects_table}_parent_id_id_key")],
        )
        .await?;
    Ok(!rows.is_empty())
}

/// On `initialize`: attempt `CREATE_TRASH`; if the objects table doesn't
/// exist yet, `create()` the schema and the unique constraint, then retry.
/// Finally checks oid-bearing column widths against `MAX_OID_LENGTH` and
/// migrates them online if the configured width changed.
pub(crate) async fn bootstrap(
    conn: &deadpool_postgres::Client,
    sql: &SqlRegistry,
    settings: &Settings,
) -> Result<(), DbError> {
    let trash_sql = sql.get("CREATE_TRASH", &settings.objects_table_name);

    if settings.read_only {
        return Ok(());
    }

    match conn.batch_execute(&trash_sql).await {
        Ok(()) => {}
        Err(e) if is_undefined_table(&e) => {
            create(conn, settings).await?;
            conn.batch_execute(&trash_sql).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let has_constraint = has_unique_constraint(conn, &settings.objects_table_name).await?;
    if !has_constraint {
        warn!("objects table has no unique (parent_id, id) constraint installed");
    }

    migrate_column_widths(conn, settings).await?;
    Ok(())
}

/// Migrates oid-bearing column widths to the current `MAX_OID_LENGTH` if
/// they were created under a different value.
async fn migrate_column_widths(
    conn: &deadpool_postgres::Client,
    settings: &Settings,
) -> Result<(), DbError> {
    let rows = conn
        .query(
            "SELECT character_maximum_length FROM information_schema.columns \
             WHERE table_name = $1 AND column_name = 'zoid'",
            &[&settings.objects_table_name],
        )
        .await?;
    let current_width: Option<i32> = rows.first().and_then(|r| r.get("character_maximum_length"));
    if current_width == Some(MAX_OID_LENGTH as i32) {
        return Ok(());
    }

    warn!("migrating oid VARCHAR column widths to {}", MAX_OID_LENGTH);
    let objects_table = &settings.objects_table_name;
    let blobs_table = &settings.blobs_table_name;
    for statement in [
        format!("ALTER TABLE {objects_table} ALTER COLUMN zoid TYPE varchar({MAX_OID_LENGTH})"),
        format!("ALTER TABLE {objects_table} ALTER COLUMN of TYPE varchar({MAX_OID_LENGTH})"),
        format!("ALTER TABLE {objects_table} ALTER COLUMN parent_id TYPE varchar({MAX_OID_LENGTH})"),
        format!("ALTER TABLE {blobs_table} ALTER COLUMN bid TYPE varchar({MAX_OID_LENGTH})"),
        format!("ALTER TABLE {blobs_table} ALTER COLUMN zoid TYPE varchar({MAX_OID_LENGTH})"),
    ] {
        conn.batch_execute(&statement).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ddl_carries_the_configured_max_oid_length() {
        let ddl = object_table_ddl("objects");
        assert!(ddl.contains(&format!("VARCHAR({MAX_OID_LENGTH})")));
    }

    #[test]
    fn unique_constraint_name_follows_the_table_name() {
        assert_eq!(
            unique_constraint_ddl("widgets"),
            "ALTER TABLE widgets ADD CONSTRAINT widgets_parent_id_id_key UNIQUE (parent_id, id)"
        );
    }
}
