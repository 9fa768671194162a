//! TID allocation (`spec.md` §4.3 "TID allocation"). `NEXT_TID`/`MAX_TID`
//! are prepared once against the shared read session and reused; both
//! reads happen under the storage lock because that session is
//! single-threaded (`spec.md` §5).

use tokio_postgres::Statement;

use objstore_common::{DbError, Tid};

use super::Engine;

const NEXT_TID: &str = "SELECT nextval('tid_sequence')";
const MAX_TID: &str = "SELECT last_value FROM tid_sequence";

pub(crate) async fn prepare_statements(
    conn: &deadpool_postgres::Client,
) -> Result<(Statement, Statement), DbError> {
    let next = conn.prepare(NEXT_TID).await?;
    let max = conn.prepare(MAX_TID).await?;
    Ok((next, max))
}

impl Engine {
    /// Advances and returns a fresh sequence value.
    pub async fn get_next_tid(&self) -> Result<Tid, DbError> {
        let result = {
            let storage = self.lock_storage().await;
            storage.read.conn.query_one(&storage.read.next_tid_stmt, &[]).await
        };
        match result {
            Ok(row) => Ok(Tid(row.get::<_, i64>(0))),
            Err(e) => {
                if let Some(restart) = self.check_bad_connection(&e).await {
                    Err(restart)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Reads `last_value` without advancing the sequence.
    pub async fn get_current_tid(&self) -> Result<Tid, DbError> {
        let storage = self.lock_storage().await;
        let row = storage.read.conn.query_one(&storage.read.max_tid_stmt, &[]).await?;
        Ok(Tid(row.get::<_, i64>(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_text_matches_the_sequence_protocol() {
        assert_eq!(NEXT_TID, "SELECT nextval('tid_sequence')");
        assert_eq!(MAX_TID, "SELECT last_value FROM tid_sequence");
    }
}
