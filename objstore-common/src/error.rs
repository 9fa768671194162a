use std::fmt;

use backtrace::Backtrace;
use thiserror::Error;

/// Errors raised by the storage engine, taxonomic rather than
/// driver-specific: callers branch on [`DbErrorIntrospect`], not on the
/// underlying `tokio_postgres`/`deadpool_postgres` error shape.
#[derive(Debug)]
pub struct DbError {
    kind: DbErrorKind,
    pub backtrace: Box<Backtrace>,
}

#[derive(Debug, Error)]
enum DbErrorKind {
    /// Transient: pool-restart in progress, "another operation in
    /// progress", or a detected deadlock. The caller should retry the
    /// transaction from scratch.
    #[error("conflict, retry the transaction: {0}")]
    Conflict(String),

    /// Optimistic-concurrency failure: the row's current `tid` no longer
    /// matches the caller's `otid`, or a foreign-key violation indicates a
    /// stale cache entry.
    #[error("tid conflict on oid {oid}: {message}")]
    TidConflict { oid: String, message: String },

    /// Unique `(parent_id, id)` violation: an attempt to create a second
    /// child with an already-taken name. Not transient.
    #[error("object named {id:?} already exists under parent {parent_id}")]
    ConflictIdOnContainer { parent_id: String, id: String },

    /// `load` of a missing oid.
    #[error("no such object: {oid}")]
    NotFound { oid: String },

    /// The pool had no free session within the configured timeout.
    #[error("timed out acquiring a pooled connection")]
    AcquisitionTimeout,

    /// A condition the implementation believes cannot occur (e.g. a
    /// zero-row upsert on the insert path). Logged at error level by the
    /// caller before being raised here.
    #[error("fatal storage invariant violated: {0}")]
    Fatal(String),

    /// Anything else: connection setup failures, unexpected driver errors,
    /// pool build failures.
    #[error("{0}")]
    Internal(String),
}

impl DbError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        DbErrorKind::Conflict(msg.into()).into()
    }

    pub fn tid_conflict(oid: impl Into<String>, msg: impl Into<String>) -> Self {
        DbErrorKind::TidConflict {
            oid: oid.into(),
            message: msg.into(),
        }
        .into()
    }

    pub fn conflict_id_on_container(parent_id: impl Into<String>, id: impl Into<String>) -> Self {
        DbErrorKind::ConflictIdOnContainer {
            parent_id: parent_id.into(),
            id: id.into(),
        }
        .into()
    }

    pub fn not_found(oid: impl Into<String>) -> Self {
        DbErrorKind::NotFound { oid: oid.into() }.into()
    }

    pub fn acquisition_timeout() -> Self {
        DbErrorKind::AcquisitionTimeout.into()
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        DbErrorKind::Fatal(msg.into()).into()
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DbErrorKind::Internal(msg.into()).into()
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        Self {
            kind,
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

pub trait DbErrorIntrospect {
    /// Transient: the caller should restart the transaction from scratch.
    fn is_conflict(&self) -> bool;
    fn is_tid_conflict(&self) -> bool;
    fn is_conflict_id_on_container(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_acquisition_timeout(&self) -> bool;
    /// The oid a `TidConflict` names, so the upper layer can purge its cache.
    fn conflicting_oid(&self) -> Option<&str>;
}

impl DbErrorIntrospect for DbError {
    fn is_conflict(&self) -> bool {
        matches!(&self.kind, DbErrorKind::Conflict(_))
    }

    fn is_tid_conflict(&self) -> bool {
        matches!(&self.kind, DbErrorKind::TidConflict { .. })
    }

    fn is_conflict_id_on_container(&self) -> bool {
        matches!(&self.kind, DbErrorKind::ConflictIdOnContainer { .. })
    }

    fn is_not_found(&self) -> bool {
        matches!(&self.kind, DbErrorKind::NotFound { .. })
    }

    fn is_acquisition_timeout(&self) -> bool {
        matches!(&self.kind, DbErrorKind::AcquisitionTimeout)
    }

    fn conflicting_oid(&self) -> Option<&str> {
        match &self.kind {
            DbErrorKind::TidConflict { oid, .. } => Some(oid),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match &e {
            deadpool_postgres::PoolError::Timeout(_) => DbError::acquisition_timeout(),
            deadpool_postgres::PoolError::Closed => DbError::conflict("pool is closed"),
            _ => DbError::internal(format!("deadpool error: {e}")),
        }
    }
}

/// Generic fallback translation for a raw `tokio_postgres::Error` that
/// wasn't already matched against one of the specific cases the storage
/// engine inspects (unique/foreign-key violation, deadlock, "another
/// operation in progress"). Call sites that need the richer
/// `TidConflict`/`ConflictIdOnContainer` classification do their own match
/// before falling back to `?` / `.into()`.
impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error() {
            if db_err.message().contains("deadlock detected") {
                return DbError::conflict("deadlock detected");
            }
        }
        if e.to_string().contains("another operation is in progress") {
            return DbError::conflict("another operation is in progress");
        }
        DbError::internal(e.to_string())
    }
}
