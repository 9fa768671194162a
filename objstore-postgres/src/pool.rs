//! Connection factory and pool (`spec.md` §4.2). Sessions are acquired from
//! a `deadpool_postgres::Pool` configured with `RecyclingMethod::Fast` — the
//! closest `tokio_postgres` analogue to the original driver's disabled
//! session-reset capability (see `LightweightConnection` in the retrieved
//! Python source): neither driver issues advisory-lock, `LISTEN`/`NOTIFY`,
//! or session-reset statements, so disabling them here means simply never
//! calling them.

use std::time::Duration;

use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime, Timeouts,
};
use tokio_postgres::NoTls;

use objstore_common::{DbError, GetPoolState, PoolState};
use objstore_settings::Settings;

/// One of the strings the engine treats as a dead connection, per
/// `spec.md` §4.2.
const BAD_CONNECTION_MARKERS: [&str; 3] = [
    "cannot perform operation: connection is closed",
    "connection is closed",
    "pool is closed",
];

pub fn is_bad_connection_error(message: &str) -> bool {
    BAD_CONNECTION_MARKERS.iter().any(|m| message.contains(m))
}

/// Wraps a `deadpool_postgres::Pool`. `restart_connection` on `Engine` is
/// the one that tracks when the pool was last (re)built, since it's the
/// side that enforces `BAD_CONNECTION_RESTART_DELAY`.
pub struct PgPool {
    pool: Pool,
    acquire_timeout: Duration,
}

impl PgPool {
    pub fn new(settings: &Settings) -> Result<Self, DbError> {
        let pool = build_pool(settings)?;
        Ok(Self {
            pool,
            acquire_timeout: settings.conn_acquire_timeout(),
        })
    }

    pub async fn acquire(&self) -> Result<deadpool_postgres::Client, DbError> {
        match tokio::time::timeout(self.acquire_timeout, self.pool.get()).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DbError::acquisition_timeout()),
        }
    }

    /// Closes the current pool with a short timeout, terminates it, and
    /// rebuilds from the same DSN and options. Returns `Conflict` so the
    /// caller retries its transaction, matching
    /// `PostgresqlStorage.restart_connection`.
    pub async fn restart(&mut self, settings: &Settings) -> Result<(), DbError> {
        warn!("connection potentially lost to postgres, restarting pool");
        self.pool.close();
        self.pool = build_pool(settings)?;
        self.acquire_timeout = settings.conn_acquire_timeout();
        Ok(())
    }

    pub fn terminate(&self) {
        self.pool.close();
    }
}

fn build_pool(settings: &Settings) -> Result<Pool, DbError> {
    let mut config = PoolConfig::new();
    config.url = Some(settings.dsn.clone());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    // `Timeouts::recycle` bounds how long the recycle *check itself* may
    // run, not how long a connection may sit idle — `deadpool_postgres`
    // has no pool-level idle/lifetime eviction knob, so
    // `database_pool_connection_{lifespan,max_idle}` are accepted as
    // configuration surface (parity with `syncstorage-settings`) without
    // being wired to a timeout they don't actually control.
    let timeouts = Timeouts {
        wait: Some(settings.conn_acquire_timeout()),
        create: Some(settings.conn_acquire_timeout()),
        recycle: None,
    };
    config.pool = Some(deadpool_postgres::PoolConfig {
        max_size: settings.pool_size.max(2) as usize,
        timeouts,
        ..Default::default()
    });

    config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| DbError::internal(format!("couldn't build postgres pool: {e}")))
}

impl GetPoolState for PgPool {
    fn state(&self) -> PoolState {
        self.pool.status().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_three_sentinel_bad_connection_strings() {
        assert!(is_bad_connection_error("connection is closed"));
        assert!(is_bad_connection_error("pool is closed"));
        assert!(is_bad_connection_error(
            "cannot perform operation: connection is closed"
        ));
        assert!(!is_bad_connection_error("relation \"objects\" does not exist"));
    }
}
