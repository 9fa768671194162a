//! Engine configuration, loaded the way `syncstorage-settings` /
//! `syncserver-settings` load theirs: defaults baked into `Default`,
//! overridden by an optional config file, then by environment variables.

#[macro_use]
extern crate slog_scope;

use std::convert::TryFrom;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use objstore_common::table_name_singular;

static PREFIX: &str = "objstore";

/// How the upper layer wants commit-time conflict resolution handled.
/// `ResolveReadCommitted` is this engine's own optimistic-concurrency path
/// (`spec.md` §4.3 `get_conflicts`); `None`/`TidOnly` and anything else are
/// meaningful only to the upper layer and passed through unexamined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum TransactionStrategy {
    ResolveReadCommitted,
    None,
    TidOnly,
    Other(String),
}

impl TransactionStrategy {
    pub fn is_none(&self) -> bool {
        matches!(self, TransactionStrategy::None)
    }

    pub fn is_tidonly(&self) -> bool {
        matches!(self, TransactionStrategy::TidOnly)
    }
}

impl Default for TransactionStrategy {
    fn default() -> Self {
        TransactionStrategy::ResolveReadCommitted
    }
}

impl TryFrom<String> for TransactionStrategy {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(match value.as_str() {
            "resolve_readcommitted" => TransactionStrategy::ResolveReadCommitted,
            "none" => TransactionStrategy::None,
            "tidonly" => TransactionStrategy::TidOnly,
            _ => TransactionStrategy::Other(value),
        })
    }
}

impl<'de> Deserialize<'de> for TransactionStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(TransactionStrategy::try_from(raw).expect("infallible"))
    }
}

impl From<TransactionStrategy> for String {
    fn from(strategy: TransactionStrategy) -> String {
        match strategy {
            TransactionStrategy::ResolveReadCommitted => "resolve_readcommitted".to_string(),
            TransactionStrategy::None => "none".to_string(),
            TransactionStrategy::TidOnly => "tidonly".to_string(),
            TransactionStrategy::Other(s) => s,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend connection string.
    pub dsn: String,
    /// Max pooled sessions. Clamped to a minimum of 2 on `normalize()`.
    pub pool_size: u32,
    /// Read-only transactions; disables trash-row bootstrap.
    pub read_only: bool,
    pub transaction_strategy: TransactionStrategy,
    /// Upper-layer cache-policy hint; this engine doesn't interpret it.
    pub cache_strategy: String,
    /// Seconds to wait for a session to free up before `AcquisitionTimeout`.
    pub conn_acquire_timeout: u32,
    pub objects_table_name: String,
    pub blobs_table_name: String,

    /// Metrics namespace hint for the host application; the engine itself
    /// emits no metrics.
    pub statsd_label: String,
    /// Max age a pooled connection should live, in seconds.
    pub database_pool_connection_lifespan: Option<u32>,
    /// Max time a connection should sit idle before being recycled.
    pub database_pool_connection_max_idle: Option<u32>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            dsn: "postgres://postgres@localhost/objstore".to_string(),
            pool_size: 13,
            read_only: false,
            transaction_strategy: TransactionStrategy::default(),
            cache_strategy: "dummy".to_string(),
            conn_acquire_timeout: 20,
            objects_table_name: objstore_common::DEFAULT_OBJECTS_TABLE.to_string(),
            blobs_table_name: objstore_common::DEFAULT_BLOBS_TABLE.to_string(),
            statsd_label: "objstore".to_string(),
            database_pool_connection_lifespan: None,
            database_pool_connection_max_idle: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional config file, then environment
    /// variables prefixed `OBJSTORE_` (`OBJSTORE_POOL_SIZE=5`, nested keys
    /// separated by `__`), mirroring
    /// `syncserver_settings::Settings::with_env_and_config_file`.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(filename) = filename {
            builder = builder.add_source(File::with_name(filename));
        }
        builder = builder.add_source(
            Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"),
        );

        match builder.build().and_then(|c| c.try_deserialize::<Self>()) {
            Ok(mut settings) => {
                settings.normalize();
                Ok(settings)
            }
            Err(e) => {
                error!("Configuration error: {:?}", &e);
                Err(e)
            }
        }
    }

    /// Clamp values that must stay in range regardless of what was
    /// supplied, the way `syncstorage_settings::Settings::normalize` does.
    pub fn normalize(&mut self) {
        self.pool_size = self.pool_size.max(2);
    }

    pub fn conn_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_acquire_timeout as u64)
    }

    /// `objects` -> index prefix `object`, `blobs` -> `blob`; any other
    /// configured name is used verbatim (`spec.md` §6 "Table names").
    pub fn objects_index_prefix(&self) -> String {
        table_name_singular(
            &self.objects_table_name,
            objstore_common::DEFAULT_OBJECTS_TABLE,
            "object",
        )
    }

    pub fn blobs_index_prefix(&self) -> String {
        table_name_singular(
            &self.blobs_table_name,
            objstore_common::DEFAULT_BLOBS_TABLE,
            "blob",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let s = Settings::default();
        assert_eq!(s.pool_size, 13);
        assert!(!s.read_only);
        assert_eq!(s.conn_acquire_timeout, 20);
        assert_eq!(s.objects_table_name, "objects");
        assert_eq!(s.blobs_table_name, "blobs");
        assert_eq!(s.transaction_strategy, TransactionStrategy::ResolveReadCommitted);
    }

    #[test]
    fn normalize_clamps_pool_size_minimum() {
        let mut s = Settings {
            pool_size: 0,
            ..Settings::default()
        };
        s.normalize();
        assert_eq!(s.pool_size, 2);
    }

    #[test]
    fn index_prefix_derives_from_default_table_names() {
        let s = Settings::default();
        assert_eq!(s.objects_index_prefix(), "object");
        assert_eq!(s.blobs_index_prefix(), "blob");
    }

    #[test]
    fn index_prefix_uses_configured_name_verbatim_when_non_default() {
        let s = Settings {
            objects_table_name: "widgets".to_string(),
            blobs_table_name: "widget_blobs".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.objects_index_prefix(), "widgets");
        assert_eq!(s.blobs_index_prefix(), "widget_blobs");
    }

    #[test]
    fn transaction_strategy_round_trips_unknown_values() {
        let strategy = TransactionStrategy::try_from("custom_strategy".to_string()).unwrap();
        assert_eq!(strategy, TransactionStrategy::Other("custom_strategy".to_string()));
        assert_eq!(String::from(strategy), "custom_strategy");
    }
}
