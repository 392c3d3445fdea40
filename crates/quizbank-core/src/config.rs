//! Cache configuration

use crate::error::CacheError;
use quizbank_types::Limits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "quizbank.toml";
pub const ENV_PREFIX: &str = "QUIZBANK";
pub const ENV_SEPARATOR: &str = "__";

/// Which storage technology backs the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Embedded SQL. `":memory:"` opens a private in-memory database.
    Sqlite { path: String },

    /// Client/server SQL
    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_acquire_timeout")]
        acquire_timeout_secs: u64,
    },

    /// Key-value store
    Redis {
        url: String,

        #[serde(default = "default_op_timeout")]
        op_timeout_secs: u64,
    },

    /// Key-value layout over an in-process map (development and tests)
    Memory,
}

fn default_pool_size() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_op_timeout() -> u64 {
    5
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite {
            path: "quizbank.db".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Sqlite { .. } => BackendKind::Sqlite,
            BackendConfig::Postgres { .. } => BackendKind::Postgres,
            BackendConfig::Redis { .. } => BackendKind::Redis,
            BackendConfig::Memory => BackendKind::Memory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgres,
    Redis,
    Memory,
}

impl BackendKind {
    pub fn is_sql(&self) -> bool {
        matches!(self, BackendKind::Sqlite | BackendKind::Postgres)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Redis => write!(f, "redis"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub limits: Limits,
}

impl CacheConfig {
    /// Load from an optional file, then `QUIZBANK__*` environment variables.
    ///
    /// Without a path, `quizbank.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        Self::load_with_env(path, None)
    }

    /// Like [`CacheConfig::load`] with an explicit environment instead of the
    /// process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, CacheError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&CacheConfig::default())?);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
