//! Backend adapters

pub mod kv;
pub mod memory;
pub mod postgres;
pub mod redis_store;
mod sql;
pub mod sqlite;

pub use kv::{CappedInsert, KvBackend, KvConnection};
pub use memory::MemoryStore;
pub use postgres::PostgresBackend;
pub use redis_store::RedisStore;
pub use sqlite::SqliteBackend;

use quizbank_core::{
    BackendConfig, CacheError, CacheResult as Result, Limits, Problem, StorageBackend,
};
use std::time::Duration;

/// Open the adapter selected by `config`.
pub async fn open_backend(
    config: &BackendConfig,
    limits: Limits,
) -> Result<Box<dyn StorageBackend>> {
    let backend: Box<dyn StorageBackend> = match config {
        BackendConfig::Sqlite { path } => Box::new(SqliteBackend::open(path, limits).await?),
        BackendConfig::Postgres {
            url,
            max_connections,
            acquire_timeout_secs,
        } => Box::new(
            PostgresBackend::connect(url, *max_connections, *acquire_timeout_secs, limits).await?,
        ),
        BackendConfig::Redis {
            url,
            op_timeout_secs,
        } => Box::new(
            KvBackend::connect_redis(url, Duration::from_secs(*op_timeout_secs), limits).await?,
        ),
        BackendConfig::Memory => Box::new(KvBackend::memory(limits)),
    };
    tracing::info!("Opened {} backend", backend.kind());
    Ok(backend)
}

/// The id passed alongside a problem must be the problem's own id.
pub(crate) fn check_problem_id(problem_id: i64, problem: &Problem) -> Result<()> {
    if problem.id != problem_id {
        return Err(CacheError::IdMismatch {
            requested_id: problem_id,
            record_id: problem.id,
        });
    }
    Ok(())
}
