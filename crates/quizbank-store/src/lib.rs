//! Quizbank storage
//!
//! Backend adapters (SQLite, PostgreSQL, Redis and an in-process map), the
//! [`ProblemCache`] facade and the [`QuizSessionEngine`].

pub mod cache;
pub mod quiz_session;
pub mod storage;

pub use cache::{AuthorRecords, CacheLock, CacheSnapshot, ImportMode, ProblemCache};
pub use quiz_session::{Clock, QuizSessionEngine, SessionGrade, SystemClock};
pub use storage::{open_backend, KvBackend, MemoryStore, PostgresBackend, SqliteBackend};
