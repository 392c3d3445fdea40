//! Port traits (interfaces) for dependency injection

pub mod storage;

pub use storage::{
    AppealStore, GuildDataStore, ProblemStore, QuizSessionStore, QuizStore, StorageBackend,
    UserDataStore,
};
