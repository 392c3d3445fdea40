//! Storage traits for persistence
//!
//! Every backend adapter implements all of these. `get_*` fails with
//! `NotFound` when the record is absent, `add_*` fails with `AlreadyExists`
//! on an existing identity, `update_*` upserts and `remove_*` fails with
//! `NotFound` when there is nothing to remove.

use crate::config::BackendKind;
use crate::CacheResult as Result;
use async_trait::async_trait;
use quizbank_types::{
    Appeal, Dict, GuildData, GuildScope, Problem, Quiz, QuizSolvingSession, UserData,
};

/// Problem store, keyed by `(guild scope, problem id)`
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, guild: GuildScope, problem_id: i64) -> Result<Problem>;
    async fn get_problems_by_guild(&self, guild: GuildScope) -> Result<Vec<Problem>>;
    async fn get_all_problems(&self) -> Result<Vec<Problem>>;
    /// Fails with `IdMismatch` when `problem.id != problem_id` and with
    /// `TooManyProblems` when the guild is full.
    async fn add_problem(&self, problem_id: i64, problem: &Problem) -> Result<()>;
    async fn update_problem(&self, problem_id: i64, problem: &Problem) -> Result<()>;
    async fn remove_problem(&self, guild: GuildScope, problem_id: i64) -> Result<()>;
}

/// Quiz store, keyed by quiz id
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn get_quiz(&self, quiz_id: i64) -> Result<Quiz>;
    async fn get_quizzes_by_guild(&self, guild: GuildScope) -> Result<Vec<Quiz>>;
    async fn get_all_quizzes(&self) -> Result<Vec<Quiz>>;
    async fn add_quiz(&self, quiz: &Quiz) -> Result<()>;
    async fn update_quiz(&self, quiz: &Quiz) -> Result<()>;
    async fn remove_quiz(&self, quiz_id: i64) -> Result<()>;
}

/// Quiz solving session store, keyed by session id
#[async_trait]
pub trait QuizSessionStore: Send + Sync {
    async fn get_quiz_session(&self, session_id: &str) -> Result<QuizSolvingSession>;
    async fn get_quiz_sessions_by_user(&self, user_id: i64) -> Result<Vec<QuizSolvingSession>>;
    async fn get_all_quiz_sessions(&self) -> Result<Vec<QuizSolvingSession>>;
    async fn add_quiz_session(&self, session: &QuizSolvingSession) -> Result<()>;
    async fn update_quiz_session(&self, session: &QuizSolvingSession) -> Result<()>;
    async fn remove_quiz_session(&self, session_id: &str) -> Result<()>;
}

/// User data store, keyed by user id
#[async_trait]
pub trait UserDataStore: Send + Sync {
    async fn get_user_data(&self, user_id: i64) -> Result<UserData>;
    async fn get_all_user_data(&self) -> Result<Vec<UserData>>;
    async fn add_user_data(&self, data: &UserData) -> Result<()>;
    async fn update_user_data(&self, data: &UserData) -> Result<()>;
    async fn remove_user_data(&self, user_id: i64) -> Result<()>;
}

/// Guild data store, keyed by guild id
#[async_trait]
pub trait GuildDataStore: Send + Sync {
    async fn get_guild_data(&self, guild_id: i64) -> Result<GuildData>;
    async fn get_all_guild_data(&self) -> Result<Vec<GuildData>>;
    async fn add_guild_data(&self, data: &GuildData) -> Result<()>;
    async fn update_guild_data(&self, data: &GuildData) -> Result<()>;
    async fn remove_guild_data(&self, guild_id: i64) -> Result<()>;
}

/// Appeal store, keyed by special id
#[async_trait]
pub trait AppealStore: Send + Sync {
    async fn get_appeal(&self, special_id: i64) -> Result<Appeal>;
    async fn get_appeals_by_user(&self, user_id: i64) -> Result<Vec<Appeal>>;
    async fn get_all_appeals(&self) -> Result<Vec<Appeal>>;
    async fn add_appeal(&self, appeal: &Appeal) -> Result<()>;
    async fn update_appeal(&self, appeal: &Appeal) -> Result<()>;
    async fn remove_appeal(&self, special_id: i64) -> Result<()>;
}

/// A complete backend adapter.
#[async_trait]
pub trait StorageBackend:
    ProblemStore + QuizStore + QuizSessionStore + UserDataStore + GuildDataStore + AppealStore
{
    fn kind(&self) -> BackendKind;

    /// Backend-native query for administrative tooling. Rows come back as
    /// JSON objects; their shape is backend-defined.
    async fn run_raw_query(&self, query: &str) -> Result<Vec<Dict>>;

    /// Request a background snapshot. SQL backends return `Unsupported`.
    async fn bgsave(&self, schedule: bool) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
