//! Key-value backend
//!
//! Every record is stored as its JSON dict under `{TypeName}:{scope}:{id}`.
//! Problems use their guild scope; every other record lives under `global`.
//! The connection is either a real Redis server or the in-process
//! [`MemoryStore`].

use super::check_problem_id;
use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use async_trait::async_trait;
use futures::future::try_join_all;
use quizbank_core::ports::{
    AppealStore, GuildDataStore, ProblemStore, QuizSessionStore, QuizStore, StorageBackend,
    UserDataStore,
};
use quizbank_core::{
    from_json_str, to_json_string, Appeal, BackendKind, CacheError, CacheResult as Result, Dict,
    DictConvertible, GuildData, GuildScope, Limits, Problem, Quiz, QuizSolvingSession,
    RecordError, UserData,
};
use serde_json::Value;
use std::fmt::Display;
use std::time::Duration;

/// Outcome of a set-if-absent that also respects a per-pattern key ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CappedInsert {
    Inserted,
    Exists,
    Full,
}

/// Connection behind a [`KvBackend`].
#[derive(Clone)]
pub enum KvConnection {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl KvConnection {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            KvConnection::Redis(redis) => redis.get(key).await,
            KvConnection::Memory(memory) => Ok(memory.get(key)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        match self {
            KvConnection::Redis(redis) => redis.set(key, &value).await,
            KvConnection::Memory(memory) => {
                memory.set(key.to_string(), value);
                Ok(())
            }
        }
    }

    async fn set_nx(&self, key: &str, value: String) -> Result<bool> {
        match self {
            KvConnection::Redis(redis) => redis.set_nx(key, &value).await,
            KvConnection::Memory(memory) => Ok(memory.set_nx(key.to_string(), value)),
        }
    }

    /// Count keys matching `pattern` and `SET NX` in one atomic step.
    async fn insert_capped(
        &self,
        key: &str,
        value: String,
        pattern: &str,
        limit: usize,
    ) -> Result<CappedInsert> {
        match self {
            KvConnection::Redis(redis) => redis.insert_capped(key, &value, pattern, limit).await,
            KvConnection::Memory(memory) => {
                Ok(memory.insert_capped(key.to_string(), value, pattern, limit))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            KvConnection::Redis(redis) => redis.delete(key).await,
            KvConnection::Memory(memory) => Ok(memory.delete(key)),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        match self {
            KvConnection::Redis(redis) => redis.scan(pattern).await,
            KvConnection::Memory(memory) => Ok(memory.scan(pattern)),
        }
    }
}

fn record_key<T: DictConvertible>(scope: impl Display, id: impl Display) -> String {
    format!("{}:{}:{}", T::TYPE_NAME, scope, id)
}

fn global_key<T: DictConvertible>(id: impl Display) -> String {
    record_key::<T>(GuildScope::GLOBAL_KEY, id)
}

fn problem_key(guild: GuildScope, problem_id: i64) -> String {
    record_key::<Problem>(guild, problem_id)
}

fn decode<T: DictConvertible>(key: &str, text: &str) -> Result<T> {
    from_json_str(text).map_err(|e| match e {
        RecordError::Format { detail, .. } => CacheError::format(key, detail),
        other => other.into(),
    })
}

#[derive(Clone)]
pub struct KvBackend {
    conn: KvConnection,
    limits: Limits,
}

impl KvBackend {
    pub async fn connect_redis(url: &str, op_timeout: Duration, limits: Limits) -> Result<Self> {
        let redis = RedisStore::connect(url, op_timeout).await?;
        Ok(Self {
            conn: KvConnection::Redis(redis),
            limits,
        })
    }

    pub fn memory(limits: Limits) -> Self {
        Self::with_memory_store(MemoryStore::new(), limits)
    }

    /// Share an existing in-process store.
    pub fn with_memory_store(store: MemoryStore, limits: Limits) -> Self {
        Self {
            conn: KvConnection::Memory(store),
            limits,
        }
    }

    async fn fetch<T: DictConvertible>(&self, key: &str) -> Result<T> {
        match self.conn.get(key).await? {
            Some(text) => decode(key, &text),
            None => Err(CacheError::not_found(T::TYPE_NAME, key)),
        }
    }

    async fn fetch_all<T: DictConvertible>(&self, pattern: &str) -> Result<Vec<T>> {
        let keys = self.conn.scan(pattern).await?;
        let values = try_join_all(keys.iter().map(|key| self.conn.get(key))).await?;
        let mut records = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            // None: deleted between SCAN and GET.
            if let Some(text) = value {
                records.push(decode(key, &text)?);
            }
        }
        Ok(records)
    }

    async fn insert<T: DictConvertible>(&self, key: &str, record: &T) -> Result<()> {
        if !self.conn.set_nx(key, to_json_string(record)).await? {
            return Err(CacheError::already_exists(T::TYPE_NAME, key));
        }
        tracing::debug!("Added {}", key);
        Ok(())
    }

    async fn store<T: DictConvertible>(&self, key: &str, record: &T) -> Result<()> {
        self.conn.set(key, to_json_string(record)).await?;
        tracing::debug!("Stored {}", key);
        Ok(())
    }

    async fn delete(&self, what: &'static str, key: &str) -> Result<()> {
        if !self.conn.delete(key).await? {
            return Err(CacheError::not_found(what, key));
        }
        tracing::debug!("Removed {}", key);
        Ok(())
    }

    fn all_pattern<T: DictConvertible>() -> String {
        format!("{}:*", T::TYPE_NAME)
    }
}

#[async_trait]
impl ProblemStore for KvBackend {
    async fn get_problem(&self, guild: GuildScope, problem_id: i64) -> Result<Problem> {
        self.fetch(&problem_key(guild, problem_id)).await
    }

    async fn get_problems_by_guild(&self, guild: GuildScope) -> Result<Vec<Problem>> {
        let mut problems: Vec<Problem> = self
            .fetch_all(&record_key::<Problem>(guild, "*"))
            .await?;
        problems.sort_by_key(|p| p.id);
        Ok(problems)
    }

    async fn get_all_problems(&self) -> Result<Vec<Problem>> {
        let mut problems: Vec<Problem> = self.fetch_all(&Self::all_pattern::<Problem>()).await?;
        problems.sort_by_key(|p| (p.guild_id.to_string(), p.id));
        Ok(problems)
    }

    async fn add_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        check_problem_id(problem_id, problem)?;
        let key = problem_key(problem.guild_id, problem_id);
        if problem.guild_id.is_global() {
            return self.insert(&key, problem).await;
        }

        let outcome = self
            .conn
            .insert_capped(
                &key,
                to_json_string(problem),
                &record_key::<Problem>(problem.guild_id, "*"),
                self.limits.max_problems_per_guild,
            )
            .await?;
        match outcome {
            CappedInsert::Inserted => {
                tracing::debug!("Added {}", key);
                Ok(())
            }
            CappedInsert::Exists => Err(CacheError::already_exists(Problem::TYPE_NAME, key)),
            CappedInsert::Full => Err(CacheError::TooManyProblems {
                guild: problem.guild_id,
                limit: self.limits.max_problems_per_guild,
            }),
        }
    }

    async fn update_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        check_problem_id(problem_id, problem)?;
        self.store(&problem_key(problem.guild_id, problem_id), problem)
            .await
    }

    async fn remove_problem(&self, guild: GuildScope, problem_id: i64) -> Result<()> {
        self.delete(Problem::TYPE_NAME, &problem_key(guild, problem_id))
            .await
    }
}

#[async_trait]
impl QuizStore for KvBackend {
    async fn get_quiz(&self, quiz_id: i64) -> Result<Quiz> {
        self.fetch(&global_key::<Quiz>(quiz_id)).await
    }

    async fn get_quizzes_by_guild(&self, guild: GuildScope) -> Result<Vec<Quiz>> {
        let quizzes = self.get_all_quizzes().await?;
        Ok(quizzes
            .into_iter()
            .filter(|quiz| quiz.guild_id() == guild)
            .collect())
    }

    async fn get_all_quizzes(&self) -> Result<Vec<Quiz>> {
        let mut quizzes: Vec<Quiz> = self.fetch_all(&Self::all_pattern::<Quiz>()).await?;
        quizzes.sort_by_key(|q| q.id());
        Ok(quizzes)
    }

    async fn add_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.insert(&global_key::<Quiz>(quiz.id()), quiz).await
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.store(&global_key::<Quiz>(quiz.id()), quiz).await
    }

    async fn remove_quiz(&self, quiz_id: i64) -> Result<()> {
        self.delete(Quiz::TYPE_NAME, &global_key::<Quiz>(quiz_id))
            .await
    }
}

#[async_trait]
impl QuizSessionStore for KvBackend {
    async fn get_quiz_session(&self, session_id: &str) -> Result<QuizSolvingSession> {
        self.fetch(&global_key::<QuizSolvingSession>(session_id))
            .await
    }

    async fn get_quiz_sessions_by_user(&self, user_id: i64) -> Result<Vec<QuizSolvingSession>> {
        let sessions = self.get_all_quiz_sessions().await?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.user_id == user_id)
            .collect())
    }

    async fn get_all_quiz_sessions(&self) -> Result<Vec<QuizSolvingSession>> {
        let mut sessions: Vec<QuizSolvingSession> = self
            .fetch_all(&Self::all_pattern::<QuizSolvingSession>())
            .await?;
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    async fn add_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        self.insert(
            &global_key::<QuizSolvingSession>(&session.session_id),
            session,
        )
        .await
    }

    async fn update_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        self.store(
            &global_key::<QuizSolvingSession>(&session.session_id),
            session,
        )
        .await
    }

    async fn remove_quiz_session(&self, session_id: &str) -> Result<()> {
        self.delete(
            QuizSolvingSession::TYPE_NAME,
            &global_key::<QuizSolvingSession>(session_id),
        )
        .await
    }
}

#[async_trait]
impl UserDataStore for KvBackend {
    async fn get_user_data(&self, user_id: i64) -> Result<UserData> {
        self.fetch(&global_key::<UserData>(user_id)).await
    }

    async fn get_all_user_data(&self) -> Result<Vec<UserData>> {
        let mut users: Vec<UserData> = self.fetch_all(&Self::all_pattern::<UserData>()).await?;
        users.sort_by_key(|u| u.user_id);
        Ok(users)
    }

    async fn add_user_data(&self, data: &UserData) -> Result<()> {
        self.insert(&global_key::<UserData>(data.user_id), data)
            .await
    }

    async fn update_user_data(&self, data: &UserData) -> Result<()> {
        self.store(&global_key::<UserData>(data.user_id), data)
            .await
    }

    async fn remove_user_data(&self, user_id: i64) -> Result<()> {
        self.delete(UserData::TYPE_NAME, &global_key::<UserData>(user_id))
            .await
    }
}

#[async_trait]
impl GuildDataStore for KvBackend {
    async fn get_guild_data(&self, guild_id: i64) -> Result<GuildData> {
        self.fetch(&global_key::<GuildData>(guild_id)).await
    }

    async fn get_all_guild_data(&self) -> Result<Vec<GuildData>> {
        let mut guilds: Vec<GuildData> = self.fetch_all(&Self::all_pattern::<GuildData>()).await?;
        guilds.sort_by_key(|g| g.guild_id);
        Ok(guilds)
    }

    async fn add_guild_data(&self, data: &GuildData) -> Result<()> {
        self.insert(&global_key::<GuildData>(data.guild_id), data)
            .await
    }

    async fn update_guild_data(&self, data: &GuildData) -> Result<()> {
        self.store(&global_key::<GuildData>(data.guild_id), data)
            .await
    }

    async fn remove_guild_data(&self, guild_id: i64) -> Result<()> {
        self.delete(GuildData::TYPE_NAME, &global_key::<GuildData>(guild_id))
            .await
    }
}

#[async_trait]
impl AppealStore for KvBackend {
    async fn get_appeal(&self, special_id: i64) -> Result<Appeal> {
        self.fetch(&global_key::<Appeal>(special_id)).await
    }

    async fn get_appeals_by_user(&self, user_id: i64) -> Result<Vec<Appeal>> {
        let mut appeals: Vec<Appeal> = self
            .get_all_appeals()
            .await?
            .into_iter()
            .filter(|appeal| appeal.user_id == user_id)
            .collect();
        appeals.sort_by_key(|a| (a.appeal_num, a.special_id));
        Ok(appeals)
    }

    async fn get_all_appeals(&self) -> Result<Vec<Appeal>> {
        let mut appeals: Vec<Appeal> = self.fetch_all(&Self::all_pattern::<Appeal>()).await?;
        appeals.sort_by_key(|a| a.special_id);
        Ok(appeals)
    }

    async fn add_appeal(&self, appeal: &Appeal) -> Result<()> {
        self.insert(&global_key::<Appeal>(appeal.special_id), appeal)
            .await
    }

    async fn update_appeal(&self, appeal: &Appeal) -> Result<()> {
        self.store(&global_key::<Appeal>(appeal.special_id), appeal)
            .await
    }

    async fn remove_appeal(&self, special_id: i64) -> Result<()> {
        self.delete(Appeal::TYPE_NAME, &global_key::<Appeal>(special_id))
            .await
    }
}

#[async_trait]
impl StorageBackend for KvBackend {
    fn kind(&self) -> BackendKind {
        match self.conn {
            KvConnection::Redis(_) => BackendKind::Redis,
            KvConnection::Memory(_) => BackendKind::Memory,
        }
    }

    /// The query is a key glob; each row is `{"key": .., "value": ..}`.
    async fn run_raw_query(&self, query: &str) -> Result<Vec<Dict>> {
        tracing::info!("Scanning keys matching {}", query);
        let keys = self.conn.scan(query).await?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(text) = self.conn.get(&key).await? else {
                continue;
            };
            let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
            let mut row = Dict::new();
            row.insert("key".to_string(), Value::String(key));
            row.insert("value".to_string(), value);
            rows.push(row);
        }
        Ok(rows)
    }

    async fn bgsave(&self, schedule: bool) -> Result<()> {
        match &self.conn {
            KvConnection::Redis(redis) => redis.bgsave(schedule).await,
            KvConnection::Memory(_) => {
                tracing::debug!("In-memory store has nothing to save");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.bgsave(false).await {
            tracing::warn!("Background save on close failed: {}", e);
        }
        tracing::info!("Key-value backend closed");
        Ok(())
    }
}
