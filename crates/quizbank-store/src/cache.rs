//! Cache facade
//!
//! `ProblemCache` is the single entry point application code calls. It owns
//! the backend adapter and a fail-fast lock: while a maintenance operation
//! holds the lock, every mutating call returns `CacheError::Locked`
//! immediately. Reads never look at the lock.
//!
//! The lock is the write side of a `tokio::sync::RwLock<()>`. Every mutation
//! holds the read side across its backend I/O, so the lock can only be taken
//! once no mutation is in flight. Neither side ever waits: `try_lock` also
//! fails with `Locked` while mutations are running.

use crate::storage::open_backend;
use quizbank_core::{
    Appeal, BackendKind, CacheConfig, CacheError, CacheResult as Result, Dict, GuildData,
    GuildScope, Limits, Problem, ProblemEdit, Quiz, QuizDescription, QuizSolvingSession,
    SessionState, StorageBackend, UserData,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

/// Held while a maintenance operation runs. Dropping it releases the lock.
#[must_use = "the cache unlocks as soon as the guard is dropped"]
pub struct CacheLock<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        tracing::info!("Cache lock released");
    }
}

/// Held by a mutating call for its whole duration.
type MutationGuard<'a> = RwLockReadGuard<'a, ()>;

/// How `import_snapshot` treats records already in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Upsert snapshot records over the existing ones.
    Merge,
    /// Remove everything first, then write the snapshot.
    Replace,
}

/// Every record in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
    #[serde(default)]
    pub sessions: Vec<QuizSolvingSession>,
    #[serde(default)]
    pub users: Vec<UserData>,
    #[serde(default)]
    pub guilds: Vec<GuildData>,
    #[serde(default)]
    pub appeals: Vec<Appeal>,
}

impl CacheSnapshot {
    /// Total number of records.
    pub fn len(&self) -> usize {
        self.problems.len()
            + self.quizzes.len()
            + self.sessions.len()
            + self.users.len()
            + self.guilds.len()
            + self.appeals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identifiers of everything a user authored or owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorRecords {
    /// `(scope, problem id)` of standalone problems.
    pub problems: Vec<(GuildScope, i64)>,
    /// `(quiz id, problem id)` of problems embedded in quizzes.
    pub quiz_problems: Vec<(i64, i64)>,
    /// Quizzes listing the user among their authors.
    pub quizzes: Vec<i64>,
    /// Quizzes whose description names the user as author.
    pub descriptions: Vec<i64>,
    pub sessions: Vec<String>,
    /// Sessions that can no longer change (finished or overtime).
    pub submissions: Vec<String>,
    pub appeals: Vec<i64>,
}

impl AuthorRecords {
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
            && self.quiz_problems.is_empty()
            && self.quizzes.is_empty()
            && self.descriptions.is_empty()
            && self.sessions.is_empty()
            && self.appeals.is_empty()
    }
}

/// Use `default` in place of a `NotFound` error, when one was supplied.
fn or_default<T>(result: Result<T>, default: Option<T>) -> Result<T> {
    match (result, default) {
        (Err(e), Some(default)) if e.is_not_found() => Ok(default),
        (result, _) => result,
    }
}

fn check_cancelled(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::warn!("{} cancelled", operation);
        return Err(CacheError::Cancelled);
    }
    Ok(())
}

pub struct ProblemCache {
    backend: Box<dyn StorageBackend>,
    limits: Limits,
    gate: RwLock<()>,
}

impl ProblemCache {
    /// Open the configured backend.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        let backend = open_backend(&config.backend, config.limits).await?;
        Ok(Self::new(backend, config.limits))
    }

    pub fn new(backend: Box<dyn StorageBackend>, limits: Limits) -> Self {
        Self {
            backend,
            limits,
            gate: RwLock::new(()),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    // ----- Lock -----

    /// Take the lock without waiting. Fails with `Locked` if it is held or
    /// a mutation is still running.
    pub fn try_lock(&self) -> Result<CacheLock<'_>> {
        let guard = self.gate.try_write().map_err(|_| CacheError::Locked)?;
        tracing::info!("Cache lock acquired");
        Ok(CacheLock { _guard: guard })
    }

    pub fn is_locked(&self) -> bool {
        self.gate.try_read().is_err()
    }

    /// Fails with `Locked` while the lock is held. Keep the guard alive until
    /// the backend write has finished.
    fn begin_mutation(&self) -> Result<MutationGuard<'_>> {
        self.gate.try_read().map_err(|_| CacheError::Locked)
    }

    // ----- Problems -----

    pub async fn get_problem(&self, guild: GuildScope, problem_id: i64) -> Result<Problem> {
        self.backend.get_problem(guild, problem_id).await
    }

    pub async fn get_problems_by_guild(&self, guild: GuildScope) -> Result<Vec<Problem>> {
        self.backend.get_problems_by_guild(guild).await
    }

    pub async fn get_global_problems(&self) -> Result<Vec<Problem>> {
        self.backend.get_problems_by_guild(GuildScope::Global).await
    }

    pub async fn get_all_problems(&self) -> Result<Vec<Problem>> {
        self.backend.get_all_problems().await
    }

    pub async fn add_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        problem.validate(&self.limits)?;
        self.backend.add_problem(problem_id, problem).await
    }

    pub async fn update_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        problem.validate(&self.limits)?;
        self.backend.update_problem(problem_id, problem).await
    }

    /// Apply an edit to a stored problem and persist it.
    pub async fn edit_problem(
        &self,
        guild: GuildScope,
        problem_id: i64,
        edit: ProblemEdit,
    ) -> Result<Problem> {
        let _mutation = self.begin_mutation()?;
        let mut problem = self.backend.get_problem(guild, problem_id).await?;
        problem.edit(edit, &self.limits)?;
        self.backend.update_problem(problem_id, &problem).await?;
        Ok(problem)
    }

    pub async fn remove_problem(&self, guild: GuildScope, problem_id: i64) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_problem(guild, problem_id).await
    }

    /// Record a vote. Returns false if the user had already voted.
    pub async fn vote(&self, guild: GuildScope, problem_id: i64, voter: i64) -> Result<bool> {
        let _mutation = self.begin_mutation()?;
        let mut problem = self.backend.get_problem(guild, problem_id).await?;
        if !problem.add_voter(voter) {
            return Ok(false);
        }
        self.backend.update_problem(problem_id, &problem).await?;
        tracing::debug!("User {} voted for problem {}:{}", voter, guild, problem_id);
        Ok(true)
    }

    /// Grade `answer` and remember the solver when it is correct.
    pub async fn record_solver(
        &self,
        guild: GuildScope,
        problem_id: i64,
        solver: i64,
        answer: &str,
    ) -> Result<bool> {
        let _mutation = self.begin_mutation()?;
        let mut problem = self.backend.get_problem(guild, problem_id).await?;
        if !problem.check_answer(answer) {
            return Ok(false);
        }
        if problem.add_solver(solver) {
            self.backend.update_problem(problem_id, &problem).await?;
        }
        Ok(true)
    }

    // ----- Quizzes -----

    pub async fn get_quiz(&self, quiz_id: i64) -> Result<Quiz> {
        self.backend.get_quiz(quiz_id).await
    }

    pub async fn get_quiz_description(&self, quiz_id: i64) -> Result<QuizDescription> {
        Ok(self.backend.get_quiz(quiz_id).await?.description().clone())
    }

    pub async fn get_quizzes_by_guild(&self, guild: GuildScope) -> Result<Vec<Quiz>> {
        self.backend.get_quizzes_by_guild(guild).await
    }

    pub async fn get_all_quizzes(&self) -> Result<Vec<Quiz>> {
        self.backend.get_all_quizzes().await
    }

    pub async fn add_quiz(&self, quiz: &Quiz) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        quiz.validate(&self.limits)?;
        self.backend.add_quiz(quiz).await
    }

    pub async fn update_quiz(&self, quiz: &Quiz) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        quiz.validate(&self.limits)?;
        self.backend.update_quiz(quiz).await
    }

    pub async fn remove_quiz(&self, quiz_id: i64) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_quiz(quiz_id).await
    }

    // ----- Quiz sessions -----

    pub async fn get_quiz_session(&self, session_id: &str) -> Result<QuizSolvingSession> {
        self.backend.get_quiz_session(session_id).await
    }

    pub async fn get_quiz_sessions_by_user(&self, user_id: i64) -> Result<Vec<QuizSolvingSession>> {
        self.backend.get_quiz_sessions_by_user(user_id).await
    }

    pub async fn get_all_quiz_sessions(&self) -> Result<Vec<QuizSolvingSession>> {
        self.backend.get_all_quiz_sessions().await
    }

    pub async fn add_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.add_quiz_session(session).await
    }

    pub async fn update_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.update_quiz_session(session).await
    }

    pub async fn remove_quiz_session(&self, session_id: &str) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_quiz_session(session_id).await
    }

    // ----- User data -----

    /// `default` is returned only when the user has no record.
    pub async fn get_user_data(&self, user_id: i64, default: Option<UserData>) -> Result<UserData> {
        or_default(self.backend.get_user_data(user_id).await, default)
    }

    pub async fn get_user_data_or_default(&self, user_id: i64) -> Result<UserData> {
        self.get_user_data(user_id, Some(UserData::default_for(user_id)))
            .await
    }

    pub async fn get_all_user_data(&self) -> Result<Vec<UserData>> {
        self.backend.get_all_user_data().await
    }

    pub async fn add_user_data(&self, data: &UserData) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.add_user_data(data).await
    }

    pub async fn update_user_data(&self, data: &UserData) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.update_user_data(data).await
    }

    pub async fn remove_user_data(&self, user_id: i64) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_user_data(user_id).await
    }

    // ----- Guild data -----

    pub async fn get_guild_data(
        &self,
        guild_id: i64,
        default: Option<GuildData>,
    ) -> Result<GuildData> {
        or_default(self.backend.get_guild_data(guild_id).await, default)
    }

    pub async fn get_guild_data_or_default(&self, guild_id: i64) -> Result<GuildData> {
        self.get_guild_data(guild_id, Some(GuildData::default_for(guild_id)))
            .await
    }

    pub async fn get_all_guild_data(&self) -> Result<Vec<GuildData>> {
        self.backend.get_all_guild_data().await
    }

    pub async fn add_guild_data(&self, data: &GuildData) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.add_guild_data(data).await
    }

    pub async fn update_guild_data(&self, data: &GuildData) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.update_guild_data(data).await
    }

    pub async fn remove_guild_data(&self, guild_id: i64) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_guild_data(guild_id).await
    }

    // ----- Appeals -----

    pub async fn get_appeal(&self, special_id: i64, default: Option<Appeal>) -> Result<Appeal> {
        or_default(self.backend.get_appeal(special_id).await, default)
    }

    pub async fn get_appeals_by_user(&self, user_id: i64) -> Result<Vec<Appeal>> {
        self.backend.get_appeals_by_user(user_id).await
    }

    pub async fn get_all_appeals(&self) -> Result<Vec<Appeal>> {
        self.backend.get_all_appeals().await
    }

    pub async fn add_appeal(&self, appeal: &Appeal) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.add_appeal(appeal).await
    }

    pub async fn update_appeal(&self, appeal: &Appeal) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.update_appeal(appeal).await
    }

    pub async fn remove_appeal(&self, special_id: i64) -> Result<()> {
        let _mutation = self.begin_mutation()?;
        self.backend.remove_appeal(special_id).await
    }

    // ----- Administration -----

    /// Check `(field, required value)` pairs against the user's record, or
    /// the default record when the user is unknown.
    pub async fn user_meets_permissions_required<'a, I>(
        &self,
        user_id: i64,
        requirements: I,
    ) -> Result<bool>
    where
        I: IntoIterator<Item = (&'a str, bool)> + Send,
    {
        let user = self.get_user_data_or_default(user_id).await?;
        Ok(user.meets(requirements))
    }

    /// Backend-native query. Counted as a mutation since it may write.
    pub async fn run_raw_query(&self, query: &str) -> Result<Vec<Dict>> {
        let _mutation = self.begin_mutation()?;
        self.backend.run_raw_query(query).await
    }

    /// Remove every global problem with at least `threshold` votes.
    /// Returns the ids removed.
    pub async fn apply_vote_threshold(&self, threshold: usize) -> Result<Vec<i64>> {
        self.apply_vote_threshold_until_cancelled(threshold, &CancellationToken::new())
            .await
    }

    pub async fn apply_default_vote_threshold(&self) -> Result<Vec<i64>> {
        self.apply_vote_threshold(self.limits.default_vote_threshold)
            .await
    }

    /// Like [`apply_vote_threshold`](Self::apply_vote_threshold), checking
    /// `cancel` before each problem. Problems removed before cancellation
    /// stay removed.
    pub async fn apply_vote_threshold_until_cancelled(
        &self,
        threshold: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>> {
        if threshold < 1 {
            return Err(CacheError::InvalidInput(
                "vote threshold must be at least 1".to_string(),
            ));
        }
        let _lock = self.try_lock()?;
        tracing::info!("Applying vote threshold {} to global problems", threshold);

        let problems = self.backend.get_problems_by_guild(GuildScope::Global).await?;
        let mut removed = Vec::new();
        for problem in problems {
            check_cancelled(cancel, "Vote threshold sweep")?;
            if problem.num_voters() >= threshold {
                self.backend
                    .remove_problem(GuildScope::Global, problem.id)
                    .await?;
                removed.push(problem.id);
            }
        }

        tracing::info!("Vote threshold sweep removed {} problems", removed.len());
        Ok(removed)
    }

    /// Identifiers of every record the user authored or owns. A record that
    /// fails to parse aborts the scan.
    pub async fn get_all_by_author_id(&self, user_id: i64) -> Result<AuthorRecords> {
        let mut records = AuthorRecords::default();

        for problem in self.backend.get_all_problems().await? {
            if problem.is_author(user_id) {
                records.problems.push(problem.key());
            }
        }

        for quiz in self.backend.get_all_quizzes().await? {
            if quiz.authors().contains(&user_id) {
                records.quizzes.push(quiz.id());
            }
            if quiz.description().author == user_id {
                records.descriptions.push(quiz.id());
            }
            for problem in quiz.problems() {
                if problem.is_author(user_id) {
                    records.quiz_problems.push((quiz.id(), problem.id));
                }
            }
        }

        for session in self.backend.get_quiz_sessions_by_user(user_id).await? {
            if session.state() != SessionState::Active {
                records.submissions.push(session.session_id.clone());
            }
            records.sessions.push(session.session_id);
        }

        records.appeals = self
            .backend
            .get_appeals_by_user(user_id)
            .await?
            .into_iter()
            .map(|appeal| appeal.special_id)
            .collect();

        Ok(records)
    }

    // ----- Snapshots -----

    pub async fn export_snapshot(&self) -> Result<CacheSnapshot> {
        self.export_snapshot_until_cancelled(&CancellationToken::new())
            .await
    }

    /// Read every record while holding the lock.
    pub async fn export_snapshot_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CacheSnapshot> {
        let _lock = self.try_lock()?;
        tracing::info!("Exporting cache snapshot");

        let mut snapshot = CacheSnapshot::default();
        check_cancelled(cancel, "Export")?;
        snapshot.problems = self.backend.get_all_problems().await?;
        check_cancelled(cancel, "Export")?;
        snapshot.quizzes = self.backend.get_all_quizzes().await?;
        check_cancelled(cancel, "Export")?;
        snapshot.sessions = self.backend.get_all_quiz_sessions().await?;
        check_cancelled(cancel, "Export")?;
        snapshot.users = self.backend.get_all_user_data().await?;
        check_cancelled(cancel, "Export")?;
        snapshot.guilds = self.backend.get_all_guild_data().await?;
        check_cancelled(cancel, "Export")?;
        snapshot.appeals = self.backend.get_all_appeals().await?;

        tracing::info!("Exported {} records", snapshot.len());
        Ok(snapshot)
    }

    pub async fn import_snapshot(&self, snapshot: &CacheSnapshot, mode: ImportMode) -> Result<usize> {
        self.import_snapshot_until_cancelled(snapshot, mode, &CancellationToken::new())
            .await
    }

    /// Write a snapshot while holding the lock. Every record is validated
    /// before anything is written. Returns the number of records written.
    pub async fn import_snapshot_until_cancelled(
        &self,
        snapshot: &CacheSnapshot,
        mode: ImportMode,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        for problem in &snapshot.problems {
            problem.validate(&self.limits)?;
        }
        for quiz in &snapshot.quizzes {
            quiz.validate(&self.limits)?;
        }

        let _lock = self.try_lock()?;
        tracing::info!(
            "Importing {} records ({:?})",
            snapshot.len(),
            mode
        );

        if mode == ImportMode::Replace {
            self.clear_all(cancel).await?;
        }

        let mut written = 0;
        for problem in &snapshot.problems {
            check_cancelled(cancel, "Import")?;
            self.backend.update_problem(problem.id, problem).await?;
            written += 1;
        }
        for quiz in &snapshot.quizzes {
            check_cancelled(cancel, "Import")?;
            self.backend.update_quiz(quiz).await?;
            written += 1;
        }
        for session in &snapshot.sessions {
            check_cancelled(cancel, "Import")?;
            self.backend.update_quiz_session(session).await?;
            written += 1;
        }
        for user in &snapshot.users {
            check_cancelled(cancel, "Import")?;
            self.backend.update_user_data(user).await?;
            written += 1;
        }
        for guild in &snapshot.guilds {
            check_cancelled(cancel, "Import")?;
            self.backend.update_guild_data(guild).await?;
            written += 1;
        }
        for appeal in &snapshot.appeals {
            check_cancelled(cancel, "Import")?;
            self.backend.update_appeal(appeal).await?;
            written += 1;
        }

        tracing::info!("Imported {} records", written);
        Ok(written)
    }

    /// Remove every record. Caller holds the lock.
    async fn clear_all(&self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!("Clearing cache before import");
        for problem in self.backend.get_all_problems().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_problem(problem.guild_id, problem.id).await?;
        }
        for quiz in self.backend.get_all_quizzes().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_quiz(quiz.id()).await?;
        }
        for session in self.backend.get_all_quiz_sessions().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_quiz_session(&session.session_id).await?;
        }
        for user in self.backend.get_all_user_data().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_user_data(user.user_id).await?;
        }
        for guild in self.backend.get_all_guild_data().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_guild_data(guild.guild_id).await?;
        }
        for appeal in self.backend.get_all_appeals().await? {
            check_cancelled(cancel, "Clear")?;
            self.backend.remove_appeal(appeal.special_id).await?;
        }
        Ok(())
    }

    // ----- Background save -----

    /// Fails with `Unsupported` on SQL backends.
    pub async fn bgsave(&self, schedule: bool) -> Result<()> {
        self.backend.bgsave(schedule).await
    }

    /// Request a background save, logging instead of failing. Returns
    /// whether a save was issued.
    pub async fn bgsave_best_effort(&self, schedule: bool) -> bool {
        match self.backend.bgsave(schedule).await {
            Ok(()) => true,
            Err(CacheError::Unsupported { backend, .. }) => {
                tracing::debug!("Background save skipped: {} writes are durable", backend);
                false
            }
            Err(e) => {
                tracing::warn!("Background save failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvBackend, MemoryStore, SqliteBackend};
    use quizbank_core::{AppealType, ProblemKind};
    use std::sync::Arc;

    async fn caches(limits: Limits) -> Vec<ProblemCache> {
        let sqlite = SqliteBackend::open(crate::storage::sqlite::MEMORY_PATH, limits)
            .await
            .unwrap();
        vec![
            ProblemCache::new(Box::new(sqlite), limits),
            ProblemCache::new(Box::new(KvBackend::memory(limits)), limits),
        ]
    }

    fn problem(guild: GuildScope, id: i64, author: i64) -> Problem {
        Problem::new(
            id,
            guild,
            format!("What is {} + {}?", id, id),
            vec![(id * 2).to_string()],
            author,
            ProblemKind::Basic,
            &Limits::default(),
        )
        .unwrap()
    }

    fn quiz(id: i64, author: i64) -> Quiz {
        let description =
            QuizDescription::new(id, author, GuildScope::Guild(1)).with_time_limit(30);
        Quiz::new(
            id,
            vec![author],
            vec![problem(GuildScope::Guild(1), 2, author), problem(GuildScope::Guild(1), 1, 99)],
            description,
            &Limits::default(),
        )
        .unwrap()
    }

    fn appeal(special_id: i64, user_id: i64) -> Appeal {
        Appeal {
            special_id,
            user_id,
            appeal_type: AppealType::BlacklistAppeal,
            appeal_msg: "please".to_string(),
            timestamp: 1_700_000_000,
            appeal_num: 1,
        }
    }

    #[tokio::test]
    async fn test_records_round_trip_through_every_backend() {
        for cache in caches(Limits::default()).await {
            let p = problem(GuildScope::Guild(3), 1, 7);
            let q = quiz(10, 7);
            let session = QuizSolvingSession::start(7, q.description(), 1, chrono::Utc::now());
            let user = UserData {
                user_id: 7,
                trusted: true,
                blacklisted: false,
            };
            let guild = GuildData::default_for(3);
            let a = appeal(5, 7);

            cache.add_problem(1, &p).await.unwrap();
            cache.add_quiz(&q).await.unwrap();
            cache.add_quiz_session(&session).await.unwrap();
            cache.add_user_data(&user).await.unwrap();
            cache.add_guild_data(&guild).await.unwrap();
            cache.add_appeal(&a).await.unwrap();

            assert_eq!(cache.get_problem(GuildScope::Guild(3), 1).await.unwrap(), p);
            assert_eq!(cache.get_quiz(10).await.unwrap(), q);
            assert_eq!(
                cache.get_quiz_session(&session.session_id).await.unwrap(),
                session
            );
            assert_eq!(cache.get_user_data(7, None).await.unwrap(), user);
            assert_eq!(cache.get_guild_data(3, None).await.unwrap(), guild);
            assert_eq!(cache.get_appeal(5, None).await.unwrap(), a);
        }
    }

    #[tokio::test]
    async fn test_uniqueness_invariant() {
        for cache in caches(Limits::default()).await {
            let guild = GuildScope::Guild(1);
            cache.add_problem(1, &problem(guild, 1, 7)).await.unwrap();
            assert!(matches!(
                cache.add_problem(1, &problem(guild, 1, 8)).await,
                Err(CacheError::AlreadyExists { .. })
            ));
            assert!(matches!(
                cache.add_problem(2, &problem(guild, 3, 7)).await,
                Err(CacheError::IdMismatch {
                    requested_id: 2,
                    record_id: 3
                })
            ));
            cache.remove_problem(guild, 1).await.unwrap();
            cache.add_problem(1, &problem(guild, 1, 8)).await.unwrap();

            let problems = cache.get_problems_by_guild(guild).await.unwrap();
            assert_eq!(problems.len(), 1);
            assert_eq!(problems[0].author, 8);
        }
    }

    #[tokio::test]
    async fn test_capacity_invariant() {
        let limits = Limits {
            max_problems_per_guild: 3,
            ..Limits::default()
        };
        for cache in caches(limits).await {
            let guild = GuildScope::Guild(4);
            for id in 1..=3 {
                cache.add_problem(id, &problem(guild, id, 7)).await.unwrap();
            }
            let err = cache.add_problem(4, &problem(guild, 4, 7)).await.unwrap_err();
            assert!(matches!(err, CacheError::TooManyProblems { limit: 3, .. }));
            assert_eq!(err.kind(), quizbank_core::ErrorKind::DuplicateOrCapacity);
            assert_eq!(cache.get_problems_by_guild(guild).await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_capacity() {
        let limits = Limits {
            max_problems_per_guild: 1,
            ..Limits::default()
        };
        for cache in caches(limits).await {
            let guild = GuildScope::Guild(7);
            let (p1, p2) = (problem(guild, 1, 7), problem(guild, 2, 7));
            let (a, b) = tokio::join!(
                cache.add_problem(1, &p1),
                cache.add_problem(2, &p2)
            );
            assert!(a.is_ok() != b.is_ok());
            assert!(matches!(
                a.and(b),
                Err(CacheError::TooManyProblems { limit: 1, .. })
            ));
            assert_eq!(cache.get_problems_by_guild(guild).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_add_problem_checks_limits() {
        let limits = Limits {
            max_question_length: 10,
            ..Limits::default()
        };
        for cache in caches(limits).await {
            let long = problem(GuildScope::Global, 1, 7);
            assert!(matches!(
                cache.add_problem(1, &long).await,
                Err(CacheError::Record(_))
            ));
            assert!(cache.get_all_problems().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        for cache in caches(Limits::default()).await {
            let guild = GuildScope::Global;
            let q = quiz(10, 7);
            let session = QuizSolvingSession::start(7, q.description(), 1, chrono::Utc::now());
            cache.add_problem(1, &problem(guild, 1, 7)).await.unwrap();
            cache.add_quiz(&q).await.unwrap();
            cache.add_user_data(&UserData::default_for(7)).await.unwrap();

            let lock = cache.try_lock().unwrap();
            assert!(cache.is_locked());
            assert!(matches!(cache.try_lock(), Err(CacheError::Locked)));

            let locked = |r: Result<()>| matches!(r, Err(CacheError::Locked));
            assert!(locked(cache.add_problem(2, &problem(guild, 2, 7)).await));
            assert!(locked(cache.update_problem(1, &problem(guild, 1, 8)).await));
            assert!(locked(cache.remove_problem(guild, 1).await));
            assert!(locked(cache.add_quiz(&quiz(11, 7)).await));
            assert!(locked(cache.update_quiz(&q).await));
            assert!(locked(cache.remove_quiz(10).await));
            assert!(locked(cache.add_quiz_session(&session).await));
            assert!(locked(cache.update_quiz_session(&session).await));
            assert!(locked(cache.remove_quiz_session(&session.session_id).await));
            assert!(locked(cache.add_user_data(&UserData::default_for(8)).await));
            assert!(locked(cache.update_user_data(&UserData::default_for(7)).await));
            assert!(locked(cache.remove_user_data(7).await));
            assert!(locked(cache.add_guild_data(&GuildData::default_for(1)).await));
            assert!(locked(cache.update_guild_data(&GuildData::default_for(1)).await));
            assert!(locked(cache.remove_guild_data(1).await));
            assert!(locked(cache.add_appeal(&appeal(1, 7)).await));
            assert!(locked(cache.update_appeal(&appeal(1, 7)).await));
            assert!(locked(cache.remove_appeal(1).await));
            assert!(matches!(cache.vote(guild, 1, 5).await, Err(CacheError::Locked)));
            assert!(matches!(
                cache.record_solver(guild, 1, 5, "2").await,
                Err(CacheError::Locked)
            ));
            assert!(matches!(
                cache.apply_vote_threshold(1).await,
                Err(CacheError::Locked)
            ));
            assert!(matches!(cache.export_snapshot().await, Err(CacheError::Locked)));

            // Reads still work.
            assert_eq!(cache.get_problem(guild, 1).await.unwrap().author, 7);
            assert_eq!(cache.get_all_problems().await.unwrap().len(), 1);
            assert_eq!(cache.get_quiz(10).await.unwrap(), q);
            assert!(cache.get_user_data(7, None).await.is_ok());
            assert!(cache.get_all_appeals().await.unwrap().is_empty());

            drop(lock);
            assert!(!cache.is_locked());
            cache.add_problem(2, &problem(guild, 2, 7)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_lock_and_mutations_exclude_each_other() {
        for cache in caches(Limits::default()).await {
            let mutation = cache.begin_mutation().unwrap();
            assert!(!cache.is_locked());
            assert!(matches!(cache.try_lock(), Err(CacheError::Locked)));
            assert!(matches!(
                cache.apply_vote_threshold(1).await,
                Err(CacheError::Locked)
            ));
            drop(mutation);

            let lock = cache.try_lock().unwrap();
            assert!(matches!(cache.begin_mutation(), Err(CacheError::Locked)));
            drop(lock);
            assert!(cache.begin_mutation().is_ok());
        }
    }

    #[tokio::test]
    async fn test_vote_in_flight_never_commits_under_lock() {
        for cache in caches(Limits::default()).await {
            let cache = Arc::new(cache);
            let guild = GuildScope::Global;
            cache.add_problem(1, &problem(guild, 1, 7)).await.unwrap();

            let voting = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.vote(guild, 1, 42).await })
            };
            tokio::task::yield_now().await;

            match cache.try_lock() {
                Ok(lock) => {
                    let before = cache.get_problem(guild, 1).await.unwrap().voters;
                    let vote = voting.await.unwrap();
                    let after = cache.get_problem(guild, 1).await.unwrap().voters;
                    assert_eq!(before, after);
                    if before.is_empty() {
                        assert!(matches!(vote, Err(CacheError::Locked)));
                    }
                    drop(lock);
                }
                Err(CacheError::Locked) => {
                    assert!(voting.await.unwrap().unwrap());
                    assert_eq!(cache.get_problem(guild, 1).await.unwrap().voters, vec![42]);
                    drop(cache.try_lock().unwrap());
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            };
        }
    }

    #[tokio::test]
    async fn test_sweep_and_vote_do_not_interleave() {
        for cache in caches(Limits::default()).await {
            let cache = Arc::new(cache);
            let guild = GuildScope::Global;
            let mut p = problem(guild, 1, 7);
            p.add_voter(1);
            cache.add_problem(1, &p).await.unwrap();

            let voting = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.vote(guild, 1, 2).await })
            };
            let sweeping = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.apply_vote_threshold(1).await })
            };
            let vote = voting.await.unwrap();
            match sweeping.await.unwrap() {
                // A swept problem must stay gone.
                Ok(removed) => {
                    assert_eq!(removed, vec![1]);
                    assert!(cache.get_problem(guild, 1).await.unwrap_err().is_not_found());
                    assert!(matches!(
                        vote,
                        Ok(true) | Err(CacheError::Locked) | Err(CacheError::NotFound { .. })
                    ));
                }
                Err(CacheError::Locked) => {
                    assert!(vote.unwrap());
                    assert_eq!(cache.get_problem(guild, 1).await.unwrap().num_voters(), 2);
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
            assert!(!cache.is_locked());
        }
    }

    #[tokio::test]
    async fn test_threshold_sweep() {
        for cache in caches(Limits::default()).await {
            for (id, votes) in [(1, 0), (2, 2), (3, 5), (4, 5), (5, 9)] {
                let mut p = problem(GuildScope::Global, id, 7);
                for voter in 0..votes {
                    p.add_voter(voter);
                }
                cache.add_problem(id, &p).await.unwrap();
            }
            // Guild problems are never swept.
            let mut guild_problem = problem(GuildScope::Guild(1), 6, 7);
            for voter in 0..9 {
                guild_problem.add_voter(voter);
            }
            cache.add_problem(6, &guild_problem).await.unwrap();

            let mut removed = cache.apply_vote_threshold(5).await.unwrap();
            removed.sort();
            assert_eq!(removed, vec![3, 4, 5]);

            let counts: Vec<usize> = cache
                .get_global_problems()
                .await
                .unwrap()
                .iter()
                .map(Problem::num_voters)
                .collect();
            assert_eq!(counts, vec![0, 2]);
            assert!(cache.get_problem(GuildScope::Guild(1), 6).await.is_ok());
            assert!(!cache.is_locked());
        }
    }

    #[tokio::test]
    async fn test_threshold_rejects_zero() {
        for cache in caches(Limits::default()).await {
            assert!(matches!(
                cache.apply_vote_threshold(0).await,
                Err(CacheError::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_threshold_cancellation_releases_lock() {
        for cache in caches(Limits::default()).await {
            let mut p = problem(GuildScope::Global, 1, 7);
            p.add_voter(1);
            cache.add_problem(1, &p).await.unwrap();

            let cancel = CancellationToken::new();
            cancel.cancel();
            assert!(matches!(
                cache.apply_vote_threshold_until_cancelled(1, &cancel).await,
                Err(CacheError::Cancelled)
            ));
            assert!(!cache.is_locked());
            assert_eq!(cache.get_global_problems().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_vote_and_record_solver() {
        for cache in caches(Limits::default()).await {
            let guild = GuildScope::Guild(2);
            cache.add_problem(3, &problem(guild, 3, 7)).await.unwrap();

            assert!(cache.vote(guild, 3, 11).await.unwrap());
            assert!(!cache.vote(guild, 3, 11).await.unwrap());
            assert!(!cache.record_solver(guild, 3, 12, "5").await.unwrap());
            assert!(cache.record_solver(guild, 3, 12, "6").await.unwrap());

            let stored = cache.get_problem(guild, 3).await.unwrap();
            assert_eq!(stored.voters, vec![11]);
            assert_eq!(stored.solvers, vec![12]);
            assert!(cache.vote(guild, 99, 11).await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_edit_problem() {
        for cache in caches(Limits::default()).await {
            let guild = GuildScope::Global;
            cache.add_problem(1, &problem(guild, 1, 7)).await.unwrap();
            let edited = cache
                .edit_problem(
                    guild,
                    1,
                    ProblemEdit {
                        question: Some("What is 3?".into()),
                        answers: None,
                    },
                )
                .await
                .unwrap();
            assert_eq!(edited.question, "What is 3?");
            assert_eq!(cache.get_problem(guild, 1).await.unwrap(), edited);
        }
    }

    #[tokio::test]
    async fn test_defaults_only_on_not_found() {
        for cache in caches(Limits::default()).await {
            assert!(cache.get_user_data(1, None).await.unwrap_err().is_not_found());
            assert_eq!(
                cache.get_user_data_or_default(1).await.unwrap(),
                UserData::default_for(1)
            );
            assert_eq!(
                cache.get_guild_data_or_default(2).await.unwrap(),
                GuildData::default_for(2)
            );
            let fallback = appeal(9, 1);
            assert_eq!(
                cache.get_appeal(9, Some(fallback.clone())).await.unwrap(),
                fallback
            );
            assert_eq!(
                cache.get_quiz_description(10).await.unwrap_err().kind(),
                quizbank_core::ErrorKind::NotFound
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_not_defaulted() {
        let store = MemoryStore::new();
        let cache = ProblemCache::new(
            Box::new(KvBackend::with_memory_store(store.clone(), Limits::default())),
            Limits::default(),
        );
        store.set("UserData:global:1".into(), "{\"user_id\": 1}".into());

        assert!(matches!(
            cache.get_user_data_or_default(1).await,
            Err(CacheError::Format { .. })
        ));
        assert!(matches!(
            cache.get_all_by_author_id(1).await,
            Ok(_)
        ));

        store.set("Problem:global:4".into(), "[1, 2]".into());
        assert!(matches!(
            cache.get_all_by_author_id(1).await,
            Err(CacheError::Format { .. })
        ));
    }

    #[tokio::test]
    async fn test_permissions() {
        for cache in caches(Limits::default()).await {
            cache
                .add_user_data(&UserData {
                    user_id: 1,
                    trusted: true,
                    blacklisted: false,
                })
                .await
                .unwrap();

            assert!(cache
                .user_meets_permissions_required(1, [("trusted", true), ("blacklisted", false)])
                .await
                .unwrap());
            assert!(!cache
                .user_meets_permissions_required(2, [("trusted", true)])
                .await
                .unwrap());
            assert!(cache
                .user_meets_permissions_required(2, [("blacklisted", false)])
                .await
                .unwrap());
            assert!(!cache
                .user_meets_permissions_required(1, [("moderator", true)])
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_author_lookup() {
        for cache in caches(Limits::default()).await {
            cache.add_problem(1, &problem(GuildScope::Global, 1, 7)).await.unwrap();
            cache.add_problem(2, &problem(GuildScope::Guild(5), 2, 8)).await.unwrap();
            cache.add_quiz(&quiz(10, 7)).await.unwrap();
            cache.add_appeal(&appeal(3, 7)).await.unwrap();
            cache.add_appeal(&appeal(4, 8)).await.unwrap();

            let description = cache.get_quiz_description(10).await.unwrap();
            let mut done = QuizSolvingSession::start(7, &description, 1, chrono::Utc::now());
            done.is_finished = true;
            let open = QuizSolvingSession::start(7, &description.with_time_limit(3600), 2, chrono::Utc::now());
            cache.add_quiz_session(&done).await.unwrap();
            cache.add_quiz_session(&open).await.unwrap();

            let records = cache.get_all_by_author_id(7).await.unwrap();
            assert_eq!(records.problems, vec![(GuildScope::Global, 1)]);
            assert_eq!(records.quiz_problems, vec![(10, 2)]);
            assert_eq!(records.quizzes, vec![10]);
            assert_eq!(records.descriptions, vec![10]);
            assert_eq!(records.sessions.len(), 2);
            assert_eq!(records.submissions, vec![done.session_id.clone()]);
            assert_eq!(records.appeals, vec![3]);

            assert!(cache.get_all_by_author_id(1234).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_snapshot_replace_and_merge() {
        let mut caches = caches(Limits::default()).await;
        let target = caches.pop().unwrap();
        let source = caches.pop().unwrap();

        source.add_problem(1, &problem(GuildScope::Global, 1, 7)).await.unwrap();
        source.add_quiz(&quiz(10, 7)).await.unwrap();
        source.add_user_data(&UserData::default_for(7)).await.unwrap();
        source.add_guild_data(&GuildData::default_for(1)).await.unwrap();
        source.add_appeal(&appeal(3, 7)).await.unwrap();
        let snapshot = source.export_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 5);
        assert!(!source.is_locked());

        target.add_problem(9, &problem(GuildScope::Global, 9, 8)).await.unwrap();
        assert_eq!(target.import_snapshot(&snapshot, ImportMode::Merge).await.unwrap(), 5);
        assert_eq!(target.get_global_problems().await.unwrap().len(), 2);

        assert_eq!(target.import_snapshot(&snapshot, ImportMode::Replace).await.unwrap(), 5);
        assert_eq!(target.export_snapshot().await.unwrap(), snapshot);

        // JSON is the on-disk format.
        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: CacheSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[tokio::test]
    async fn test_import_while_locked_fails_fast() {
        for cache in caches(Limits::default()).await {
            let _lock = cache.try_lock().unwrap();
            assert!(matches!(
                cache.import_snapshot(&CacheSnapshot::default(), ImportMode::Merge).await,
                Err(CacheError::Locked)
            ));
        }
    }

    #[tokio::test]
    async fn test_bgsave_dispatch() {
        let mut caches = caches(Limits::default()).await;
        let kv = caches.pop().unwrap();
        let sqlite = caches.pop().unwrap();

        kv.bgsave(false).await.unwrap();
        assert!(kv.bgsave_best_effort(true).await);

        let err = sqlite.bgsave(false).await.unwrap_err();
        assert_eq!(err.kind(), quizbank_core::ErrorKind::Unsupported);
        // Best effort never fails the caller.
        assert!(!sqlite.bgsave_best_effort(false).await);
        sqlite.add_user_data(&UserData::default_for(1)).await.unwrap();
    }
}
