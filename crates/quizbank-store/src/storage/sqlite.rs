//! SQLite backend (embedded)

use super::sql::{
    capped_insert_sql, decode_all, insert_sql, map_insert_error, map_sqlx_error, upsert_sql,
    AppealRow, GuildRow, ProblemRow, QuizRow, SessionRow, UserRow, APPEAL_COLUMNS, GUILD_COLUMNS,
    PROBLEM_COLUMNS, QUIZ_COLUMNS, SESSION_COLUMNS, SQLITE_PARAM as PARAM, USER_COLUMNS,
};
use super::check_problem_id;
use async_trait::async_trait;
use quizbank_core::ports::{
    AppealStore, GuildDataStore, ProblemStore, QuizSessionStore, QuizStore, StorageBackend,
    UserDataStore,
};
use quizbank_core::{
    Appeal, BackendKind, CacheError, CacheResult as Result, Dict, GuildData, GuildScope, Limits,
    Problem, Quiz, QuizSolvingSession, UserData,
};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row, SqlitePool, TypeInfo};
use std::str::FromStr;

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS problems (
        guild_id TEXT NOT NULL,
        problem_id INTEGER NOT NULL,
        question TEXT NOT NULL,
        answers TEXT NOT NULL,
        author INTEGER NOT NULL,
        voters TEXT NOT NULL,
        solvers TEXT NOT NULL,
        problem_type TEXT NOT NULL,
        extra TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (guild_id, problem_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quizzes (
        quiz_id INTEGER PRIMARY KEY,
        guild_id TEXT NOT NULL,
        authors TEXT NOT NULL,
        problems TEXT NOT NULL,
        description TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_sessions (
        session_id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        quiz_id INTEGER NOT NULL,
        guild_id TEXT NOT NULL,
        attempt_num INTEGER NOT NULL,
        start_time INTEGER NOT NULL,
        expire_time INTEGER NOT NULL,
        is_finished BOOLEAN NOT NULL DEFAULT 0,
        answers TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_data (
        user_id INTEGER PRIMARY KEY,
        trusted BOOLEAN NOT NULL DEFAULT 0,
        blacklisted BOOLEAN NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS guild_data (
        guild_id INTEGER PRIMARY KEY,
        blacklisted BOOLEAN NOT NULL DEFAULT 0,
        can_create_problems_check TEXT NOT NULL,
        can_create_quizzes_check TEXT NOT NULL,
        mods_check TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS appeals (
        special_id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL,
        appeal_type TEXT NOT NULL,
        appeal_msg TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        appeal_num INTEGER NOT NULL
    )
    "#,
];

fn problem_query<'q>(
    sql: &'q str,
    row: &'q ProblemRow,
) -> Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    sqlx::query(sql)
        .bind(&row.guild_id)
        .bind(row.problem_id)
        .bind(&row.question)
        .bind(&row.answers)
        .bind(row.author)
        .bind(&row.voters)
        .bind(&row.solvers)
        .bind(&row.problem_type)
        .bind(&row.extra)
}

pub struct SqliteBackend {
    pool: SqlitePool,
    limits: Limits,
}

impl SqliteBackend {
    pub async fn open(path: &str, limits: Limits) -> Result<Self> {
        tracing::info!("Opening SQLite database at: {}", path);

        let pool = if path == MEMORY_PATH {
            // One connection that never expires, or the database vanishes.
            let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(map_sqlx_error)?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(map_sqlx_error)?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        CacheError::Backend(format!(
                            "failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .map_err(map_sqlx_error)?
        };

        Self::run_migrations(&pool).await?;
        tracing::info!("SQLite database ready");

        Ok(Self { pool, limits })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn write_problem(
        &self,
        sql: &str,
        row: &ProblemRow,
    ) -> std::result::Result<(), sqlx::Error> {
        problem_query(sql, row)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    /// Insert into a guild only while it is below capacity. SQLite runs the
    /// count and the write as a single statement.
    async fn write_problem_capped(&self, row: &ProblemRow) -> Result<bool> {
        let sql = capped_insert_sql("problems", PROBLEM_COLUMNS, PARAM);
        let inserted = problem_query(&sql, row)
            .bind(self.limits.max_problems_per_guild as i64)
            .execute(&self.pool)
            .await
            .map_err(map_insert_error("Problem", format!("{}:{}", row.guild_id, row.problem_id)))?
            .rows_affected();
        Ok(inserted > 0)
    }

    async fn write_quiz(
        &self,
        sql: &str,
        row: &QuizRow,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(sql)
            .bind(row.quiz_id)
            .bind(&row.guild_id)
            .bind(&row.authors)
            .bind(&row.problems)
            .bind(&row.description)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    async fn write_session(
        &self,
        sql: &str,
        row: &SessionRow,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(sql)
            .bind(&row.session_id)
            .bind(row.user_id)
            .bind(row.quiz_id)
            .bind(&row.guild_id)
            .bind(row.attempt_num)
            .bind(row.start_time)
            .bind(row.expire_time)
            .bind(row.is_finished)
            .bind(&row.answers)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    async fn write_user(
        &self,
        sql: &str,
        row: &UserRow,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(sql)
            .bind(row.user_id)
            .bind(row.trusted)
            .bind(row.blacklisted)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    async fn write_guild(
        &self,
        sql: &str,
        row: &GuildRow,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(sql)
            .bind(row.guild_id)
            .bind(row.blacklisted)
            .bind(&row.can_create_problems_check)
            .bind(&row.can_create_quizzes_check)
            .bind(&row.mods_check)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    async fn write_appeal(
        &self,
        sql: &str,
        row: &AppealRow,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(sql)
            .bind(row.special_id)
            .bind(row.user_id)
            .bind(&row.appeal_type)
            .bind(&row.appeal_msg)
            .bind(row.timestamp)
            .bind(row.appeal_num)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    /// `DELETE` by key, failing with `NotFound` when nothing matched.
    async fn delete_where<T>(
        &self,
        sql: &str,
        key: T,
        what: &'static str,
        display: String,
    ) -> Result<()>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + 'static,
    {
        let result = sqlx::query(sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(CacheError::not_found(what, display));
        }
        Ok(())
    }
}

#[async_trait]
impl ProblemStore for SqliteBackend {
    async fn get_problem(&self, guild: GuildScope, problem_id: i64) -> Result<Problem> {
        let row: Option<ProblemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM problems WHERE guild_id = ?1 AND problem_id = ?2",
            PROBLEM_COLUMNS
        ))
        .bind(guild.to_string())
        .bind(problem_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.decode(),
            None => Err(CacheError::not_found(
                "Problem",
                format!("{}:{}", guild, problem_id),
            )),
        }
    }

    async fn get_problems_by_guild(&self, guild: GuildScope) -> Result<Vec<Problem>> {
        let rows: Vec<ProblemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM problems WHERE guild_id = ?1 ORDER BY problem_id",
            PROBLEM_COLUMNS
        ))
        .bind(guild.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, ProblemRow::decode)
    }

    async fn get_all_problems(&self) -> Result<Vec<Problem>> {
        let rows: Vec<ProblemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM problems ORDER BY guild_id, problem_id",
            PROBLEM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, ProblemRow::decode)
    }

    async fn add_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        check_problem_id(problem_id, problem)?;
        let row = ProblemRow::encode(problem)?;

        if problem.guild_id.is_global() {
            self.write_problem(&insert_sql("problems", PROBLEM_COLUMNS, PARAM), &row)
                .await
                .map_err(map_insert_error("Problem", format!("{}:{}", row.guild_id, problem_id)))?;
        } else if !self.write_problem_capped(&row).await? {
            return Err(CacheError::TooManyProblems {
                guild: problem.guild_id,
                limit: self.limits.max_problems_per_guild,
            });
        }
        tracing::debug!("Added problem {}:{}", row.guild_id, problem_id);
        Ok(())
    }

    async fn update_problem(&self, problem_id: i64, problem: &Problem) -> Result<()> {
        check_problem_id(problem_id, problem)?;
        let row = ProblemRow::encode(problem)?;
        self.write_problem(
            &upsert_sql("problems", PROBLEM_COLUMNS, &["guild_id", "problem_id"], PARAM),
            &row,
        )
        .await
        .map_err(map_sqlx_error)?;
        tracing::debug!("Updated problem {}:{}", row.guild_id, problem_id);
        Ok(())
    }

    async fn remove_problem(&self, guild: GuildScope, problem_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM problems WHERE guild_id = ?1 AND problem_id = ?2")
            .bind(guild.to_string())
            .bind(problem_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CacheError::not_found(
                "Problem",
                format!("{}:{}", guild, problem_id),
            ));
        }
        tracing::debug!("Removed problem {}:{}", guild, problem_id);
        Ok(())
    }
}

#[async_trait]
impl QuizStore for SqliteBackend {
    async fn get_quiz(&self, quiz_id: i64) -> Result<Quiz> {
        let row: Option<QuizRow> =
            sqlx::query_as(&format!("SELECT {} FROM quizzes WHERE quiz_id = ?1", QUIZ_COLUMNS))
                .bind(quiz_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.decode(),
            None => Err(CacheError::not_found("Quiz", quiz_id)),
        }
    }

    async fn get_quizzes_by_guild(&self, guild: GuildScope) -> Result<Vec<Quiz>> {
        let rows: Vec<QuizRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quizzes WHERE guild_id = ?1 ORDER BY quiz_id",
            QUIZ_COLUMNS
        ))
        .bind(guild.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, QuizRow::decode)
    }

    async fn get_all_quizzes(&self) -> Result<Vec<Quiz>> {
        let rows: Vec<QuizRow> =
            sqlx::query_as(&format!("SELECT {} FROM quizzes ORDER BY quiz_id", QUIZ_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        decode_all(rows, QuizRow::decode)
    }

    async fn add_quiz(&self, quiz: &Quiz) -> Result<()> {
        let row = QuizRow::encode(quiz)?;
        self.write_quiz(&insert_sql("quizzes", QUIZ_COLUMNS, PARAM), &row)
            .await
            .map_err(map_insert_error("Quiz", row.quiz_id))
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<()> {
        let row = QuizRow::encode(quiz)?;
        self.write_quiz(&upsert_sql("quizzes", QUIZ_COLUMNS, &["quiz_id"], PARAM), &row)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove_quiz(&self, quiz_id: i64) -> Result<()> {
        self.delete_where(
            "DELETE FROM quizzes WHERE quiz_id = ?1",
            quiz_id,
            "Quiz",
            quiz_id.to_string(),
        )
        .await
    }
}

#[async_trait]
impl QuizSessionStore for SqliteBackend {
    async fn get_quiz_session(&self, session_id: &str) -> Result<QuizSolvingSession> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quiz_sessions WHERE session_id = ?1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.decode(),
            None => Err(CacheError::not_found("QuizSolvingSession", session_id)),
        }
    }

    async fn get_quiz_sessions_by_user(&self, user_id: i64) -> Result<Vec<QuizSolvingSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quiz_sessions WHERE user_id = ?1 ORDER BY start_time",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, SessionRow::decode)
    }

    async fn get_all_quiz_sessions(&self) -> Result<Vec<QuizSolvingSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quiz_sessions ORDER BY start_time",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, SessionRow::decode)
    }

    async fn add_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        let row = SessionRow::encode(session)?;
        self.write_session(&insert_sql("quiz_sessions", SESSION_COLUMNS, PARAM), &row)
            .await
            .map_err(map_insert_error("QuizSolvingSession", &row.session_id))
    }

    async fn update_quiz_session(&self, session: &QuizSolvingSession) -> Result<()> {
        let row = SessionRow::encode(session)?;
        self.write_session(
            &upsert_sql("quiz_sessions", SESSION_COLUMNS, &["session_id"], PARAM),
            &row,
        )
        .await
        .map_err(map_sqlx_error)
    }

    async fn remove_quiz_session(&self, session_id: &str) -> Result<()> {
        self.delete_where(
            "DELETE FROM quiz_sessions WHERE session_id = ?1",
            session_id.to_string(),
            "QuizSolvingSession",
            session_id.to_string(),
        )
        .await
    }
}

#[async_trait]
impl UserDataStore for SqliteBackend {
    async fn get_user_data(&self, user_id: i64) -> Result<UserData> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM user_data WHERE user_id = ?1", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(UserData::from)
            .ok_or_else(|| CacheError::not_found("UserData", user_id))
    }

    async fn get_all_user_data(&self) -> Result<Vec<UserData>> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM user_data ORDER BY user_id", USER_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserData::from).collect())
    }

    async fn add_user_data(&self, data: &UserData) -> Result<()> {
        let row = UserRow::from(data);
        self.write_user(&insert_sql("user_data", USER_COLUMNS, PARAM), &row)
            .await
            .map_err(map_insert_error("UserData", row.user_id))
    }

    async fn update_user_data(&self, data: &UserData) -> Result<()> {
        let row = UserRow::from(data);
        self.write_user(&upsert_sql("user_data", USER_COLUMNS, &["user_id"], PARAM), &row)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove_user_data(&self, user_id: i64) -> Result<()> {
        self.delete_where(
            "DELETE FROM user_data WHERE user_id = ?1",
            user_id,
            "UserData",
            user_id.to_string(),
        )
        .await
    }
}

#[async_trait]
impl GuildDataStore for SqliteBackend {
    async fn get_guild_data(&self, guild_id: i64) -> Result<GuildData> {
        let row: Option<GuildRow> = sqlx::query_as(&format!(
            "SELECT {} FROM guild_data WHERE guild_id = ?1",
            GUILD_COLUMNS
        ))
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.decode(),
            None => Err(CacheError::not_found("GuildData", guild_id)),
        }
    }

    async fn get_all_guild_data(&self) -> Result<Vec<GuildData>> {
        let rows: Vec<GuildRow> = sqlx::query_as(&format!(
            "SELECT {} FROM guild_data ORDER BY guild_id",
            GUILD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, GuildRow::decode)
    }

    async fn add_guild_data(&self, data: &GuildData) -> Result<()> {
        let row = GuildRow::encode(data)?;
        self.write_guild(&insert_sql("guild_data", GUILD_COLUMNS, PARAM), &row)
            .await
            .map_err(map_insert_error("GuildData", row.guild_id))
    }

    async fn update_guild_data(&self, data: &GuildData) -> Result<()> {
        let row = GuildRow::encode(data)?;
        self.write_guild(&upsert_sql("guild_data", GUILD_COLUMNS, &["guild_id"], PARAM), &row)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove_guild_data(&self, guild_id: i64) -> Result<()> {
        self.delete_where(
            "DELETE FROM guild_data WHERE guild_id = ?1",
            guild_id,
            "GuildData",
            guild_id.to_string(),
        )
        .await
    }
}

#[async_trait]
impl AppealStore for SqliteBackend {
    async fn get_appeal(&self, special_id: i64) -> Result<Appeal> {
        let row: Option<AppealRow> = sqlx::query_as(&format!(
            "SELECT {} FROM appeals WHERE special_id = ?1",
            APPEAL_COLUMNS
        ))
        .bind(special_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.decode(),
            None => Err(CacheError::not_found("Appeal", special_id)),
        }
    }

    async fn get_appeals_by_user(&self, user_id: i64) -> Result<Vec<Appeal>> {
        let rows: Vec<AppealRow> = sqlx::query_as(&format!(
            "SELECT {} FROM appeals WHERE user_id = ?1 ORDER BY appeal_num",
            APPEAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, AppealRow::decode)
    }

    async fn get_all_appeals(&self) -> Result<Vec<Appeal>> {
        let rows: Vec<AppealRow> = sqlx::query_as(&format!(
            "SELECT {} FROM appeals ORDER BY special_id",
            APPEAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_all(rows, AppealRow::decode)
    }

    async fn add_appeal(&self, appeal: &Appeal) -> Result<()> {
        let row = AppealRow::encode(appeal)?;
        self.write_appeal(&insert_sql("appeals", APPEAL_COLUMNS, PARAM), &row)
            .await
            .map_err(map_insert_error("Appeal", row.special_id))
    }

    async fn update_appeal(&self, appeal: &Appeal) -> Result<()> {
        let row = AppealRow::encode(appeal)?;
        self.write_appeal(&upsert_sql("appeals", APPEAL_COLUMNS, &["special_id"], PARAM), &row)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove_appeal(&self, special_id: i64) -> Result<()> {
        self.delete_where(
            "DELETE FROM appeals WHERE special_id = ?1",
            special_id,
            "Appeal",
            special_id.to_string(),
        )
        .await
    }
}

/// Best-effort conversion of one result column to JSON.
fn column_value(row: &SqliteRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    let type_name = row.columns()[index].type_info().name().to_string();
    Value::String(format!("<{}>", type_name))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn run_raw_query(&self, query: &str) -> Result<Vec<Dict>> {
        tracing::info!("Running raw SQLite query");
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|column| (column.name().to_string(), column_value(row, column.ordinal())))
                    .collect()
            })
            .collect())
    }

    async fn bgsave(&self, _schedule: bool) -> Result<()> {
        Err(CacheError::Unsupported {
            backend: BackendKind::Sqlite,
            operation: "bgsave",
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        tracing::info!("SQLite database closed");
        Ok(())
    }
}
