//! Row layout shared by the SQL adapters
//!
//! Scalar identity columns are stored natively. Lists and nested records are
//! JSON text columns. Decoding rebuilds the record dict column by column so
//! a bad value is reported with its table, row and column.

use quizbank_core::{
    Appeal, CacheError, CacheResult, Dict, DictConvertible, GuildData, GuildScope, Problem, Quiz,
    QuizSolvingSession, RecordError, UserData,
};
use serde_json::Value;

pub(crate) const PROBLEM_COLUMNS: &str =
    "guild_id, problem_id, question, answers, author, voters, solvers, problem_type, extra";
pub(crate) const QUIZ_COLUMNS: &str = "quiz_id, guild_id, authors, problems, description";
pub(crate) const SESSION_COLUMNS: &str = "session_id, user_id, quiz_id, guild_id, attempt_num, \
start_time, expire_time, is_finished, answers";
pub(crate) const USER_COLUMNS: &str = "user_id, trusted, blacklisted";
pub(crate) const GUILD_COLUMNS: &str =
    "guild_id, blacklisted, can_create_problems_check, can_create_quizzes_check, mods_check";
pub(crate) const APPEAL_COLUMNS: &str =
    "special_id, user_id, appeal_type, appeal_msg, timestamp, appeal_num";

/// Parameter sigil of each dialect: SQLite `?1`, Postgres `$1`.
pub(crate) const SQLITE_PARAM: char = '?';
pub(crate) const POSTGRES_PARAM: char = '$';

fn placeholders(count: usize, param: char) -> String {
    (1..=count)
        .map(|i| format!("{}{}", param, i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO table (cols) VALUES (?1, ...)`
pub(crate) fn insert_sql(table: &str, columns: &str, param: char) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns,
        placeholders(columns.split(',').count(), param)
    )
}

/// Insert that overwrites every non-key column on conflict.
pub(crate) fn upsert_sql(table: &str, columns: &str, key: &[&str], param: char) -> String {
    let updates = columns
        .split(',')
        .map(str::trim)
        .filter(|column| !key.contains(column))
        .map(|column| format!("{0} = excluded.{0}", column))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}",
        insert_sql(table, columns, param),
        key.join(", "),
        updates
    )
}

/// Insert that only lands while fewer rows than the extra last parameter
/// share its first column. The count and the write are one statement.
pub(crate) fn capped_insert_sql(table: &str, columns: &str, param: char) -> String {
    let count = columns.split(',').count();
    let scope = columns.split(',').next().unwrap_or_default().trim();
    format!(
        "INSERT INTO {0} ({1}) SELECT {2} WHERE (SELECT COUNT(*) FROM {0} WHERE {3} = {4}1) < {4}{5}",
        table,
        columns,
        placeholders(count, param),
        scope,
        param,
        count + 1
    )
}

/// Convert a driver error. Pool timeouts become `Timeout`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> CacheError {
    match err {
        sqlx::Error::PoolTimedOut => CacheError::Timeout("waiting for a database connection".into()),
        other => CacheError::backend(other),
    }
}

/// Like [`map_sqlx_error`], but a unique violation means the record exists.
pub(crate) fn map_insert_error(
    what: &'static str,
    key: impl std::fmt::Display,
) -> impl FnOnce(sqlx::Error) -> CacheError {
    move |err| {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() || db_err.code().as_deref() == Some("23505") {
                return CacheError::already_exists(what, key);
            }
        }
        map_sqlx_error(err)
    }
}

fn json_column(at: &str, column: &str, text: &str) -> CacheResult<Value> {
    serde_json::from_str(text).map_err(|e| CacheError::format(format!("{}.{}", at, column), e))
}

fn scope_column(at: &str, text: &str) -> CacheResult<GuildScope> {
    text.parse()
        .map_err(|e: RecordError| CacheError::format(format!("{}.guild_id", at), e))
}

fn decode_dict<T: DictConvertible>(at: &str, dict: &Dict) -> CacheResult<T> {
    T::from_dict(dict).map_err(|e| match e {
        RecordError::Format { detail, .. } => CacheError::format(at, detail),
        other => CacheError::Record(other),
    })
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProblemRow {
    pub guild_id: String,
    pub problem_id: i64,
    pub question: String,
    pub answers: String,
    pub author: i64,
    pub voters: String,
    pub solvers: String,
    pub problem_type: String,
    pub extra: String,
}

impl ProblemRow {
    pub fn encode(problem: &Problem) -> CacheResult<Self> {
        let mut extra = match serde_json::to_value(&problem.kind)? {
            Value::Object(map) => map,
            _ => Dict::new(),
        };
        extra.remove("type");
        Ok(Self {
            guild_id: problem.guild_id.to_string(),
            problem_id: problem.id,
            question: problem.question.clone(),
            answers: serde_json::to_string(&problem.answers)?,
            author: problem.author,
            voters: serde_json::to_string(&problem.voters)?,
            solvers: serde_json::to_string(&problem.solvers)?,
            problem_type: problem.kind.type_name().to_string(),
            extra: Value::Object(extra).to_string(),
        })
    }

    pub fn decode(self) -> CacheResult<Problem> {
        let at = format!("problems[{}:{}]", self.guild_id, self.problem_id);
        let scope = scope_column(&at, &self.guild_id)?;

        let mut dict = Dict::new();
        dict.insert("id".into(), self.problem_id.into());
        dict.insert("guild_id".into(), scope.guild_id().into());
        dict.insert("question".into(), self.question.into());
        dict.insert("answers".into(), json_column(&at, "answers", &self.answers)?);
        dict.insert("author".into(), self.author.into());
        dict.insert("voters".into(), json_column(&at, "voters", &self.voters)?);
        dict.insert("solvers".into(), json_column(&at, "solvers", &self.solvers)?);
        dict.insert("type".into(), self.problem_type.into());
        match json_column(&at, "extra", &self.extra)? {
            Value::Object(extra) => dict.extend(extra),
            _ => {
                return Err(CacheError::format(
                    format!("{}.extra", at),
                    "expected a JSON object",
                ))
            }
        }
        decode_dict(&at, &dict)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QuizRow {
    pub quiz_id: i64,
    pub guild_id: String,
    pub authors: String,
    pub problems: String,
    pub description: String,
}

impl QuizRow {
    pub fn encode(quiz: &Quiz) -> CacheResult<Self> {
        Ok(Self {
            quiz_id: quiz.id(),
            guild_id: quiz.guild_id().to_string(),
            authors: serde_json::to_string(quiz.authors())?,
            problems: serde_json::to_string(quiz.problems())?,
            description: serde_json::to_string(quiz.description())?,
        })
    }

    pub fn decode(self) -> CacheResult<Quiz> {
        let at = format!("quizzes[{}]", self.quiz_id);
        let mut dict = Dict::new();
        dict.insert("id".into(), self.quiz_id.into());
        dict.insert("authors".into(), json_column(&at, "authors", &self.authors)?);
        dict.insert("problems".into(), json_column(&at, "problems", &self.problems)?);
        dict.insert(
            "description".into(),
            json_column(&at, "description", &self.description)?,
        );
        decode_dict(&at, &dict)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub session_id: String,
    pub user_id: i64,
    pub quiz_id: i64,
    pub guild_id: String,
    pub attempt_num: i64,
    pub start_time: i64,
    pub expire_time: i64,
    pub is_finished: bool,
    pub answers: String,
}

impl SessionRow {
    pub fn encode(session: &QuizSolvingSession) -> CacheResult<Self> {
        Ok(Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id,
            quiz_id: session.quiz_id,
            guild_id: session.guild_id.to_string(),
            attempt_num: i64::from(session.attempt_num),
            start_time: session.start_time.timestamp_millis(),
            expire_time: session.expire_time.timestamp_millis(),
            is_finished: session.is_finished,
            answers: serde_json::to_string(&session.answers)?,
        })
    }

    pub fn decode(self) -> CacheResult<QuizSolvingSession> {
        let at = format!("quiz_sessions[{}]", self.session_id);
        let scope = scope_column(&at, &self.guild_id)?;
        let mut dict = Dict::new();
        dict.insert("user_id".into(), self.user_id.into());
        dict.insert("quiz_id".into(), self.quiz_id.into());
        dict.insert("guild_id".into(), scope.guild_id().into());
        dict.insert("attempt_num".into(), self.attempt_num.into());
        dict.insert("start_time".into(), self.start_time.into());
        dict.insert("expire_time".into(), self.expire_time.into());
        dict.insert("is_finished".into(), self.is_finished.into());
        dict.insert("answers".into(), json_column(&at, "answers", &self.answers)?);
        dict.insert("session_id".into(), self.session_id.into());
        decode_dict(&at, &dict)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub user_id: i64,
    pub trusted: bool,
    pub blacklisted: bool,
}

impl From<&UserData> for UserRow {
    fn from(data: &UserData) -> Self {
        Self {
            user_id: data.user_id,
            trusted: data.trusted,
            blacklisted: data.blacklisted,
        }
    }
}

impl From<UserRow> for UserData {
    fn from(r: UserRow) -> Self {
        UserData {
            user_id: r.user_id,
            trusted: r.trusted,
            blacklisted: r.blacklisted,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct GuildRow {
    pub guild_id: i64,
    pub blacklisted: bool,
    pub can_create_problems_check: String,
    pub can_create_quizzes_check: String,
    pub mods_check: String,
}

impl GuildRow {
    pub fn encode(data: &GuildData) -> CacheResult<Self> {
        Ok(Self {
            guild_id: data.guild_id,
            blacklisted: data.blacklisted,
            can_create_problems_check: serde_json::to_string(&data.can_create_problems_check)?,
            can_create_quizzes_check: serde_json::to_string(&data.can_create_quizzes_check)?,
            mods_check: serde_json::to_string(&data.mods_check)?,
        })
    }

    pub fn decode(self) -> CacheResult<GuildData> {
        let at = format!("guild_data[{}]", self.guild_id);
        let mut dict = Dict::new();
        dict.insert("guild_id".into(), self.guild_id.into());
        dict.insert("blacklisted".into(), self.blacklisted.into());
        for (column, text) in [
            ("can_create_problems_check", &self.can_create_problems_check),
            ("can_create_quizzes_check", &self.can_create_quizzes_check),
            ("mods_check", &self.mods_check),
        ] {
            dict.insert(column.into(), json_column(&at, column, text)?);
        }
        decode_dict(&at, &dict)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AppealRow {
    pub special_id: i64,
    pub user_id: i64,
    pub appeal_type: String,
    pub appeal_msg: String,
    pub timestamp: i64,
    pub appeal_num: i64,
}

impl AppealRow {
    pub fn encode(appeal: &Appeal) -> CacheResult<Self> {
        let appeal_type = match serde_json::to_value(appeal.appeal_type)? {
            Value::String(name) => name,
            other => other.to_string(),
        };
        Ok(Self {
            special_id: appeal.special_id,
            user_id: appeal.user_id,
            appeal_type,
            appeal_msg: appeal.appeal_msg.clone(),
            timestamp: appeal.timestamp,
            appeal_num: i64::from(appeal.appeal_num),
        })
    }

    pub fn decode(self) -> CacheResult<Appeal> {
        let at = format!("appeals[{}]", self.special_id);
        let mut dict = Dict::new();
        dict.insert("special_id".into(), self.special_id.into());
        dict.insert("user_id".into(), self.user_id.into());
        dict.insert("appeal_type".into(), self.appeal_type.into());
        dict.insert("appeal_msg".into(), self.appeal_msg.into());
        dict.insert("timestamp".into(), self.timestamp.into());
        dict.insert("appeal_num".into(), self.appeal_num.into());
        decode_dict(&at, &dict)
    }
}

/// Decode every row, stopping at the first malformed one.
pub(crate) fn decode_all<R, T>(
    rows: Vec<R>,
    decode: impl Fn(R) -> CacheResult<T>,
) -> CacheResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizbank_core::{AppealType, Limits, ProblemKind};

    fn problem() -> Problem {
        Problem::new(
            3,
            GuildScope::Guild(12),
            "2+2?",
            vec!["4".into()],
            8,
            ProblemKind::computational(),
            &Limits::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_statement_generators() {
        assert_eq!(
            insert_sql("user_data", USER_COLUMNS, SQLITE_PARAM),
            "INSERT INTO user_data (user_id, trusted, blacklisted) VALUES (?1, ?2, ?3)"
        );
        assert_eq!(
            upsert_sql("user_data", USER_COLUMNS, &["user_id"], POSTGRES_PARAM),
            "INSERT INTO user_data (user_id, trusted, blacklisted) VALUES ($1, $2, $3) \
ON CONFLICT (user_id) DO UPDATE SET trusted = excluded.trusted, blacklisted = excluded.blacklisted"
        );
        assert_eq!(
            capped_insert_sql("problems", PROBLEM_COLUMNS, SQLITE_PARAM),
            format!(
                "INSERT INTO problems ({}) SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9 \
WHERE (SELECT COUNT(*) FROM problems WHERE guild_id = ?1) < ?10",
                PROBLEM_COLUMNS
            )
        );
    }

    #[test]
    fn test_problem_row_round_trip() {
        let problem = problem();
        let row = ProblemRow::encode(&problem).unwrap();
        assert_eq!(row.guild_id, "12");
        assert_eq!(row.problem_type, "ComputationalProblem");
        assert_eq!(row.extra, r#"{"tolerance":0.001}"#);
        assert_eq!(row.decode().unwrap(), problem);
    }

    #[test]
    fn test_bad_json_column_names_the_column() {
        let mut row = ProblemRow::encode(&problem()).unwrap();
        row.voters = "not json".into();
        match row.decode().unwrap_err() {
            CacheError::Format { location, .. } => assert_eq!(location, "problems[12:3].voters"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_shape_names_the_row() {
        let mut row = ProblemRow::encode(&problem()).unwrap();
        row.answers = r#"{"a": 1}"#.into();
        match row.decode().unwrap_err() {
            CacheError::Format { location, detail } => {
                assert_eq!(location, "problems[12:3]");
                assert!(!detail.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_appeal_row_stores_type_name() {
        let appeal = Appeal {
            special_id: 1,
            user_id: 2,
            appeal_type: AppealType::SupportServerBan,
            appeal_msg: "sorry".into(),
            timestamp: 10,
            appeal_num: 1,
        };
        let row = AppealRow::encode(&appeal).unwrap();
        assert_eq!(row.appeal_type, "SupportServerBan");
        assert_eq!(row.decode().unwrap(), appeal);
    }
}
