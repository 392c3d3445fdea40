//! Record-level errors

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors raised while building, editing or decoding a record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("question is {excess} characters too long (limit {limit})")]
    TooLongQuestion { excess: usize, limit: usize },

    #[error("answer #{index} is {excess} characters too long (limit {limit})")]
    TooLongAnswer {
        index: usize,
        excess: usize,
        limit: usize,
    },

    #[error("a problem may have at most {limit} answers, got {count}")]
    TooManyAnswers { count: usize, limit: usize },

    #[error("a quiz may have at most {limit} problems")]
    TooManyQuizProblems { limit: usize },

    #[error("invalid linear system: {0}")]
    InvalidLinearSystem(String),

    #[error("malformed {record}: {detail}")]
    Format { record: &'static str, detail: String },

    #[error("invalid guild scope: {0}")]
    InvalidScope(String),

    #[error("quiz session expired at {expired_at}")]
    SessionOvertime { expired_at: DateTime<Utc> },

    #[error("quiz session is already finished")]
    SessionFinished,
}

impl RecordError {
    pub(crate) fn format(record: &'static str, detail: impl ToString) -> Self {
        RecordError::Format {
            record,
            detail: detail.to_string(),
        }
    }
}
