//! Error types for the storage layer

use crate::config::BackendKind;
use quizbank_types::{GuildScope, RecordError};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("problem id {record_id} does not match the requested id {requested_id}")]
    IdMismatch { requested_id: i64, record_id: i64 },

    #[error("{what} already exists: {key}")]
    AlreadyExists { what: &'static str, key: String },

    #[error("guild {guild} already holds the maximum of {limit} problems")]
    TooManyProblems { guild: GuildScope, limit: usize },

    #[error("malformed data at {location}: {detail}")]
    Format { location: String, detail: String },

    #[error("the cache is locked, try again later")]
    Locked,

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    #[error("backend call timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateOrCapacity,
    Format,
    LockedCache,
    OvertimeOrFinished,
    Unsupported,
    InvalidInput,
    Timeout,
    Cancelled,
    Backend,
}

impl CacheError {
    pub fn not_found(what: &'static str, key: impl Display) -> Self {
        CacheError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn already_exists(what: &'static str, key: impl Display) -> Self {
        CacheError::AlreadyExists {
            what,
            key: key.to_string(),
        }
    }

    pub fn format(location: impl Display, detail: impl Display) -> Self {
        CacheError::Format {
            location: location.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn backend(err: impl Display) -> Self {
        CacheError::Backend(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotFound { .. } => ErrorKind::NotFound,
            CacheError::IdMismatch { .. }
            | CacheError::AlreadyExists { .. }
            | CacheError::TooManyProblems { .. } => ErrorKind::DuplicateOrCapacity,
            CacheError::Format { .. } => ErrorKind::Format,
            CacheError::Locked => ErrorKind::LockedCache,
            CacheError::Unsupported { .. } => ErrorKind::Unsupported,
            CacheError::Timeout(_) => ErrorKind::Timeout,
            CacheError::Cancelled => ErrorKind::Cancelled,
            CacheError::InvalidInput(_) | CacheError::Config(_) => ErrorKind::InvalidInput,
            CacheError::Backend(_) => ErrorKind::Backend,
            CacheError::Record(record) => match record {
                RecordError::TooLongQuestion { .. }
                | RecordError::TooLongAnswer { .. }
                | RecordError::TooManyAnswers { .. }
                | RecordError::TooManyQuizProblems { .. } => ErrorKind::DuplicateOrCapacity,
                RecordError::Format { .. } => ErrorKind::Format,
                RecordError::SessionOvertime { .. } | RecordError::SessionFinished => {
                    ErrorKind::OvertimeOrFinished
                }
                RecordError::InvalidLinearSystem(_) | RecordError::InvalidScope(_) => {
                    ErrorKind::InvalidInput
                }
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::format("json", e)
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(e: config::ConfigError) -> Self {
        CacheError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(CacheError::not_found("Problem", "global:1").kind(), ErrorKind::NotFound);
        assert_eq!(
            CacheError::TooManyProblems {
                guild: GuildScope::Guild(1),
                limit: 100
            }
            .kind(),
            ErrorKind::DuplicateOrCapacity
        );
        assert_eq!(CacheError::Locked.kind(), ErrorKind::LockedCache);
        assert_eq!(
            CacheError::from(RecordError::SessionFinished).kind(),
            ErrorKind::OvertimeOrFinished
        );
        assert_eq!(
            CacheError::from(RecordError::Format {
                record: "Problem",
                detail: "missing field `question`".into()
            })
            .kind(),
            ErrorKind::Format
        );
        assert_eq!(
            CacheError::Unsupported {
                backend: BackendKind::Sqlite,
                operation: "bgsave"
            }
            .kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_messages_name_the_record() {
        let err = CacheError::not_found("Quiz", 7);
        assert_eq!(err.to_string(), "Quiz not found: 7");
        let err = CacheError::format("problems[global:3].answers", "expected value");
        assert!(err.to_string().contains("problems[global:3].answers"));
    }
}
