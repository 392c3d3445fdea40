//! Quizbank Types - record definitions shared by every storage backend
//!
//! Pure data with serde derives and validation. No async runtime.

pub mod appeal;
pub mod dict;
pub mod error;
pub mod grading;
pub mod guild;
pub mod limits;
pub mod problem;
pub mod quiz;
pub mod scope;
pub mod session;
pub mod user;

pub use appeal::{Appeal, AppealType};
pub use dict::{from_json_str, to_json_string, Dict, DictConvertible};
pub use error::{RecordError, Result};
pub use guild::{CheckForUserPassage, GuildData};
pub use limits::Limits;
pub use problem::{Problem, ProblemEdit, ProblemKind, DEFAULT_TOLERANCE};
pub use quiz::{Quiz, QuizDescription};
pub use scope::GuildScope;
pub use session::{QuizSolvingSession, SessionState};
pub use user::UserData;
