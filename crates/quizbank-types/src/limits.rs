//! Configured size limits

use serde::{Deserialize, Serialize};

/// Ceilings consumed by record validation and by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_question_length: usize,
    pub max_answer_length: usize,
    pub max_answers_per_problem: usize,
    pub max_problems_per_guild: usize,
    pub max_problems_per_quiz: usize,
    /// Voter count at which a global problem is swept.
    pub default_vote_threshold: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_question_length: 2000,
            max_answer_length: 1000,
            max_answers_per_problem: 30,
            max_problems_per_guild: 100,
            max_problems_per_quiz: 100,
            default_vote_threshold: 3,
        }
    }
}
