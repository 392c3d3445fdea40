//! Quizzes and their descriptions

use crate::dict::serde_dict;
use crate::error::{RecordError, Result};
use crate::limits::Limits;
use crate::problem::Problem;
use crate::scope::GuildScope;
use serde::{Deserialize, Serialize};

/// Metadata for a quiz, including the time limit sessions are bound by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizDescription {
    pub quiz_id: i64,
    pub author: i64,
    #[serde(deserialize_with = "crate::scope::required")]
    pub guild_id: GuildScope,
    pub category: String,
    /// Difficulty tier. Higher is harder.
    pub intensity: f64,
    pub description: String,
    pub license: String,
    /// Seconds a session may run. [`QuizDescription::UNLIMITED`] means no limit.
    pub time_limit: u64,
}

impl QuizDescription {
    pub const UNLIMITED: u64 = u64::MAX;
    pub const DEFAULT_CATEGORY: &'static str = "Unspecified";
    pub const DEFAULT_LICENSE: &'static str = "Unspecified (the default is GNU GDL)";

    pub fn new(quiz_id: i64, author: i64, guild_id: GuildScope) -> Self {
        Self {
            quiz_id,
            author,
            guild_id,
            category: Self::DEFAULT_CATEGORY.to_string(),
            intensity: 0.0,
            description: "No description given".to_string(),
            license: Self::DEFAULT_LICENSE.to_string(),
            time_limit: Self::UNLIMITED,
        }
    }

    pub fn with_time_limit(mut self, seconds: u64) -> Self {
        self.time_limit = seconds;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.time_limit == Self::UNLIMITED
    }
}

serde_dict!(QuizDescription, "QuizDescription");

/// An ordered collection of problems. Problems are always sorted by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QuizRepr", into = "QuizRepr")]
pub struct Quiz {
    id: i64,
    authors: Vec<i64>,
    problems: Vec<Problem>,
    description: QuizDescription,
}

#[derive(Serialize, Deserialize)]
struct QuizRepr {
    id: i64,
    authors: Vec<i64>,
    problems: Vec<Problem>,
    description: QuizDescription,
}

impl From<QuizRepr> for Quiz {
    fn from(repr: QuizRepr) -> Self {
        let mut problems = repr.problems;
        problems.sort_by_key(|p| p.id);
        Self {
            id: repr.id,
            authors: repr.authors,
            problems,
            description: repr.description,
        }
    }
}

impl From<Quiz> for QuizRepr {
    fn from(quiz: Quiz) -> Self {
        Self {
            id: quiz.id,
            authors: quiz.authors,
            problems: quiz.problems,
            description: quiz.description,
        }
    }
}

impl Quiz {
    pub fn new(
        id: i64,
        authors: Vec<i64>,
        mut problems: Vec<Problem>,
        description: QuizDescription,
        limits: &Limits,
    ) -> Result<Self> {
        if problems.len() > limits.max_problems_per_quiz {
            return Err(RecordError::TooManyQuizProblems {
                limit: limits.max_problems_per_quiz,
            });
        }
        for problem in &problems {
            problem.validate(limits)?;
        }
        problems.sort_by_key(|p| p.id);
        Ok(Self {
            id,
            authors,
            problems,
            description,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn authors(&self) -> &[i64] {
        &self.authors
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn description(&self) -> &QuizDescription {
        &self.description
    }

    pub fn description_mut(&mut self) -> &mut QuizDescription {
        &mut self.description
    }

    /// The guild the quiz was created in.
    pub fn guild_id(&self) -> GuildScope {
        self.description.guild_id
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problem(&self, index: usize) -> Option<&Problem> {
        self.problems.get(index)
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.problems.len() > limits.max_problems_per_quiz {
            return Err(RecordError::TooManyQuizProblems {
                limit: limits.max_problems_per_quiz,
            });
        }
        self.problems.iter().try_for_each(|p| p.validate(limits))
    }

    /// Insert a problem at its sorted position.
    pub fn add_problem(&mut self, problem: Problem, limits: &Limits) -> Result<()> {
        if self.problems.len() >= limits.max_problems_per_quiz {
            return Err(RecordError::TooManyQuizProblems {
                limit: limits.max_problems_per_quiz,
            });
        }
        problem.validate(limits)?;
        let at = self.problems.partition_point(|p| p.id <= problem.id);
        self.problems.insert(at, problem);
        Ok(())
    }

    pub fn remove_problem(&mut self, problem_id: i64) -> Option<Problem> {
        let index = self.problems.iter().position(|p| p.id == problem_id)?;
        Some(self.problems.remove(index))
    }

    pub fn add_author(&mut self, author: i64) {
        if !self.authors.contains(&author) {
            self.authors.push(author);
        }
    }
}

serde_dict!(Quiz, "Quiz");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictConvertible;
    use crate::problem::ProblemKind;

    fn problem(id: i64, author: i64) -> Problem {
        Problem::new(
            id,
            GuildScope::Guild(1),
            format!("question {}", id),
            vec![id.to_string()],
            author,
            ProblemKind::Basic,
            &Limits::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_problems_stay_sorted() {
        let limits = Limits::default();
        let mut quiz = Quiz::new(
            10,
            vec![5],
            vec![problem(3, 5), problem(1, 5)],
            QuizDescription::new(10, 5, GuildScope::Guild(1)),
            &limits,
        )
        .unwrap();
        quiz.add_problem(problem(2, 6), &limits).unwrap();
        let ids: Vec<i64> = quiz.problems().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(quiz.remove_problem(2).map(|p| p.id), Some(2));
        assert!(quiz.remove_problem(2).is_none());
    }

    #[test]
    fn test_round_trip_resorts_problems() {
        let quiz = Quiz::new(
            4,
            vec![5, 6],
            vec![problem(2, 5), problem(9, 6)],
            QuizDescription::new(4, 5, GuildScope::Global).with_time_limit(30),
            &Limits::default(),
        )
        .unwrap();
        let mut dict = quiz.to_dict();
        assert_eq!(Quiz::from_dict(&dict).unwrap(), quiz);

        if let Some(serde_json::Value::Array(problems)) = dict.get_mut("problems") {
            problems.reverse();
        }
        assert_eq!(Quiz::from_dict(&dict).unwrap(), quiz);
    }

    #[test]
    fn test_quiz_size_limit() {
        let limits = Limits {
            max_problems_per_quiz: 2,
            ..Limits::default()
        };
        let desc = QuizDescription::new(1, 1, GuildScope::Global);
        let too_many = Quiz::new(
            1,
            vec![1],
            vec![problem(1, 1), problem(2, 1), problem(3, 1)],
            desc.clone(),
            &limits,
        );
        assert_eq!(
            too_many.unwrap_err(),
            RecordError::TooManyQuizProblems { limit: 2 }
        );

        let mut quiz = Quiz::new(1, vec![1], vec![problem(1, 1), problem(2, 1)], desc, &limits).unwrap();
        assert!(quiz.add_problem(problem(3, 1), &limits).is_err());
        assert_eq!(quiz.len(), 2);
    }

    #[test]
    fn test_description_round_trip() {
        let desc = QuizDescription::new(3, 8, GuildScope::Guild(77))
            .with_category("algebra")
            .with_description("linear equations");
        assert!(desc.is_unlimited());
        let back = QuizDescription::from_dict(&desc.to_dict()).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_missing_guild_id_is_format_error() {
        let desc = QuizDescription::new(3, 8, GuildScope::Guild(77));
        let mut dict = desc.to_dict();
        dict.remove("guild_id");
        assert!(matches!(
            QuizDescription::from_dict(&dict),
            Err(RecordError::Format { .. })
        ));

        let quiz = Quiz::new(3, vec![8], vec![problem(1, 8)], desc, &Limits::default()).unwrap();
        let mut dict = quiz.to_dict();
        if let Some(serde_json::Value::Object(description)) = dict.get_mut("description") {
            description.remove("guild_id");
        }
        assert!(matches!(Quiz::from_dict(&dict), Err(RecordError::Format { .. })));
    }
}
