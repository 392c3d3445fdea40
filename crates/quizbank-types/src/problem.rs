//! Problem records

use crate::dict::serde_dict;
use crate::error::{RecordError, Result};
use crate::grading;
use crate::limits::Limits;
use crate::scope::GuildScope;
use serde::{Deserialize, Serialize};

/// Tolerance used when a numeric problem doesn't specify one.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

const LINEAR_FORMAT_HELP: &str = "Answer with the value of each variable separated by single \
spaces, in order (for (var0, var1) = (3, 4) answer \"3 4\"). Values may be real or complex (1+2i).";

/// A question with one or more accepted answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    #[serde(deserialize_with = "crate::scope::required")]
    pub guild_id: GuildScope,
    pub question: String,
    pub answers: Vec<String>,
    pub author: i64,
    pub voters: Vec<i64>,
    pub solvers: Vec<i64>,
    #[serde(flatten)]
    pub kind: ProblemKind,
}

/// How a problem grades answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProblemKind {
    /// Exact string match.
    #[serde(rename = "BasicProblem")]
    Basic,
    /// Numeric match within an absolute or relative tolerance.
    #[serde(rename = "ComputationalProblem")]
    Computational { tolerance: f64 },
    /// Ordered tuple of values satisfying every equation.
    #[serde(rename = "LinearAlgebraProblem")]
    LinearAlgebra {
        coeffs: Vec<Vec<f64>>,
        equal_to: Vec<f64>,
        tolerance: f64,
    },
}

impl ProblemKind {
    pub fn computational() -> Self {
        ProblemKind::Computational {
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ProblemKind::Basic => "BasicProblem",
            ProblemKind::Computational { .. } => "ComputationalProblem",
            ProblemKind::LinearAlgebra { .. } => "LinearAlgebraProblem",
        }
    }
}

/// Fields a caller may change through [`Problem::edit`].
#[derive(Debug, Clone, Default)]
pub struct ProblemEdit {
    pub question: Option<String>,
    pub answers: Option<Vec<String>>,
}

impl Problem {
    pub fn new(
        id: i64,
        guild_id: GuildScope,
        question: impl Into<String>,
        answers: Vec<String>,
        author: i64,
        kind: ProblemKind,
        limits: &Limits,
    ) -> Result<Self> {
        let problem = Self {
            id,
            guild_id,
            question: question.into(),
            answers,
            author,
            voters: Vec::new(),
            solvers: Vec::new(),
            kind,
        };
        problem.validate(limits)?;
        Ok(problem)
    }

    /// Build a linear-system problem, rendering the question from the matrix.
    pub fn linear_system(
        id: i64,
        guild_id: GuildScope,
        author: i64,
        coeffs: Vec<Vec<f64>>,
        equal_to: Vec<f64>,
        limits: &Limits,
    ) -> Result<Self> {
        let width = coeffs
            .first()
            .map(Vec::len)
            .ok_or_else(|| RecordError::InvalidLinearSystem("no equations given".into()))?;
        if width == 0 {
            return Err(RecordError::InvalidLinearSystem("no variables given".into()));
        }
        if coeffs.len() != equal_to.len() {
            return Err(RecordError::InvalidLinearSystem(format!(
                "{} coefficient rows but {} right-hand sides",
                coeffs.len(),
                equal_to.len()
            )));
        }
        if coeffs.iter().any(|row| row.len() != width) {
            return Err(RecordError::InvalidLinearSystem(
                "coefficient matrix is not rectangular".into(),
            ));
        }

        let mut question = String::from("Solve the following system of equations:\n");
        for (row, rhs) in coeffs.iter().zip(&equal_to) {
            let mut first = true;
            for (i, &c) in row.iter().enumerate() {
                if c == 0.0 {
                    continue;
                }
                let sign = match (first, c < 0.0) {
                    (true, true) => "-",
                    (true, false) => "",
                    (false, true) => " - ",
                    (false, false) => " + ",
                };
                question.push_str(&format!("{}{}*var{}", sign, c.abs(), i));
                first = false;
            }
            if first {
                question.push('0');
            }
            question.push_str(&format!(" = {}\n", rhs));
        }
        question.push_str(LINEAR_FORMAT_HELP);

        Self::new(
            id,
            guild_id,
            question,
            Vec::new(),
            author,
            ProblemKind::LinearAlgebra {
                coeffs,
                equal_to,
                tolerance: DEFAULT_TOLERANCE,
            },
            limits,
        )
    }

    /// Identity of the problem within storage.
    pub fn key(&self) -> (GuildScope, i64) {
        (self.guild_id, self.id)
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        check_question(&self.question, limits)?;
        check_answers(&self.answers, limits)
    }

    /// Apply an edit after validating it. The problem is left untouched on
    /// error. Nothing is persisted.
    pub fn edit(&mut self, edit: ProblemEdit, limits: &Limits) -> Result<()> {
        if let Some(question) = &edit.question {
            check_question(question, limits)?;
        }
        if let Some(answers) = &edit.answers {
            check_answers(answers, limits)?;
        }
        if let Some(question) = edit.question {
            self.question = question;
        }
        if let Some(answers) = edit.answers {
            self.answers = answers;
        }
        Ok(())
    }

    pub fn add_answer(&mut self, answer: impl Into<String>, limits: &Limits) -> Result<()> {
        let mut answers = self.answers.clone();
        answers.push(answer.into());
        check_answers(&answers, limits)?;
        self.answers = answers;
        Ok(())
    }

    /// Returns false if the user had already voted.
    pub fn add_voter(&mut self, user_id: i64) -> bool {
        if self.is_voter(user_id) {
            return false;
        }
        self.voters.push(user_id);
        true
    }

    /// Returns false if the user had already solved the problem.
    pub fn add_solver(&mut self, user_id: i64) -> bool {
        if self.is_solver(user_id) {
            return false;
        }
        self.solvers.push(user_id);
        true
    }

    pub fn is_voter(&self, user_id: i64) -> bool {
        self.voters.contains(&user_id)
    }

    pub fn is_solver(&self, user_id: i64) -> bool {
        self.solvers.contains(&user_id)
    }

    pub fn is_author(&self, user_id: i64) -> bool {
        self.author == user_id
    }

    pub fn num_voters(&self) -> usize {
        self.voters.len()
    }

    pub fn check_answer(&self, answer: &str) -> bool {
        match &self.kind {
            ProblemKind::Basic => self.answers.iter().any(|a| a == answer),
            ProblemKind::Computational { tolerance } => {
                self.answers.iter().any(|a| a == answer)
                    || grading::check_numeric(answer, &self.answers, *tolerance)
            }
            ProblemKind::LinearAlgebra {
                coeffs,
                equal_to,
                tolerance,
            } => grading::check_linear_system(answer, coeffs, equal_to, *tolerance),
        }
    }
}

serde_dict!(Problem, "Problem");

fn check_question(question: &str, limits: &Limits) -> Result<()> {
    let len = question.chars().count();
    if len > limits.max_question_length {
        return Err(RecordError::TooLongQuestion {
            excess: len - limits.max_question_length,
            limit: limits.max_question_length,
        });
    }
    Ok(())
}

fn check_answers(answers: &[String], limits: &Limits) -> Result<()> {
    if answers.len() > limits.max_answers_per_problem {
        return Err(RecordError::TooManyAnswers {
            count: answers.len(),
            limit: limits.max_answers_per_problem,
        });
    }
    for (index, answer) in answers.iter().enumerate() {
        let len = answer.chars().count();
        if len > limits.max_answer_length {
            return Err(RecordError::TooLongAnswer {
                index,
                excess: len - limits.max_answer_length,
                limit: limits.max_answer_length,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictConvertible;

    fn sample(kind: ProblemKind) -> Problem {
        let mut problem = Problem::new(
            7,
            GuildScope::Guild(99),
            "What is 2+2?",
            vec!["4".to_string()],
            -123456789,
            kind,
            &Limits::default(),
        )
        .unwrap();
        problem.add_voter(1);
        problem.add_solver(2);
        problem
    }

    #[test]
    fn test_round_trip_every_kind() {
        let kinds = [
            ProblemKind::Basic,
            ProblemKind::computational(),
            ProblemKind::LinearAlgebra {
                coeffs: vec![vec![1.0, 2.0]],
                equal_to: vec![5.0],
                tolerance: 0.01,
            },
        ];
        for kind in kinds {
            let problem = sample(kind);
            let back = Problem::from_dict(&problem.to_dict()).unwrap();
            assert_eq!(back, problem);
        }
    }

    #[test]
    fn test_dict_layout() {
        let dict = sample(ProblemKind::computational()).to_dict();
        assert_eq!(dict["type"], "ComputationalProblem");
        assert_eq!(dict["guild_id"], 99);
        assert_eq!(dict["tolerance"], 0.001);
        assert_eq!(dict["voters"], serde_json::json!([1]));

        let global = Problem::new(
            1,
            GuildScope::Global,
            "q",
            vec![],
            1,
            ProblemKind::Basic,
            &Limits::default(),
        )
        .unwrap();
        assert!(global.to_dict()["guild_id"].is_null());
    }

    #[test]
    fn test_from_dict_rejects_missing_key() {
        let mut dict = sample(ProblemKind::Basic).to_dict();
        dict.remove("question");
        let err = Problem::from_dict(&dict).unwrap_err();
        match err {
            RecordError::Format { record, detail } => {
                assert_eq!(record, "Problem");
                assert!(detail.contains("question"), "{}", detail);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_dict_requires_guild_id_key() {
        let mut dict = sample(ProblemKind::Basic).to_dict();
        dict.insert("guild_id".into(), serde_json::Value::Null);
        assert!(Problem::from_dict(&dict).unwrap().guild_id.is_global());

        dict.remove("guild_id");
        match Problem::from_dict(&dict).unwrap_err() {
            RecordError::Format { record, detail } => {
                assert_eq!(record, "Problem");
                assert!(detail.contains("guild_id"), "{}", detail);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_dict_rejects_unknown_type() {
        let mut dict = sample(ProblemKind::Basic).to_dict();
        dict.insert("type".into(), "WrittenProblem".into());
        assert!(matches!(
            Problem::from_dict(&dict),
            Err(RecordError::Format { .. })
        ));
    }

    #[test]
    fn test_length_limits_are_enforced() {
        let limits = Limits {
            max_question_length: 5,
            max_answer_length: 3,
            max_answers_per_problem: 2,
            ..Limits::default()
        };
        let err = Problem::new(1, GuildScope::Global, "too long", vec![], 1, ProblemKind::Basic, &limits)
            .unwrap_err();
        assert_eq!(err, RecordError::TooLongQuestion { excess: 3, limit: 5 });

        let err = Problem::new(
            1,
            GuildScope::Global,
            "ok",
            vec!["1".into(), "2345".into()],
            1,
            ProblemKind::Basic,
            &limits,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::TooLongAnswer {
                index: 1,
                excess: 1,
                limit: 3
            }
        );

        let mut problem =
            Problem::new(1, GuildScope::Global, "ok", vec!["1".into()], 1, ProblemKind::Basic, &limits)
                .unwrap();
        problem.add_answer("2", &limits).unwrap();
        assert!(matches!(
            problem.add_answer("3", &limits),
            Err(RecordError::TooManyAnswers { count: 3, limit: 2 })
        ));
        assert_eq!(problem.answers.len(), 2);
    }

    #[test]
    fn test_edit_is_atomic() {
        let limits = Limits {
            max_question_length: 10,
            ..Limits::default()
        };
        let mut problem = sample(ProblemKind::Basic);
        let result = problem.edit(
            ProblemEdit {
                question: Some("short".into()),
                answers: Some(vec!["x".repeat(2000)]),
            },
            &limits,
        );
        assert!(result.is_err());
        assert_eq!(problem.question, "What is 2+2?");

        problem
            .edit(
                ProblemEdit {
                    question: Some("1+1?".into()),
                    answers: None,
                },
                &limits,
            )
            .unwrap();
        assert_eq!(problem.question, "1+1?");
        assert_eq!(problem.answers, vec!["4".to_string()]);
    }

    #[test]
    fn test_voters_and_solvers_are_sets() {
        let mut problem = sample(ProblemKind::Basic);
        assert!(!problem.add_voter(1));
        assert!(problem.add_voter(3));
        assert_eq!(problem.num_voters(), 2);
        assert!(problem.is_solver(2));
        assert!(!problem.add_solver(2));
        assert!(problem.is_author(-123456789));
    }

    #[test]
    fn test_computational_grading() {
        let problem = sample(ProblemKind::Computational { tolerance: 0.001 });
        assert!(problem.check_answer("4"));
        assert!(problem.check_answer("4.0005"));
        assert!(!problem.check_answer("4.01"));

        let basic = sample(ProblemKind::Basic);
        assert!(!basic.check_answer("4.0005"));
    }

    #[test]
    fn test_linear_system_problem() {
        let problem = Problem::linear_system(
            3,
            GuildScope::Global,
            1,
            vec![vec![1.0, 1.0], vec![1.0, -1.0]],
            vec![3.0, 1.0],
            &Limits::default(),
        )
        .unwrap();
        assert!(problem.question.contains("1*var0 + 1*var1 = 3"));
        assert!(problem.question.contains("1*var0 - 1*var1 = 1"));
        assert!(problem
            .question
            .starts_with("Solve the following system of equations:\n1*var0 + 1*var1 = 3\n1*var0 - 1*var1 = 1\nAnswer"));
        assert!(problem.check_answer("2 1"));
        assert!(!problem.check_answer("1 2"));

        let ragged = Problem::linear_system(
            3,
            GuildScope::Global,
            1,
            vec![vec![1.0, 1.0], vec![1.0]],
            vec![3.0, 1.0],
            &Limits::default(),
        );
        assert!(matches!(ragged, Err(RecordError::InvalidLinearSystem(_))));
    }
}
