//! Quiz session engine
//!
//! Starts, advances and grades quiz solving sessions, persisting every
//! change through the cache. Session state is never cached: it is
//! recomputed from the clock on each call.

use crate::cache::ProblemCache;
use chrono::{DateTime, Utc};
use quizbank_core::{CacheError, CacheResult as Result, QuizSolvingSession, SessionState};
use serde::Serialize;
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Result of grading one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionGrade {
    pub session_id: String,
    pub correct: usize,
    pub total: usize,
}

impl SessionGrade {
    pub fn is_perfect(&self) -> bool {
        self.correct == self.total
    }
}

pub struct QuizSessionEngine<C: Clock = SystemClock> {
    cache: Arc<ProblemCache>,
    clock: C,
}

impl QuizSessionEngine<SystemClock> {
    pub fn new(cache: Arc<ProblemCache>) -> Self {
        Self::with_clock(cache, SystemClock)
    }
}

impl<C: Clock> QuizSessionEngine<C> {
    pub fn with_clock(cache: Arc<ProblemCache>, clock: C) -> Self {
        Self { cache, clock }
    }

    /// Start and store a new attempt. Fails with `NotFound` when the quiz
    /// (and so its time limit) cannot be loaded.
    pub async fn start_session(
        &self,
        user_id: i64,
        quiz_id: i64,
        attempt_num: u32,
    ) -> Result<QuizSolvingSession> {
        let description = self.cache.get_quiz_description(quiz_id).await?;
        let session =
            QuizSolvingSession::start(user_id, &description, attempt_num, self.clock.now());
        self.cache.add_quiz_session(&session).await?;

        tracing::info!(
            "User {} started quiz {} (attempt {}, session {})",
            user_id,
            quiz_id,
            attempt_num,
            session.session_id
        );
        Ok(session)
    }

    /// Record an answer for the problem at `index`. `session` is only
    /// updated once the change is stored.
    pub async fn submit_answer(
        &self,
        session: &mut QuizSolvingSession,
        index: u32,
        answer: impl Into<String>,
    ) -> Result<()> {
        let quiz = self.cache.get_quiz(session.quiz_id).await?;
        if index as usize >= quiz.len() {
            return Err(CacheError::InvalidInput(format!(
                "quiz {} has no problem at index {}",
                quiz.id(),
                index
            )));
        }

        let mut next = session.clone();
        next.submit_answer_at(index, answer, self.clock.now())?;
        self.cache.update_quiz_session(&next).await?;
        *session = next;
        Ok(())
    }

    /// Close the session for good.
    pub async fn finish(&self, session: &mut QuizSolvingSession) -> Result<()> {
        let mut next = session.clone();
        next.finish_at(self.clock.now())?;
        self.cache.update_quiz_session(&next).await?;
        *session = next;

        tracing::info!("Session {} finished", session.session_id);
        Ok(())
    }

    /// Count correct answers against the quiz's problems.
    pub async fn grade(&self, session: &QuizSolvingSession) -> Result<SessionGrade> {
        let quiz = self.cache.get_quiz(session.quiz_id).await?;
        let correct = quiz
            .problems()
            .iter()
            .enumerate()
            .filter(|(index, problem)| {
                session
                    .answer(*index as u32)
                    .is_some_and(|answer| problem.check_answer(answer))
            })
            .count();

        Ok(SessionGrade {
            session_id: session.session_id.clone(),
            correct,
            total: quiz.len(),
        })
    }

    pub fn state(&self, session: &QuizSolvingSession) -> SessionState {
        session.state_at(self.clock.now())
    }

    pub fn is_editable(&self, session: &QuizSolvingSession) -> bool {
        session.is_editable_at(self.clock.now())
    }
}
