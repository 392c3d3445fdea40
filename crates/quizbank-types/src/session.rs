//! Quiz solving sessions

use crate::dict::serde_dict;
use crate::error::{RecordError, Result};
use crate::quiz::QuizDescription;
use crate::scope::GuildScope;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest representable expiry, 9999-12-31T23:59:59.999Z.
const FAR_FUTURE_MILLIS: i64 = 253_402_300_799_999;

/// Where a session is in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Overtime,
    Finished,
}

/// One user's attempt at one quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSolvingSession {
    pub session_id: String,
    pub user_id: i64,
    pub quiz_id: i64,
    #[serde(deserialize_with = "crate::scope::required")]
    pub guild_id: GuildScope,
    pub attempt_num: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expire_time: DateTime<Utc>,
    /// Submitted answers keyed by problem index.
    pub answers: BTreeMap<u32, String>,
    pub is_finished: bool,
}

impl QuizSolvingSession {
    /// Start a session at `now`. The expiry is derived from the quiz's time
    /// limit and saturates instead of overflowing.
    pub fn start(
        user_id: i64,
        description: &QuizDescription,
        attempt_num: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let start_time = now.trunc_subsecs(3);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            quiz_id: description.quiz_id,
            guild_id: description.guild_id,
            attempt_num,
            start_time,
            expire_time: expiry(start_time, description.time_limit),
            answers: BTreeMap::new(),
            is_finished: false,
        }
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_finished {
            SessionState::Finished
        } else if self.is_overtime_at(now) {
            SessionState::Overtime
        } else {
            SessionState::Active
        }
    }

    pub fn is_overtime_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_time
    }

    pub fn is_editable_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.state_at(Utc::now())
    }

    pub fn is_overtime(&self) -> bool {
        self.is_overtime_at(Utc::now())
    }

    pub fn is_editable(&self) -> bool {
        self.is_editable_at(Utc::now())
    }

    fn ensure_active(&self, now: DateTime<Utc>) -> Result<()> {
        match self.state_at(now) {
            SessionState::Active => Ok(()),
            SessionState::Finished => Err(RecordError::SessionFinished),
            SessionState::Overtime => Err(RecordError::SessionOvertime {
                expired_at: self.expire_time,
            }),
        }
    }

    /// Record an answer, replacing any earlier answer to the same problem.
    pub fn submit_answer_at(
        &mut self,
        index: u32,
        answer: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_active(now)?;
        self.answers.insert(index, answer.into());
        Ok(())
    }

    pub fn finish_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active(now)?;
        self.is_finished = true;
        Ok(())
    }

    pub fn answer(&self, index: u32) -> Option<&str> {
        self.answers.get(&index).map(String::as_str)
    }
}

serde_dict!(QuizSolvingSession, "QuizSolvingSession");

fn expiry(start: DateTime<Utc>, time_limit: u64) -> DateTime<Utc> {
    let far_future = DateTime::<Utc>::from_timestamp_millis(FAR_FUTURE_MILLIS)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    i64::try_from(time_limit)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|limit| start.checked_add_signed(limit))
        .filter(|expire| *expire < far_future)
        .unwrap_or(far_future)
}
