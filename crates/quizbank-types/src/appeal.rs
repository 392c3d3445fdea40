//! Moderation appeals

use crate::dict::serde_dict;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppealType {
    BlacklistAppeal,
    GuildBlacklistAppeal,
    SupportServerBan,
    SupportServerMiscPunishment,
    Other,
}

/// A user's appeal. Immutable once filed except by explicit overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    pub special_id: i64,
    pub user_id: i64,
    pub appeal_type: AppealType,
    pub appeal_msg: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Ordinal of this appeal among the user's appeals.
    pub appeal_num: u32,
}

serde_dict!(Appeal, "Appeal");
