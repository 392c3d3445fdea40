//! Per-user moderation data

use crate::dict::{serde_dict, DictConvertible};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: i64,
    pub trusted: bool,
    pub blacklisted: bool,
}

impl UserData {
    /// Untrusted and not blacklisted.
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            trusted: false,
            blacklisted: false,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default_for(self.user_id)
    }

    /// Every requirement must name a boolean field holding exactly the
    /// required value. Unknown fields never match.
    pub fn meets<'a, I>(&self, requirements: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let dict = self.to_dict();
        requirements
            .into_iter()
            .all(|(field, wanted)| matches!(dict.get(field), Some(Value::Bool(v)) if *v == wanted))
    }
}

serde_dict!(UserData, "UserData");
