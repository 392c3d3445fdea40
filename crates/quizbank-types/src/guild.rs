//! Per-guild settings

use crate::dict::serde_dict;
use serde::{Deserialize, Serialize};

pub const ADMINISTRATOR_PERMISSION: &str = "administrator";

/// Describes who may pass a guild-level permission check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckForUserPassage {
    pub blacklisted_users: Vec<i64>,
    pub whitelisted_users: Vec<i64>,
    /// Empty means no role is required.
    pub roles_allowed: Vec<i64>,
    pub permissions_needed: Vec<String>,
}

impl CheckForUserPassage {
    /// Requires the administrator permission.
    pub fn default_mod_check() -> Self {
        Self {
            permissions_needed: vec![ADMINISTRATOR_PERMISSION.to_string()],
            ..Self::default()
        }
    }

    pub fn allows(&self, user_id: i64, roles: &[i64], permissions: &[&str]) -> bool {
        if self.blacklisted_users.contains(&user_id) {
            return false;
        }
        if self.whitelisted_users.contains(&user_id) {
            return true;
        }
        let has_role =
            self.roles_allowed.is_empty() || roles.iter().any(|r| self.roles_allowed.contains(r));
        has_role
            && self
                .permissions_needed
                .iter()
                .all(|needed| permissions.contains(&needed.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildData {
    pub guild_id: i64,
    pub blacklisted: bool,
    pub can_create_problems_check: CheckForUserPassage,
    pub can_create_quizzes_check: CheckForUserPassage,
    pub mods_check: CheckForUserPassage,
}

impl GuildData {
    pub fn default_for(guild_id: i64) -> Self {
        Self {
            guild_id,
            blacklisted: false,
            can_create_problems_check: CheckForUserPassage::default(),
            can_create_quizzes_check: CheckForUserPassage::default(),
            mods_check: CheckForUserPassage::default_mod_check(),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default_for(self.guild_id)
    }
}

serde_dict!(GuildData, "GuildData");
