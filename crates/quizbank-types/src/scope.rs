//! Guild scope of a problem

use crate::error::RecordError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// The community a record belongs to, or the global pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<i64>", into = "Option<i64>")]
pub enum GuildScope {
    Global,
    Guild(i64),
}

impl GuildScope {
    /// Key segment used in SQL rows and key-value keys.
    pub const GLOBAL_KEY: &'static str = "global";

    pub fn is_global(&self) -> bool {
        matches!(self, GuildScope::Global)
    }

    pub fn guild_id(&self) -> Option<i64> {
        match self {
            GuildScope::Global => None,
            GuildScope::Guild(id) => Some(*id),
        }
    }
}

/// `deserialize_with` for record fields: `null` means global, but the key
/// itself must be present.
pub(crate) fn required<'de, D>(deserializer: D) -> Result<GuildScope, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(GuildScope::from)
}

impl From<Option<i64>> for GuildScope {
    fn from(value: Option<i64>) -> Self {
        match value {
            Some(id) => GuildScope::Guild(id),
            None => GuildScope::Global,
        }
    }
}

impl From<GuildScope> for Option<i64> {
    fn from(scope: GuildScope) -> Self {
        scope.guild_id()
    }
}

impl fmt::Display for GuildScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuildScope::Global => f.write_str(Self::GLOBAL_KEY),
            GuildScope::Guild(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for GuildScope {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::GLOBAL_KEY {
            return Ok(GuildScope::Global);
        }
        s.parse::<i64>()
            .map(GuildScope::Guild)
            .map_err(|_| RecordError::InvalidScope(s.to_string()))
    }
}
