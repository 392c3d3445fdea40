//! Lookup commands - author records and permission checks

use anyhow::{Context, Result};
use quizbank_store::ProblemCache;

/// Parse `field=true` / `field=false`.
pub fn parse_requirement(raw: &str) -> std::result::Result<(String, bool), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=true|false, got `{}`", raw))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in `{}`", raw));
    }
    let value = value
        .trim()
        .parse::<bool>()
        .map_err(|_| format!("`{}` is not true or false", value.trim()))?;
    Ok((field.to_string(), value))
}

pub async fn author(cache: &ProblemCache, user_id: i64) -> Result<()> {
    let records = cache
        .get_all_by_author_id(user_id)
        .await
        .with_context(|| format!("Failed to collect records for user {}", user_id))?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn permissions(
    cache: &ProblemCache,
    user_id: i64,
    requirements: &[(String, bool)],
) -> Result<()> {
    let allowed = cache
        .user_meets_permissions_required(
            user_id,
            requirements.iter().map(|(field, value)| (field.as_str(), *value)),
        )
        .await
        .with_context(|| format!("Failed to load user {}", user_id))?;

    println!(
        "User {} {} the requirements",
        user_id,
        if allowed { "meets" } else { "does not meet" }
    );
    Ok(())
}
