//! Maintenance commands - background save and vote-threshold sweep

use anyhow::{Context, Result};
use quizbank_core::CacheError;
use quizbank_store::ProblemCache;
use tokio_util::sync::CancellationToken;

pub async fn bgsave(cache: &ProblemCache, schedule: bool) -> Result<()> {
    match cache.bgsave(schedule).await {
        Ok(()) => println!("Background save requested"),
        // Every SQL write is already durable.
        Err(CacheError::Unsupported { backend, .. }) => {
            println!("The {} backend does not need background saves", backend)
        }
        Err(e) => return Err(e).context("Background save failed"),
    }
    Ok(())
}

pub async fn apply_threshold(
    cache: &ProblemCache,
    votes: Option<usize>,
    cancel: &CancellationToken,
) -> Result<()> {
    let threshold = votes.unwrap_or(cache.limits().default_vote_threshold);
    let removed = cache
        .apply_vote_threshold_until_cancelled(threshold, cancel)
        .await
        .with_context(|| format!("Vote threshold sweep ({} votes) failed", threshold))?;

    println!(
        "Removed {} global problems with at least {} votes",
        removed.len(),
        threshold
    );
    for id in removed {
        println!("  {}", id);
    }
    Ok(())
}
