//! Raw query command - print rows as JSON lines

use anyhow::{Context, Result};
use quizbank_store::ProblemCache;

pub async fn raw_query(cache: &ProblemCache, query: &str) -> Result<()> {
    let rows = cache
        .run_raw_query(query)
        .await
        .context("Raw query failed")?;

    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    tracing::info!("{} rows", rows.len());
    Ok(())
}
