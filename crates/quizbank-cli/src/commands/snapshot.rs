//! Snapshot commands - export and import the whole cache as JSON

use anyhow::{Context, Result};
use quizbank_store::{CacheSnapshot, ImportMode, ProblemCache};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn export(cache: &ProblemCache, path: &Path, cancel: &CancellationToken) -> Result<usize> {
    let snapshot = cache
        .export_snapshot_until_cancelled(cancel)
        .await
        .context("Export failed")?;

    let json = serde_json::to_string_pretty(&snapshot)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(snapshot.len())
}

pub async fn import(
    cache: &ProblemCache,
    path: &Path,
    replace: bool,
    cancel: &CancellationToken,
) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: CacheSnapshot = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a quizbank snapshot", path.display()))?;

    let mode = if replace {
        ImportMode::Replace
    } else {
        ImportMode::Merge
    };
    cache
        .import_snapshot_until_cancelled(&snapshot, mode, cancel)
        .await
        .context("Import failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizbank_core::{GuildScope, Limits, Problem, ProblemKind, UserData};
    use quizbank_store::KvBackend;

    fn memory_cache() -> ProblemCache {
        let limits = Limits::default();
        ProblemCache::new(Box::new(KvBackend::memory(limits)), limits)
    }

    #[tokio::test]
    async fn test_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let cancel = CancellationToken::new();

        let source = memory_cache();
        let problem = Problem::new(
            1,
            GuildScope::Guild(2),
            "1 + 1?",
            vec!["2".into()],
            7,
            ProblemKind::Basic,
            &Limits::default(),
        )
        .unwrap();
        source.add_problem(1, &problem).await.unwrap();
        source.add_user_data(&UserData::default_for(7)).await.unwrap();

        assert_eq!(export(&source, &path, &cancel).await.unwrap(), 2);

        let target = memory_cache();
        target.add_user_data(&UserData::default_for(8)).await.unwrap();
        assert_eq!(import(&target, &path, true, &cancel).await.unwrap(), 2);
        assert_eq!(
            target.get_problem(GuildScope::Guild(2), 1).await.unwrap(),
            problem
        );
        assert!(target.get_user_data(8, None).await.is_err());
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = import(&memory_cache(), &path, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is not a quizbank snapshot"));
    }

    #[tokio::test]
    async fn test_cancelled_export_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(export(&memory_cache(), &path, &cancel).await.is_err());
        assert!(!path.exists());
    }
}
