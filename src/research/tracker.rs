//! Completion tracking
//!
//! Derives a run's completion view from the manifest and the outcome records
//! currently in the store. The view is recomputed on every poll and never
//! persisted on its own; a failed outcome counts toward completion exactly
//! like a successful one, because both mean the work item finished.

use crate::store::paths::{date_prefix, manifest_key, outcome_prefix, DatePartition, OutcomeState};
use crate::store::{get_json, ObjectStore};
use crate::types::{Completion, CompletionStatus, Manifest, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

pub struct CompletionTracker<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> CompletionTracker<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Load the manifest for a run, or `None` when the run does not exist.
    pub async fn manifest(&self, date: DatePartition, run_id: &str) -> Result<Option<Manifest>> {
        get_json(self.store, &manifest_key(date, run_id)).await
    }

    /// Compute the completion view for a run.
    ///
    /// A manifest with no expected files classifies as incomplete with rate
    /// 0, never as complete. Records beyond the expected set (stale retries,
    /// manual uploads) inflate the counts but never produce phantom missing
    /// entries.
    pub async fn check(
        &self,
        date: DatePartition,
        run_id: &str,
        minimum_rate: f64,
    ) -> Result<CompletionStatus> {
        let Some(manifest) = self.manifest(date, run_id).await? else {
            return Ok(CompletionStatus::not_found(run_id));
        };

        let success_keys = self
            .store
            .list(&outcome_prefix(date, run_id, OutcomeState::Success))
            .await?;
        let failed_keys = self
            .store
            .list(&outcome_prefix(date, run_id, OutcomeState::Failed))
            .await?;

        let total_expected = manifest.expected_files.len();
        let success_count = success_keys.len();
        let failed_count = failed_keys.len();
        let total_completed = success_count + failed_count;

        let completion_rate = if total_expected > 0 {
            total_completed as f64 / total_expected as f64
        } else {
            0.0
        };

        let status = if total_expected == 0 {
            Completion::Incomplete
        } else if completion_rate >= 1.0 {
            Completion::Complete
        } else if completion_rate >= minimum_rate {
            Completion::Acceptable
        } else {
            Completion::Incomplete
        };

        let present: HashSet<String> = success_keys
            .into_iter()
            .chain(failed_keys)
            .collect();
        let missing = manifest
            .expected_files
            .iter()
            .filter(|path| {
                !present.contains(&path.render())
                    && !present.contains(&path.failed_variant().render())
            })
            .cloned()
            .collect();

        debug!(
            run_id = %run_id,
            expected = total_expected,
            success = success_count,
            failed = failed_count,
            rate = completion_rate,
            "Computed completion status"
        );

        Ok(CompletionStatus {
            status,
            run_id: run_id.to_string(),
            total_expected,
            success_count,
            failed_count,
            total_completed,
            completion_rate,
            missing,
        })
    }

    /// Find the most recent run for a date by manifest timestamp.
    ///
    /// Run ids are random, so their lexical order says nothing about recency;
    /// the manifest timestamp decides, with lexical order only breaking exact
    /// ties. Runs without a readable manifest are skipped.
    pub async fn most_recent_run(&self, date: DatePartition) -> Result<Option<String>> {
        let keys = self.store.list(&date_prefix(date)).await?;

        let mut run_ids: Vec<&str> = keys
            .iter()
            .filter_map(|key| key.split('/').nth(4))
            .collect();
        run_ids.sort_unstable();
        run_ids.dedup();

        let mut best: Option<(chrono::DateTime<chrono::Utc>, String)> = None;
        for run_id in run_ids {
            let Some(manifest) = self.manifest(date, run_id).await? else {
                warn!(run_id = %run_id, "Run has records but no manifest, skipping");
                continue;
            };
            let candidate = (manifest.timestamp, run_id.to_string());
            if best.as_ref().is_none_or(|b| candidate > *b) {
                best = Some(candidate);
            }
        }

        Ok(best.map(|(_, run_id)| run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths::OutcomePath;
    use crate::store::{put_json, MemoryStore};
    use chrono::{Duration, Utc};

    async fn seed_run(
        store: &MemoryStore,
        date: DatePartition,
        run_id: &str,
        topics: &[&str],
        offset_secs: i64,
    ) -> Manifest {
        let manifest = Manifest {
            total_sub_topics: topics.len(),
            project_count: 1,
            run_id: run_id.to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            expected_files: topics
                .iter()
                .map(|t| OutcomePath::expected(date, run_id, "proj", t))
                .collect(),
        };
        put_json(store, &manifest_key(date, run_id), &manifest)
            .await
            .unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let store = MemoryStore::new();
        let tracker = CompletionTracker::new(&store);

        let status = tracker
            .check(DatePartition::today(), "ghost-run", 0.8)
            .await
            .unwrap();
        assert_eq!(status.status, Completion::NotFound);
        assert_eq!(status.completion_rate, 0.0);
    }

    #[tokio::test]
    async fn test_classification_and_missing_list() {
        let store = MemoryStore::new();
        let date = DatePartition::today();
        let manifest = seed_run(&store, date, "run-1", &["a1 topic", "b2 topic", "c3 topic", "d4 topic"], 0).await;

        // Two successes, one failure, one still outstanding.
        put_json(&store, &manifest.expected_files[0].render(), &serde_json::json!({}))
            .await
            .unwrap();
        put_json(&store, &manifest.expected_files[1].render(), &serde_json::json!({}))
            .await
            .unwrap();
        put_json(
            &store,
            &manifest.expected_files[2].failed_variant().render(),
            &serde_json::json!({}),
        )
        .await
        .unwrap();

        let tracker = CompletionTracker::new(&store);
        let status = tracker.check(date, "run-1", 0.7).await.unwrap();

        assert_eq!(status.status, Completion::Acceptable);
        assert_eq!(status.success_count, 2);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.completion_rate, 0.75);
        assert_eq!(status.missing, vec![manifest.expected_files[3].clone()]);

        // A stricter minimum flips the same counts to incomplete.
        let status = tracker.check(date, "run-1", 0.8).await.unwrap();
        assert_eq!(status.status, Completion::Incomplete);

        // Completing the last item flips to complete.
        put_json(&store, &manifest.expected_files[3].render(), &serde_json::json!({}))
            .await
            .unwrap();
        let status = tracker.check(date, "run-1", 0.8).await.unwrap();
        assert_eq!(status.status, Completion::Complete);
        assert!(status.missing.is_empty());
    }

    #[tokio::test]
    async fn test_empty_manifest_is_incomplete() {
        let store = MemoryStore::new();
        let date = DatePartition::today();
        seed_run(&store, date, "run-empty", &[], 0).await;

        let tracker = CompletionTracker::new(&store);
        let status = tracker.check(date, "run-empty", 0.8).await.unwrap();
        assert_eq!(status.status, Completion::Incomplete);
        assert_eq!(status.completion_rate, 0.0);
    }

    #[tokio::test]
    async fn test_extra_records_do_not_break_tracking() {
        let store = MemoryStore::new();
        let date = DatePartition::today();
        let manifest = seed_run(&store, date, "run-extra", &["only topic"], 0).await;

        put_json(&store, &manifest.expected_files[0].render(), &serde_json::json!({}))
            .await
            .unwrap();
        let stray = OutcomePath::expected(date, "run-extra", "proj", "unplanned topic");
        put_json(&store, &stray.render(), &serde_json::json!({}))
            .await
            .unwrap();

        let tracker = CompletionTracker::new(&store);
        let status = tracker.check(date, "run-extra", 0.8).await.unwrap();
        assert_eq!(status.status, Completion::Complete);
        assert_eq!(status.success_count, 2);
        assert!(status.missing.is_empty());
    }

    #[tokio::test]
    async fn test_most_recent_run_uses_manifest_timestamp() {
        let store = MemoryStore::new();
        let date = DatePartition::today();
        // Lexically larger run id, but older manifest.
        seed_run(&store, date, "zzz-older", &["topic one"], -3600).await;
        seed_run(&store, date, "aaa-newer", &["topic two"], 0).await;

        let tracker = CompletionTracker::new(&store);
        let recent = tracker.most_recent_run(date).await.unwrap();
        assert_eq!(recent.as_deref(), Some("aaa-newer"));
    }

    #[tokio::test]
    async fn test_most_recent_run_with_no_runs() {
        let store = MemoryStore::new();
        let tracker = CompletionTracker::new(&store);
        assert!(tracker
            .most_recent_run(DatePartition::today())
            .await
            .unwrap()
            .is_none());
    }
}
