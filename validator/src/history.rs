//! Retention-bounded in-memory validation history (spec.md §3, §4.6, §9).
//!
//! "Mutable history under retention": an append-with-prune double-ended
//! structure, guarded by a single mutex. Reads for `get_results_for_window`
//! copy out the needed slice rather than holding the lock across await
//! points.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::model::ValidationResult;

pub struct ValidationHistory {
    retention_seconds: i64,
    entries: Mutex<VecDeque<ValidationResult>>,
}

impl ValidationHistory {
    pub fn new(retention_seconds: i64) -> Self {
        Self {
            retention_seconds,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends one result and prunes every entry older than
    /// `now - retention_seconds` (spec.md §3 invariant).
    pub async fn append(&self, result: ValidationResult) {
        let mut entries = self.entries.lock().await;
        entries.push_back(result);
        Self::prune_locked(&mut entries, self.retention_seconds);
    }

    fn prune_locked(entries: &mut VecDeque<ValidationResult>, retention_seconds: i64) {
        let cutoff = Utc::now() - chrono::Duration::seconds(retention_seconds);
        while matches!(entries.front(), Some(e) if e.timestamp < cutoff) {
            entries.pop_front();
        }
    }

    /// Returns entries with `from_ts <= timestamp < to_ts` (half-open,
    /// spec.md §8 "Window half-open").
    pub async fn get_results_for_window(
        &self,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Vec<ValidationResult> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|e| e.timestamp >= from_ts && e.timestamp < to_ts)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result_at(order_id: &str, timestamp: DateTime<Utc>) -> ValidationResult {
        let mut r = ValidationResult::new(order_id, "solver", Some("miner".to_owned()), true, None);
        r.timestamp = timestamp;
        r
    }

    #[tokio::test]
    async fn prunes_entries_older_than_retention() {
        let history = ValidationHistory::new(60);
        let old = Utc::now() - Duration::seconds(120);
        history.append(result_at("old", old)).await;
        history.append(result_at("new", Utc::now())).await;
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn window_is_half_open() {
        let history = ValidationHistory::new(7200);
        let base = Utc::now();
        history.append(result_at("a", base)).await;
        history.append(result_at("b", base + Duration::seconds(10))).await;

        let results = history
            .get_results_for_window(base, base + Duration::seconds(10))
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].order_id, "a");
    }
}
