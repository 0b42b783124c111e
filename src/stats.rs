//! Bounded history of batch performance entries
//!
//! Recording is best-effort: a storage failure is logged and swallowed so it
//! can never turn a successful batch into a failed one.

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{clamp_retention, PerfEntry, RunSummary};
use crate::storage::Store;

/// Round to two decimal places
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the entry recorded for one batch
pub fn create_perf_entry(summary: &RunSummary) -> PerfEntry {
    PerfEntry {
        timestamp: Utc::now(),
        emails: summary.emails,
        rules: summary.rules,
        match_checks: summary.match_checks,
        rule_matches: summary.rule_matches,
        processed_count: summary.processed,
        duration_ms: round2(summary.duration_ms),
    }
}

/// Append `entry` and keep only the newest `limit` entries
pub fn append_bounded(entries: &mut Vec<PerfEntry>, entry: PerfEntry, limit: usize) {
    entries.push(entry);
    let limit = clamp_retention(limit);
    if entries.len() > limit {
        let excess = entries.len() - limit;
        entries.drain(..excess);
    }
}

/// Aggregate view over recorded entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsTotals {
    pub runs: usize,
    pub emails: usize,
    pub match_checks: usize,
    pub rule_matches: usize,
    pub processed: usize,
    pub avg_duration_ms: f64,
}

impl StatsTotals {
    pub fn from_entries(entries: &[PerfEntry]) -> Self {
        let mut totals = Self {
            runs: entries.len(),
            ..Default::default()
        };
        let mut duration = 0.0;
        for entry in entries {
            totals.emails += entry.emails;
            totals.match_checks += entry.match_checks;
            totals.rule_matches += entry.rule_matches;
            totals.processed += entry.processed_count;
            duration += entry.duration_ms;
        }
        if totals.runs > 0 {
            totals.avg_duration_ms = round2(duration / totals.runs as f64);
        }
        totals
    }
}

/// Persists one [`PerfEntry`] per batch under the `perfStats` key
#[derive(Clone)]
pub struct StatsRecorder {
    store: Store,
}

impl StatsRecorder {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record a batch summary; failures are logged, never returned
    pub async fn record(&self, summary: &RunSummary) {
        if let Err(e) = self.try_record(summary).await {
            warn!("Failed to record performance stats: {}", e);
        }
    }

    async fn try_record(&self, summary: &RunSummary) -> Result<()> {
        let entry = create_perf_entry(summary);
        let limit = self.store.load_settings().await?.retention_limit();
        let mut entries = self.store.load_perf_stats().await?;

        append_bounded(&mut entries, entry, limit);
        self.store.save_perf_stats(&entries).await?;

        debug!(
            entries = entries.len(),
            limit, "Recorded performance entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GmailError;
    use crate::models::Settings;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    fn summary(processed: usize, duration_ms: f64) -> RunSummary {
        RunSummary {
            processed,
            duration_ms,
            match_checks: 6,
            rule_matches: processed,
            emails: 3,
            rules: 2,
        }
    }

    fn entry(n: usize) -> PerfEntry {
        create_perf_entry(&summary(n, 1.0))
    }

    #[test]
    fn test_duration_rounded_to_two_decimals() {
        assert_eq!(create_perf_entry(&summary(1, 12.3456)).duration_ms, 12.35);
        assert_eq!(create_perf_entry(&summary(1, 0.004)).duration_ms, 0.0);
        let e = create_perf_entry(&summary(2, 7.0));
        assert_eq!(e.processed_count, 2);
        assert_eq!(e.match_checks, 6);
        assert_eq!(e.emails, 3);
    }

    #[test]
    fn test_append_bounded_drops_oldest() {
        let mut entries: Vec<PerfEntry> = (0..5).map(entry).collect();
        append_bounded(&mut entries, entry(5), 5);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.first().unwrap().processed_count, 1);
        assert_eq!(entries.last().unwrap().processed_count, 5);
    }

    #[test]
    fn test_append_bounded_clamps_limit() {
        let mut entries = Vec::new();
        for i in 0..10 {
            append_bounded(&mut entries, entry(i), 0);
        }
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].processed_count, 5);
    }

    #[tokio::test]
    async fn test_record_respects_retention_setting() {
        let store = Store::in_memory();
        let settings = Settings {
            perf_retention_limit: 7,
            ..Default::default()
        };
        store.save_settings(&settings).await.unwrap();

        let recorder = StatsRecorder::new(store.clone());
        for i in 0..12 {
            recorder.record(&summary(i, 2.5)).await;
        }

        let entries = store.load_perf_stats().await.unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0].processed_count, 5);
        assert_eq!(entries[6].processed_count, 11);
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<()> {
            Err(GmailError::StorageError("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_record_swallows_storage_failure() {
        let recorder = StatsRecorder::new(Store::new(Arc::new(FailingStorage)));
        // Must not panic or propagate
        recorder.record(&summary(1, 1.0)).await;
    }

    #[test]
    fn test_totals() {
        let entries = vec![
            create_perf_entry(&summary(1, 10.0)),
            create_perf_entry(&summary(3, 20.0)),
        ];
        let totals = StatsTotals::from_entries(&entries);
        assert_eq!(totals.runs, 2);
        assert_eq!(totals.emails, 6);
        assert_eq!(totals.processed, 4);
        assert_eq!(totals.avg_duration_ms, 15.0);
        assert_eq!(StatsTotals::from_entries(&[]), StatsTotals::default());
    }
}
