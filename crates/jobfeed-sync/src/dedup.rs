//! Advisory identity-hash cache in front of the durable store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobfeed_storage::{EphemeralStore, JobStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};

pub const DEDUP_NAMESPACE: &str = "jobs:dedup";
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub durable_count: i64,
    pub ephemeral_count: usize,
    /// Hashes written during this pass.
    pub warmed: usize,
    pub consistent: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self::with_ttl(store, DEFAULT_DEDUP_TTL)
    }

    pub fn with_ttl(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(identity_hash: &str) -> String {
        format!("{DEDUP_NAMESPACE}:{identity_hash}")
    }

    /// False when the cache cannot be reached.
    pub async fn is_duplicate(&self, identity_hash: &str) -> bool {
        match self.store.exists(&Self::key(identity_hash)).await {
            Ok(seen) => seen,
            Err(err) => {
                warn!(
                    identity_hash,
                    class = %err.class(),
                    error = %err,
                    "dedup cache unavailable; treating job as unseen"
                );
                false
            }
        }
    }

    pub async fn mark_seen(&self, identity_hash: &str) {
        if let Err(err) = self
            .store
            .set_with_expiry(&Self::key(identity_hash), "1", self.ttl)
            .await
        {
            warn!(identity_hash, error = %err, "failed to mark job as seen");
        }
    }

    /// Re-warm the cache from every durable identity hash and compare counts.
    ///
    /// Only durable-store failures are returned; cache failures end the warm-up early
    /// and are reflected in the counts.
    pub async fn reconcile(&self, jobs: &dyn JobStore) -> Result<ConsistencyReport, StoreError> {
        let hashes = jobs.all_identity_hashes().await?;
        let mut warmed = 0usize;
        for hash in &hashes {
            match self
                .store
                .set_with_expiry(&Self::key(hash), "1", self.ttl)
                .await
            {
                Ok(()) => warmed += 1,
                Err(err) => {
                    warn!(warmed, error = %err, "dedup cache unavailable during reconcile");
                    break;
                }
            }
        }

        let durable_count = jobs.count().await?;
        let ephemeral_count = match self.store.scan_keys(&format!("{DEDUP_NAMESPACE}:*")).await {
            Ok(keys) => keys.len(),
            Err(err) => {
                warn!(error = %err, "could not count dedup cache keys");
                0
            }
        };

        let report = ConsistencyReport {
            durable_count,
            ephemeral_count,
            warmed,
            consistent: i64::try_from(ephemeral_count).map_or(false, |n| n >= durable_count),
            checked_at: Utc::now(),
        };
        info!(
            durable_count = report.durable_count,
            ephemeral_count = report.ephemeral_count,
            consistent = report.consistent,
            "dedup cache reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobfeed_core::{normalize, RawPosting};
    use jobfeed_storage::{MemoryEphemeralStore, MemoryJobStore, RedisEphemeralStore};

    fn posting(title: &str) -> RawPosting {
        RawPosting {
            title: Some(title.to_string()),
            company: "Acme Corp".to_string(),
            location: Some("San Francisco, CA".to_string()),
            apply_url: Some(format!("https://careers.acme.test/{}", title.len())),
            source: "career_page".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unseen_until_marked() {
        let gate = DedupGate::new(Arc::new(MemoryEphemeralStore::new()));
        assert!(!gate.is_duplicate("abc").await);
        gate.mark_seen("abc").await;
        assert!(gate.is_duplicate("abc").await);
        assert!(!gate.is_duplicate("abd").await);
    }

    #[tokio::test(start_paused = true)]
    async fn seen_marks_expire_after_ttl() {
        let gate = DedupGate::with_ttl(Arc::new(MemoryEphemeralStore::new()), Duration::from_secs(60));
        gate.mark_seen("abc").await;
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(gate.is_duplicate("abc").await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!gate.is_duplicate("abc").await);
    }

    #[tokio::test]
    async fn unreachable_cache_degrades_to_not_duplicate() {
        let store = RedisEphemeralStore::open("redis://127.0.0.1:1/").unwrap();
        let gate = DedupGate::new(Arc::new(store));
        gate.mark_seen("abc").await;
        assert!(!gate.is_duplicate("abc").await);
    }

    #[tokio::test]
    async fn reconcile_warms_cache_from_durable_hashes() {
        let jobs = MemoryJobStore::new();
        let batch = [normalize(&posting("Software Engineer")), normalize(&posting("Data Analyst"))];
        assert_eq!(jobs.upsert_batch(&batch).await.count(), 2);

        let gate = DedupGate::new(Arc::new(MemoryEphemeralStore::new()));
        let report = gate.reconcile(&jobs).await.unwrap();

        assert_eq!(report.durable_count, 2);
        assert_eq!(report.ephemeral_count, 2);
        assert_eq!(report.warmed, 2);
        assert!(report.consistent);
        for job in &batch {
            assert!(gate.is_duplicate(&job.identity_hash).await);
        }
    }
}
