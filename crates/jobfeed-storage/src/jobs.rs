//! Durable record store boundary for jobs and alerts.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jobfeed_core::{Alert, AlertFilter, CanonicalJob, JobRecord, JobType};
use tracing::error;

use crate::StoreError;

pub const MAX_ALERTS_PER_OWNER: usize = 5;
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Search predicates. Text fields are case-insensitive substrings; the rest are exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<JobType>,
    pub source: Option<String>,
    /// `None` matches both active and inactive rows.
    pub is_active: Option<bool>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            title: None,
            company: None,
            location: None,
            job_type: None,
            source: None,
            is_active: Some(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: JobRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchUpsert {
    pub persisted: Vec<JobRecord>,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl BatchUpsert {
    pub fn count(&self) -> usize {
        self.persisted.len()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert by identity hash, or overwrite every mutable field and reactivate.
    async fn upsert(&self, job: &CanonicalJob) -> Result<UpsertOutcome, StoreError>;

    async fn find_by_hash(&self, identity_hash: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Active records without an embedding, newest first.
    async fn records_missing_embedding(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    /// Apply vectors by id; ids that no longer exist are skipped. Returns rows touched.
    async fn update_embeddings(&self, pairs: &[(i64, Vec<f32>)]) -> Result<usize, StoreError>;

    async fn search(
        &self,
        query: &JobQuery,
        page: Pagination,
    ) -> Result<(Vec<JobRecord>, i64), StoreError>;

    /// Delete rows created strictly before `cutoff`, atomically.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn all_identity_hashes(&self) -> Result<Vec<String>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Per-job failures are logged and skipped.
    async fn upsert_batch(&self, jobs: &[CanonicalJob]) -> BatchUpsert {
        let mut out = BatchUpsert::default();
        for job in jobs {
            match self.upsert(job).await {
                Ok(outcome) => {
                    if outcome.created {
                        out.created += 1;
                    } else {
                        out.updated += 1;
                    }
                    out.persisted.push(outcome.record);
                }
                Err(err) => {
                    error!(
                        identity_hash = %job.identity_hash,
                        class = %err.class(),
                        error = %err,
                        "skipping job that failed to persist"
                    );
                    out.failed += 1;
                }
            }
        }
        out
    }

    async fn purge_older_than(&self, days: i64) -> Result<u64, StoreError> {
        self.purge_created_before(retention_cutoff(Utc::now(), days)?)
            .await
    }
}

/// `now` minus `days` whole days. Negative or unrepresentable windows are rejected.
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, StoreError> {
    if days < 0 {
        return Err(StoreError::InvalidRetention { days });
    }
    TimeDelta::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(StoreError::InvalidRetention { days })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub email: String,
    pub name: String,
    pub filters: AlertFilter,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn active_alerts(&self) -> Result<Vec<Alert>, StoreError>;

    /// Fails with [`StoreError::AlertLimit`] once the owner holds the maximum.
    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    async fn list_alerts(&self, email: &str) -> Result<Vec<Alert>, StoreError>;
}
