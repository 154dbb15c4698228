//! In-memory job and alert stores.
//!
//! Same uniqueness rules as the Postgres schema. Used by tests and dry runs;
//! contents are lost on restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jobfeed_core::{Alert, CanonicalJob, JobRecord};
use tokio::sync::Mutex;

use crate::jobs::{
    AlertStore, JobQuery, JobStore, NewAlert, Pagination, UpsertOutcome, MAX_ALERTS_PER_OWNER,
};
use crate::StoreError;

#[derive(Debug, Default)]
struct JobTable {
    rows: BTreeMap<i64, JobRecord>,
    next_id: i64,
}

impl JobTable {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn apply_url_taken(&self, job: &CanonicalJob, except_id: Option<i64>) -> bool {
        let Some(url) = job.apply_url.as_deref() else {
            return false;
        };
        self.rows
            .values()
            .any(|row| Some(row.id) != except_id && row.job.apply_url.as_deref() == Some(url))
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    table: Mutex<JobTable>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed record, assigning a fresh id. Timestamps are kept as given.
    pub async fn insert_record(&self, mut record: JobRecord) -> Result<JobRecord, StoreError> {
        let mut table = self.table.lock().await;
        if table.apply_url_taken(&record.job, None) {
            return Err(StoreError::Conflict {
                field: "apply_url",
                value: record.job.apply_url.unwrap_or_default(),
            });
        }
        if table
            .rows
            .values()
            .any(|row| row.job.identity_hash == record.job.identity_hash)
        {
            return Err(StoreError::Conflict {
                field: "identity_hash",
                value: record.job.identity_hash,
            });
        }
        record.id = table.allocate_id();
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }
}

fn contains_ignore_case(haystack: Option<&str>, needle: &Option<String>) -> bool {
    match needle.as_deref().filter(|n| !n.is_empty()) {
        None => true,
        Some(needle) => haystack
            .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
    }
}

fn matches_query(record: &JobRecord, query: &JobQuery) -> bool {
    contains_ignore_case(Some(&record.job.title), &query.title)
        && contains_ignore_case(Some(&record.job.company), &query.company)
        && contains_ignore_case(record.job.location.as_deref(), &query.location)
        && query.job_type.map_or(true, |t| t == record.job.job_type)
        && query
            .source
            .as_deref()
            .map_or(true, |s| s == record.job.source)
        && query.is_active.map_or(true, |a| a == record.is_active)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &CanonicalJob) -> Result<UpsertOutcome, StoreError> {
        let mut table = self.table.lock().await;
        let existing = table
            .rows
            .values()
            .find(|row| row.job.identity_hash == job.identity_hash)
            .map(|row| (row.id, row.updated_at));

        if table.apply_url_taken(job, existing.map(|(id, _)| id)) {
            return Err(StoreError::Conflict {
                field: "apply_url",
                value: job.apply_url.clone().unwrap_or_default(),
            });
        }

        let now = Utc::now();
        match existing {
            Some((id, previous)) => {
                let record = JobRecord {
                    id,
                    job: job.clone(),
                    is_active: true,
                    embedding: table.rows.get(&id).and_then(|r| r.embedding.clone()),
                    created_at: table.rows.get(&id).map_or(now, |r| r.created_at),
                    updated_at: now.max(previous + Duration::microseconds(1)),
                };
                table.rows.insert(id, record.clone());
                Ok(UpsertOutcome {
                    record,
                    created: false,
                })
            }
            None => {
                let id = table.allocate_id();
                let record = JobRecord {
                    id,
                    job: job.clone(),
                    is_active: true,
                    embedding: None,
                    created_at: now,
                    updated_at: now,
                };
                table.rows.insert(id, record.clone());
                Ok(UpsertOutcome {
                    record,
                    created: true,
                })
            }
        }
    }

    async fn find_by_hash(&self, identity_hash: &str) -> Result<Option<JobRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .values()
            .find(|row| row.job.identity_hash == identity_hash)
            .cloned())
    }

    async fn records_missing_embedding(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let table = self.table.lock().await;
        let mut rows = table
            .rows
            .values()
            .filter(|row| row.is_active && row.embedding.is_none())
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn update_embeddings(&self, pairs: &[(i64, Vec<f32>)]) -> Result<usize, StoreError> {
        let mut table = self.table.lock().await;
        let mut touched = 0;
        for (id, vector) in pairs {
            if let Some(row) = table.rows.get_mut(id) {
                row.embedding = Some(vector.clone());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn search(
        &self,
        query: &JobQuery,
        page: Pagination,
    ) -> Result<(Vec<JobRecord>, i64), StoreError> {
        let table = self.table.lock().await;
        let mut hits = table
            .rows
            .values()
            .filter(|row| matches_query(row, query))
            .cloned()
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = hits.len() as i64;
        let page_rows = hits
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(0))
            .take(usize::try_from(page.limit).unwrap_or(0))
            .collect();
        Ok((page_rows, total))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|_, row| row.created_at >= cutoff);
        Ok((before - table.rows.len()) as u64)
    }

    async fn all_identity_hashes(&self) -> Result<Vec<String>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .values()
            .map(|row| row.job.identity_hash.clone())
            .collect())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.table.lock().await.rows.len() as i64)
    }
}

#[derive(Debug, Default)]
struct AlertTable {
    rows: Vec<Alert>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    table: Mutex<AlertTable>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active(&self, id: i64, active: bool) {
        let mut table = self.table.lock().await;
        if let Some(alert) = table.rows.iter_mut().find(|a| a.id == id) {
            alert.is_active = active;
            alert.updated_at = Some(Utc::now());
        }
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.rows.iter().filter(|a| a.is_active).cloned().collect())
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let mut table = self.table.lock().await;
        let held = table.rows.iter().filter(|a| a.email == alert.email).count();
        if held >= MAX_ALERTS_PER_OWNER {
            return Err(StoreError::AlertLimit {
                email: alert.email,
                limit: MAX_ALERTS_PER_OWNER,
            });
        }
        table.next_id += 1;
        let created = Alert {
            id: table.next_id,
            email: alert.email,
            name: alert.name,
            filters: alert.filters,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        table.rows.push(created.clone());
        Ok(created)
    }

    async fn list_alerts(&self, email: &str) -> Result<Vec<Alert>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .filter(|a| a.email == email)
            .cloned()
            .collect())
    }
}
