//! Postgres-backed job and alert stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{
    classify_job_type, coerce_metadata, Alert, AlertFilter, CanonicalJob, JobRecord, JobType,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{error, info, warn};

use crate::jobs::{
    AlertStore, JobQuery, JobStore, NewAlert, Pagination, UpsertOutcome, MAX_ALERTS_PER_OWNER,
};
use crate::StoreError;

const JOB_COLUMNS: &str = "id, title, company, location, job_type, description, apply_url, \
     source, identity_hash, is_active, embedding, metadata, created_at, updated_at";

/// Advisory-lock namespace for per-owner alert creation.
const ALERT_OWNER_LOCK: i32 = 0x6a66_616c;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let job_type_raw: String = row.try_get("job_type")?;
    let job_type = job_type_raw.parse::<JobType>().unwrap_or_else(|_| {
        warn!(job_type = %job_type_raw, "unrecognised stored job type, reclassifying");
        classify_job_type(&job_type_raw)
    });
    let metadata: JsonValue = row.try_get("metadata")?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        job: CanonicalJob {
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            job_type,
            description: row.try_get("description")?,
            apply_url: row.try_get("apply_url")?,
            source: row.try_get("source")?,
            identity_hash: row.try_get("identity_hash")?,
            metadata: coerce_metadata(metadata),
        },
        is_active: row.try_get("is_active")?,
        embedding: row.try_get("embedding")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &JobQuery) {
    qb.push(" WHERE TRUE");
    for (column, value) in [
        ("title", &query.title),
        ("company", &query.company),
        ("location", &query.location),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            qb.push(format!(" AND {column} ILIKE "));
            qb.push_bind(format!("%{}%", escape_like(value)));
        }
    }
    if let Some(job_type) = query.job_type {
        qb.push(" AND job_type = ");
        qb.push_bind(job_type.as_str());
    }
    if let Some(source) = query.source.as_deref() {
        qb.push(" AND source = ");
        qb.push_bind(source.to_string());
    }
    if let Some(active) = query.is_active {
        qb.push(" AND is_active = ");
        qb.push_bind(active);
    }
}

fn map_unique_violation(err: sqlx::Error, job: &CanonicalJob) -> StoreError {
    let constraint = err
        .as_database_error()
        .and_then(|db| db.constraint())
        .map(ToString::to_string);
    match constraint.as_deref() {
        Some("jobs_apply_url_key") => StoreError::Conflict {
            field: "apply_url",
            value: job.apply_url.clone().unwrap_or_default(),
        },
        _ => StoreError::Database(err),
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert(&self, job: &CanonicalJob) -> Result<UpsertOutcome, StoreError> {
        let metadata = serde_json::to_value(&job.metadata)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let sql = format!(
            r#"
            INSERT INTO jobs
                (title, company, location, job_type, description, apply_url, source,
                 identity_hash, metadata, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            ON CONFLICT (identity_hash) DO UPDATE SET
                title = EXCLUDED.title,
                company = EXCLUDED.company,
                location = EXCLUDED.location,
                job_type = EXCLUDED.job_type,
                description = EXCLUDED.description,
                apply_url = EXCLUDED.apply_url,
                source = EXCLUDED.source,
                metadata = EXCLUDED.metadata,
                is_active = TRUE,
                updated_at = NOW()
            RETURNING {JOB_COLUMNS}, (xmax = 0) AS created
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&job.title)
            .bind(&job.company)
            .bind(&job.location)
            .bind(job.job_type.as_str())
            .bind(&job.description)
            .bind(&job.apply_url)
            .bind(&job.source)
            .bind(&job.identity_hash)
            .bind(metadata)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_unique_violation(err, job))?;

        Ok(UpsertOutcome {
            created: row.try_get("created")?,
            record: job_from_row(&row)?,
        })
    }

    async fn find_by_hash(&self, identity_hash: &str) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE identity_hash = $1");
        let row = sqlx::query(&sql)
            .bind(identity_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn records_missing_embedding(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE embedding IS NULL AND is_active \
             ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn update_embeddings(&self, pairs: &[(i64, Vec<f32>)]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut touched = 0usize;
        for (id, vector) in pairs {
            let result = sqlx::query("UPDATE jobs SET embedding = $1 WHERE id = $2")
                .bind(vector)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                warn!(job_id = id, "job vanished before its embedding was stored");
            }
            touched += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(touched)
    }

    async fn search(
        &self,
        query: &JobQuery,
        page: Pagination,
    ) -> Result<(Vec<JobRecord>, i64), StoreError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filters(&mut count_qb, query);
        let total: i64 = count_qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filters(&mut qb, query);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(page.limit.max(0));
        qb.push(" OFFSET ");
        qb.push_bind(page.offset.max(0));
        let rows = qb.build().fetch_all(&self.pool).await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        match sqlx::query("DELETE FROM jobs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
        {
            Ok(result) => {
                tx.commit().await?;
                Ok(result.rows_affected())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "purge rollback failed");
                }
                Err(err.into())
            }
        }
    }

    async fn all_identity_hashes(&self) -> Result<Vec<String>, StoreError> {
        let hashes = sqlx::query_scalar::<_, String>("SELECT identity_hash FROM jobs")
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }
}

fn alert_from_row(row: &PgRow) -> Result<Alert, StoreError> {
    let filters: JsonValue = row.try_get("filters")?;
    let filters: AlertFilter =
        serde_json::from_value(JsonValue::Object(coerce_metadata(filters).into_iter().collect()))
            .map_err(|err| StoreError::Corrupt(format!("alert filters: {err}")))?;
    Ok(Alert {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        filters,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, name, filters, is_active, created_at, updated_at
              FROM user_alerts
             WHERE is_active
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match alert_from_row(row) {
                Ok(alert) => Some(alert),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable alert row");
                    None
                }
            })
            .collect())
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Held until commit; serializes creates for one owner.
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(ALERT_OWNER_LOCK)
            .bind(&alert.email)
            .execute(&mut *tx)
            .await?;
        let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_alerts WHERE email = $1")
            .bind(&alert.email)
            .fetch_one(&mut *tx)
            .await?;
        if held >= MAX_ALERTS_PER_OWNER as i64 {
            return Err(StoreError::AlertLimit {
                email: alert.email,
                limit: MAX_ALERTS_PER_OWNER,
            });
        }

        let filters = serde_json::to_value(&alert.filters)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO user_alerts (email, name, filters)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, filters, is_active, created_at, updated_at
            "#,
        )
        .bind(&alert.email)
        .bind(&alert.name)
        .bind(filters)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        alert_from_row(&row)
    }

    async fn list_alerts(&self, email: &str) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, name, filters, is_active, created_at, updated_at
              FROM user_alerts
             WHERE email = $1
             ORDER BY id
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_remote\\"), "100\\%\\_remote\\\\");
        assert_eq!(escape_like("engineer"), "engineer");
    }

    #[test]
    fn filters_render_expected_predicates() {
        let query = JobQuery {
            title: Some("engineer".into()),
            source: Some("linkedin".into()),
            job_type: Some(jobfeed_core::JobType::Contract),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filters(&mut qb, &query);
        let sql = qb.sql();
        assert!(sql.contains("title ILIKE $1"));
        assert!(sql.contains("job_type = $2"));
        assert!(sql.contains("source = $3"));
        assert!(sql.contains("is_active = $4"));
        assert!(!sql.contains("company"));
    }
}
