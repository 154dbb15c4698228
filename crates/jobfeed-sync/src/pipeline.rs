use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobfeed_adapters::{build_adapters, AdapterContext, SourceAdapter, SourceRegistry};
use jobfeed_core::{HybridMatcher, MatchResult};
use jobfeed_storage::{
    postgres, AlertStore, EphemeralStore, HttpFetcher, JobQuery, JobStore, MemoryEphemeralStore,
    Pagination, PgAlertStore, PgJobStore, RedisEphemeralStore,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alerts::AlertMatcher;
use crate::config::SyncConfig;
use crate::dedup::{ConsistencyReport, DedupGate};
use crate::embeddings::{BackfillReport, EmbeddingBackfill, EmbeddingProvider, HttpEmbeddingClient};
use crate::notify::{Dispatcher, DrainReport, Mailer, NotificationQueue, SmtpMailer};
use crate::orchestrator::{AdapterRun, FetchOrchestrator};

/// Active jobs considered when ranking a résumé.
pub const MATCH_CANDIDATE_LIMIT: i64 = 1000;
const DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub adapters: Vec<AdapterRun>,
    pub raw_postings: usize,
    pub unique_jobs: usize,
    pub duplicates: usize,
    pub persisted: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub alerts_evaluated: usize,
    pub notifications_queued: usize,
}

/// Shared stores behind the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
}

/// Process-scoped state: built once at startup and shared by every task.
pub struct SyncPipeline {
    config: SyncConfig,
    stores: Stores,
    dedup: DedupGate,
    orchestrator: FetchOrchestrator,
    matcher: AlertMatcher,
    queue: NotificationQueue,
    dispatcher: Dispatcher,
    embeddings: Arc<dyn EmbeddingProvider>,
    backfill: EmbeddingBackfill,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        stores: Stores,
        adapters: Vec<Box<dyn SourceAdapter>>,
        embeddings: Arc<dyn EmbeddingProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let dedup = DedupGate::with_ttl(stores.ephemeral.clone(), config.dedup_ttl);
        let orchestrator =
            FetchOrchestrator::new(adapters, http, dedup.clone()).with_budget(config.adapter_budget);
        let queue = NotificationQueue::new(stores.ephemeral.clone());
        let dispatcher = Dispatcher::new(queue.clone(), mailer);
        let backfill = EmbeddingBackfill::new(stores.jobs.clone(), embeddings.clone())
            .with_batch(config.backfill_batch);

        Ok(Self {
            config,
            stores,
            dedup,
            orchestrator,
            matcher: AlertMatcher::new(),
            queue,
            dispatcher,
            embeddings,
            backfill,
        })
    }

    /// Connect and migrate Postgres (required), open Redis (optional), load the
    /// source registry, and wire the remote embedding and mail clients.
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .clone()
            .context("DATABASE_URL is not set")?;
        let pool = postgres::connect(&database_url, DB_MAX_CONNECTIONS)
            .await
            .context("connecting to postgres")?;
        postgres::migrate(&pool).await.context("applying migrations")?;

        let ephemeral: Arc<dyn EphemeralStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisEphemeralStore::open(url).context("opening redis client")?),
            None => {
                warn!("REDIS_URL not set; dedup cache and notification queue are process-local");
                Arc::new(MemoryEphemeralStore::new())
            }
        };
        let stores = Stores {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            alerts: Arc::new(PgAlertStore::new(pool)),
            ephemeral,
        };

        let registry = SourceRegistry::load(&config.sources_file)?;
        let adapters = build_adapters(&registry, config.adzuna.clone())?;
        let embeddings = Arc::new(HttpEmbeddingClient::new(&config.embedding)?);
        let mailer = Arc::new(SmtpMailer::new(&config.smtp).context("configuring smtp")?);
        if !mailer.is_configured() {
            warn!("SMTP_USER/SMTP_PASSWORD/SMTP_FROM not set; alert e-mails will be skipped");
        }

        Self::new(config, stores, adapters, embeddings, mailer)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn adapter_count(&self) -> usize {
        self.orchestrator.adapter_count()
    }

    /// Fetch, persist, then queue notifications for alerts matching the persisted batch.
    pub async fn run_once(&self) -> SyncRunSummary {
        let ctx = AdapterContext::new();
        let span = info_span!("sync_run", run_id = %ctx.run_id);
        self.run_with_context(ctx).instrument(span).await
    }

    async fn run_with_context(&self, ctx: AdapterContext) -> SyncRunSummary {
        let started_at = Utc::now();
        let fetched = self.orchestrator.fetch_normalized_unique(&ctx).await;
        let batch = self.stores.jobs.upsert_batch(&fetched.jobs).await;

        let (alerts_evaluated, notifications_queued) = if batch.persisted.is_empty() {
            (0, 0)
        } else {
            self.queue_alert_notifications(&batch.persisted).await
        };

        let summary = SyncRunSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            adapters: fetched.adapters,
            raw_postings: fetched.raw_count,
            unique_jobs: fetched.jobs.len(),
            duplicates: fetched.duplicates,
            persisted: batch.count(),
            created: batch.created,
            updated: batch.updated,
            failed: batch.failed,
            alerts_evaluated,
            notifications_queued,
        };
        info!(
            persisted = summary.persisted,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            notifications = summary.notifications_queued,
            "sync run complete"
        );
        summary
    }

    async fn queue_alert_notifications(&self, persisted: &[jobfeed_core::JobRecord]) -> (usize, usize) {
        let alerts = match self.stores.alerts.active_alerts().await {
            Ok(alerts) => alerts,
            Err(err) => {
                warn!(class = %err.class(), error = %err, "could not load alerts; skipping matching");
                return (0, 0);
            }
        };

        let mut queued = 0;
        for task in self.matcher.notifications(&alerts, persisted) {
            match self.queue.enqueue(&task).await {
                Ok(()) => queued += 1,
                Err(err) => warn!(
                    to_email = %task.to_email,
                    alert = %task.alert_name,
                    error = %err,
                    "could not queue notification"
                ),
            }
        }
        (alerts.len(), queued)
    }

    pub async fn reconcile(&self) -> Result<ConsistencyReport> {
        self.dedup
            .reconcile(self.stores.jobs.as_ref())
            .await
            .context("reconciling dedup cache")
    }

    pub async fn purge(&self, days: i64) -> Result<u64> {
        let deleted = self
            .stores
            .jobs
            .purge_older_than(days)
            .await
            .with_context(|| format!("purging jobs older than {days} days"))?;
        info!(days, deleted, "retention purge complete");
        Ok(deleted)
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.purge(self.config.retention_days).await
    }

    pub async fn drain_notifications(&self) -> DrainReport {
        self.dispatcher.drain().await
    }

    pub async fn backfill_embeddings(&self) -> Result<BackfillReport> {
        self.backfill
            .run_once()
            .await
            .context("running embedding backfill")
    }

    /// Rank active jobs against a résumé. Without a résumé embedding the ranking is
    /// keyword-only.
    pub async fn match_resume(&self, resume_text: &str, top_n: usize) -> Result<Vec<MatchResult>> {
        let (jobs, _) = self
            .stores
            .jobs
            .search(
                &JobQuery::default(),
                Pagination {
                    offset: 0,
                    limit: MATCH_CANDIDATE_LIMIT,
                },
            )
            .await
            .context("loading active jobs")?;

        let resume_embedding = match self.embeddings.embed(resume_text).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(err) => {
                warn!(class = %err.class(), error = %err, "résumé embedding unavailable; keyword ranking only");
                None
            }
        };

        Ok(HybridMatcher::new().score(resume_text, resume_embedding.as_deref(), &jobs, top_n))
    }
}
