//! Sync pipeline: fetch, dedup, persist, alert, notify, and the recurring tasks around it.

pub mod alerts;
pub mod config;
pub mod dedup;
pub mod embeddings;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod resume;
pub mod scheduler;

pub use alerts::AlertMatcher;
pub use config::{Cadences, EmbeddingConfig, SmtpConfig, SyncConfig};
pub use dedup::{ConsistencyReport, DedupGate, DEDUP_NAMESPACE};
pub use embeddings::{
    build_job_text, BackfillReport, EmbeddingBackfill, EmbeddingError, EmbeddingProvider,
    HttpEmbeddingClient,
};
pub use notify::{
    render_alert_email, Delivery, Dispatcher, DrainReport, MailError, Mailer, NotificationQueue,
    QueueError, SmtpMailer, MAX_DRAIN_BATCH, QUEUE_KEY,
};
pub use orchestrator::{AdapterRun, FetchOrchestrator, FetchOutcome};
pub use pipeline::{Stores, SyncPipeline, SyncRunSummary};
pub use resume::{clean_resume_text, load_resume_text, ResumeError};
pub use scheduler::{build_scheduler, maybe_build_scheduler};

pub const CRATE_NAME: &str = "jobfeed-sync";

pub async fn run_sync_once_from_env() -> anyhow::Result<SyncRunSummary> {
    let pipeline = SyncPipeline::from_config(SyncConfig::from_env()).await?;
    Ok(pipeline.run_once().await)
}
