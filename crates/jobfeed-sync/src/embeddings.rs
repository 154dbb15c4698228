//! Remote embedding service client and the incremental backfill.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jobfeed_core::FailureClass;
use jobfeed_storage::{JobStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_BACKFILL_BATCH: i64 = 1;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service is not configured")]
    NotConfigured,
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding service returned {returned} vectors for {requested} texts")]
    LengthMismatch { requested: usize, returned: usize },
}

impl EmbeddingError {
    pub fn class(&self) -> FailureClass {
        match self {
            EmbeddingError::NotConfigured => FailureClass::Unavailable,
            EmbeddingError::Request(err) if err.is_decode() => FailureClass::Parse,
            EmbeddingError::Request(_) => FailureClass::Transport,
            EmbeddingError::LengthMismatch { .. } => FailureClass::Parse,
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Vectors in input order. May be shorter than `texts` when only a prefix
    /// of the batch could be embedded.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct EmbedBatchRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    batch_size: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building embedding http client")?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<(String, &str), EmbeddingError> {
        match (&self.base_url, &self.api_key) {
            (Some(base), Some(key)) => Ok((format!("{base}/{path}"), key.as_str())),
            _ => Err(EmbeddingError::NotConfigured),
        }
    }

    async fn post_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let (url, key) = self.endpoint("embed-batch")?;
        let response: EmbedBatchResponse = self
            .client
            .post(url)
            .header("X-API-Key", key)
            .json(&EmbedBatchRequest { texts })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::LengthMismatch {
                requested: texts.len(),
                returned: response.embeddings.len(),
            });
        }
        Ok(response.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let (url, key) = self.endpoint("embed")?;
        let response: EmbedResponse = self
            .client
            .post(url)
            .header("X-API-Key", key)
            .json(&EmbedRequest { text })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.is_configured() {
            return Err(EmbeddingError::NotConfigured);
        }
        embed_in_chunks(texts, self.batch_size, |chunk| async move {
            self.post_chunk(&chunk).await
        })
        .await
    }
}

/// Posts `texts` chunk by chunk. A failing chunk ends the batch; vectors from
/// earlier chunks are still returned, and the error only surfaces when none succeeded.
async fn embed_in_chunks<F, Fut>(
    texts: &[String],
    chunk_size: usize,
    mut post: F,
) -> Result<Vec<Vec<f32>>, EmbeddingError>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(chunk_size.max(1)) {
        match post(chunk.to_vec()).await {
            Ok(batch) => vectors.extend(batch),
            Err(err) if vectors.is_empty() => return Err(err),
            Err(err) => {
                warn!(
                    embedded = vectors.len(),
                    requested = texts.len(),
                    error = %err,
                    "embedding batch cut short"
                );
                break;
            }
        }
    }
    Ok(vectors)
}

/// Title and description, trimmed, blanks omitted, joined by one space.
pub fn build_job_text(title: &str, description: Option<&str>) -> String {
    [Some(title), description]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub updated: usize,
    /// The provider was unreachable; candidates stay queued for the next cycle.
    pub deferred: bool,
}

pub struct EmbeddingBackfill {
    jobs: Arc<dyn JobStore>,
    provider: Arc<dyn EmbeddingProvider>,
    batch: i64,
}

impl EmbeddingBackfill {
    pub fn new(jobs: Arc<dyn JobStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            jobs,
            provider,
            batch: DEFAULT_BACKFILL_BATCH,
        }
    }

    pub fn with_batch(mut self, batch: i64) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub async fn run_once(&self) -> Result<BackfillReport, StoreError> {
        let records = self.jobs.records_missing_embedding(self.batch).await?;
        let mut report = BackfillReport {
            candidates: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            debug!("no jobs awaiting embeddings");
            return Ok(report);
        }

        let texts = records
            .iter()
            .map(|r| build_job_text(&r.job.title, r.job.description.as_deref()))
            .collect::<Vec<_>>();
        let vectors = match self.provider.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                match err.class() {
                    FailureClass::Unavailable => debug!("embedding service not configured"),
                    class => warn!(%class, error = %err, "embedding backfill deferred"),
                }
                report.deferred = true;
                return Ok(report);
            }
        };

        let pairs = records
            .iter()
            .zip(vectors)
            .filter(|(_, vector)| !vector.is_empty())
            .map(|(record, vector)| (record.id, vector))
            .collect::<Vec<_>>();
        report.updated = self.jobs.update_embeddings(&pairs).await?;
        info!(
            candidates = report.candidates,
            updated = report.updated,
            "embedding backfill cycle complete"
        );
        Ok(report)
    }
}
