use std::sync::Arc;

use async_trait::async_trait;
use jobfeed_adapters::{AdapterContext, AdapterError, SourceAdapter};
use jobfeed_core::{normalize, NotificationTask, RawPosting};
use jobfeed_storage::{
    HttpFetcher, JobQuery, JobStore, MemoryAlertStore, MemoryEphemeralStore, MemoryJobStore,
    Pagination,
};
use jobfeed_sync::{
    Delivery, EmbeddingError, EmbeddingProvider, MailError, Mailer, Stores, SyncConfig,
    SyncPipeline,
};

struct FixedSource {
    id: &'static str,
    postings: Vec<RawPosting>,
}

#[async_trait]
impl SourceAdapter for FixedSource {
    fn source_id(&self) -> &str {
        self.id
    }

    async fn try_fetch(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        Ok(self.postings.clone())
    }
}

struct Offline;

#[async_trait]
impl EmbeddingProvider for Offline {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::NotConfigured)
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::NotConfigured)
    }
}

#[async_trait]
impl Mailer for Offline {
    async fn deliver(&self, _task: &NotificationTask) -> Result<Delivery, MailError> {
        Ok(Delivery::Skipped)
    }
}

fn acme(source: &str, tracking: &str) -> RawPosting {
    RawPosting {
        title: Some("Software Engineer".to_string()),
        company: "Acme Corp".to_string(),
        location: Some("San Francisco".to_string()),
        description: Some("Distributed systems in Rust.".to_string()),
        apply_url: Some(format!(
            "https://careers.acme.test/jobs/42?utm_source={tracking}&utm_medium=feed"
        )),
        source: source.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn same_posting_from_two_sources_is_stored_once_and_refreshed_on_next_run() {
    let jobs = Arc::new(MemoryJobStore::new());
    let ephemeral = Arc::new(MemoryEphemeralStore::new());
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(FixedSource {
            id: "career_page",
            postings: vec![acme("career_page", "careers")],
        }),
        Box::new(FixedSource {
            id: "adzuna_api",
            postings: vec![acme("adzuna_api", "adzuna")],
        }),
    ];
    let pipeline = SyncPipeline::new(
        SyncConfig::from_lookup(|_| None),
        Stores {
            jobs: jobs.clone(),
            alerts: Arc::new(MemoryAlertStore::new()),
            ephemeral: ephemeral.clone(),
        },
        adapters,
        Arc::new(Offline),
        Arc::new(Offline),
    )
    .unwrap();

    let first = pipeline.run_once().await;
    assert_eq!(first.raw_postings, 2);
    assert_eq!(first.unique_jobs, 1);
    assert_eq!(first.created, 1);

    let hash = normalize(&acme("career_page", "careers")).identity_hash;
    let stored = jobs.find_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(
        stored.job.apply_url.as_deref(),
        Some("https://careers.acme.test/jobs/42")
    );

    // Cache expiry between runs lets the posting through to the durable store again.
    ephemeral.clear().await;
    let second = pipeline.run_once().await;
    assert_eq!(second.unique_jobs, 1);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 1);

    assert_eq!(jobs.count().await.unwrap(), 1);
    let refreshed = jobs.find_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(refreshed.id, stored.id);
    assert!(refreshed.is_active);
    assert_eq!(refreshed.created_at, stored.created_at);
    assert!(refreshed.updated_at > stored.updated_at);

    let (page, total) = jobs
        .search(&JobQuery::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].job.company, "Acme Corp");
}
