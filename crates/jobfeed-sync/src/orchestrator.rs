//! Runs every adapter, normalizes what they return and drops known identities.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use jobfeed_adapters::{AdapterContext, SourceAdapter};
use jobfeed_core::{normalize, CanonicalJob, RawPosting};
use jobfeed_storage::HttpFetcher;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dedup::DedupGate;

pub const DEFAULT_ADAPTER_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterRun {
    pub adapter: String,
    pub fetched: usize,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Unique jobs in fetch order.
    pub jobs: Vec<CanonicalJob>,
    pub raw_count: usize,
    pub duplicates: usize,
    pub adapters: Vec<AdapterRun>,
}

pub struct FetchOrchestrator {
    adapters: Vec<Box<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    dedup: DedupGate,
    budget: Duration,
}

impl FetchOrchestrator {
    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>, http: Arc<HttpFetcher>, dedup: DedupGate) -> Self {
        Self {
            adapters,
            http,
            dedup,
            budget: DEFAULT_ADAPTER_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Adapters run concurrently, each under the time budget; a slow or failing
    /// adapter contributes nothing. Dedup runs sequentially over the concatenated
    /// batch so repeats inside one fetch collapse too.
    pub async fn fetch_normalized_unique(&self, ctx: &AdapterContext) -> FetchOutcome {
        let runs = join_all(self.adapters.iter().map(|adapter| async move {
            let label = adapter.label();
            match tokio::time::timeout(self.budget, adapter.fetch(&self.http, ctx)).await {
                Ok(postings) => (label, postings, false),
                Err(_) => {
                    warn!(
                        run_id = %ctx.run_id,
                        adapter = %label,
                        budget_secs = self.budget.as_secs(),
                        "adapter exceeded its time budget"
                    );
                    (label, Vec::new(), true)
                }
            }
        }))
        .await;

        let mut outcome = FetchOutcome::default();
        let mut raw: Vec<RawPosting> = Vec::new();
        for (adapter, postings, timed_out) in runs {
            outcome.adapters.push(AdapterRun {
                adapter,
                fetched: postings.len(),
                timed_out,
            });
            raw.extend(postings);
        }
        outcome.raw_count = raw.len();

        for posting in &raw {
            let job = normalize(posting);
            if self.dedup.is_duplicate(&job.identity_hash).await {
                debug!(identity_hash = %job.identity_hash, "skipping duplicate posting");
                outcome.duplicates += 1;
                continue;
            }
            self.dedup.mark_seen(&job.identity_hash).await;
            outcome.jobs.push(job);
        }

        info!(
            run_id = %ctx.run_id,
            adapters = self.adapters.len(),
            raw = outcome.raw_count,
            unique = outcome.jobs.len(),
            duplicates = outcome.duplicates,
            "fetch complete"
        );
        outcome
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use jobfeed_adapters::{AdapterContext, AdapterError, SourceAdapter};
    use jobfeed_core::RawPosting;
    use jobfeed_storage::{FetchError, HttpFetcher};
    use std::time::Duration;

    pub enum Behaviour {
        Return(Vec<RawPosting>),
        Fail,
        Hang,
    }

    pub struct StubAdapter {
        pub id: &'static str,
        pub behaviour: Behaviour,
    }

    impl StubAdapter {
        pub fn returning(id: &'static str, postings: Vec<RawPosting>) -> Box<dyn SourceAdapter> {
            Box::new(Self {
                id,
                behaviour: Behaviour::Return(postings),
            })
        }

        pub fn failing(id: &'static str) -> Box<dyn SourceAdapter> {
            Box::new(Self {
                id,
                behaviour: Behaviour::Fail,
            })
        }

        pub fn hanging(id: &'static str) -> Box<dyn SourceAdapter> {
            Box::new(Self {
                id,
                behaviour: Behaviour::Hang,
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn source_id(&self) -> &str {
            self.id
        }

        async fn try_fetch(
            &self,
            _http: &HttpFetcher,
            _ctx: &AdapterContext,
        ) -> Result<Vec<RawPosting>, AdapterError> {
            match &self.behaviour {
                Behaviour::Return(postings) => Ok(postings.clone()),
                Behaviour::Fail => Err(AdapterError::Fetch(FetchError::HttpStatus {
                    status: 503,
                    url: format!("https://{}.test/jobs", self.id),
                })),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn acme_posting(source: &str, tracking: &str) -> RawPosting {
        RawPosting {
            title: Some("Software  Engineer".to_string()),
            company: "Acme Corp".to_string(),
            location: Some("San Francisco".to_string()),
            description: Some("Build services in Rust.".to_string()),
            apply_url: Some(format!("https://careers.acme.test/jobs/42?utm_source={tracking}")),
            source: source.to_string(),
            ..Default::default()
        }
    }
}
