//! Source adapter contract and the built-in job sources.

pub mod career_page;
pub mod platform;
pub mod registry;
pub mod search_api;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{normalize_whitespace, FailureClass, RawPosting};
use jobfeed_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Selector};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use career_page::{CareerPageAdapter, CareerPageDefinition, CareerPageSelectors};
pub use platform::LinkedInAdapter;
pub use registry::{build_adapters, LoadedRegistry, SourceRegistry};
pub use search_api::{AdzunaAdapter, AdzunaCredentials};

pub const CRATE_NAME: &str = "jobfeed-adapters";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl AdapterError {
    pub fn class(&self) -> FailureClass {
        match self {
            AdapterError::Fetch(err) => err.class(),
            AdapterError::Parse(_) => FailureClass::Parse,
            AdapterError::Selector { .. } | AdapterError::MissingCredentials(_) => {
                FailureClass::Configuration
            }
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source identifier stamped on every posting this adapter yields.
    fn source_id(&self) -> &str;

    /// Human-readable label for logs.
    fn label(&self) -> String {
        self.source_id().to_string()
    }

    async fn try_fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError>;

    /// Never fails: errors are logged and yield an empty batch.
    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Vec<RawPosting> {
        match self.try_fetch(http, ctx).await {
            Ok(postings) => {
                info!(
                    run_id = %ctx.run_id,
                    adapter = %self.label(),
                    count = postings.len(),
                    "adapter fetched postings"
                );
                postings
            }
            Err(err) => {
                match err.class() {
                    FailureClass::Transport | FailureClass::Persistence => error!(
                        run_id = %ctx.run_id,
                        adapter = %self.label(),
                        class = %err.class(),
                        error = %err,
                        "adapter fetch failed"
                    ),
                    _ => warn!(
                        run_id = %ctx.run_id,
                        adapter = %self.label(),
                        class = %err.class(),
                        error = %err,
                        "adapter skipped"
                    ),
                }
                Vec::new()
            }
        }
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Text of the first match with whitespace runs collapsed.
pub(crate) fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|node| text_or_none(&normalize_whitespace(&node.text().collect::<String>())))
}

pub(crate) fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|node| node.value().attr(attr))
        .and_then(text_or_none)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    pub fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    pub fn fixture(relative: &str) -> String {
        let path = workspace_root().join("fixtures").join(relative);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
    }
}
