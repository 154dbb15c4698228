//! Adzuna public job-search API.

use async_trait::async_trait;
use jobfeed_core::{Metadata, RawPosting};
use jobfeed_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{AdapterContext, AdapterError, SourceAdapter};

pub const SOURCE_ID: &str = "adzuna_api";
pub const DEFAULT_BASE_URL: &str = "https://api.adzuna.com/v1/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdzunaCredentials {
    pub app_id: String,
    pub app_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct Named {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: Option<String>,
    company: Option<Named>,
    location: Option<Named>,
    description: Option<String>,
    redirect_url: Option<String>,
    id: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct AdzunaAdapter {
    pub base_url: String,
    pub country: String,
    pub query: String,
    pub location: Option<String>,
    pub pages: u32,
    pub credentials: Option<AdzunaCredentials>,
}

impl AdzunaAdapter {
    pub fn search_url(&self, page: u32) -> String {
        format!(
            "{}/jobs/{}/search/{page}",
            self.base_url.trim_end_matches('/'),
            self.country
        )
    }

    /// Entries without a company name are skipped, as are entries that fail to decode.
    pub fn parse_results(&self, body: &[u8]) -> Result<Vec<RawPosting>, AdapterError> {
        let response: SearchResponse =
            serde_json::from_slice(body).map_err(|e| AdapterError::Parse(e.to_string()))?;

        let mut postings = Vec::with_capacity(response.results.len());
        for (index, item) in response.results.into_iter().enumerate() {
            let result: SearchResult = match serde_json::from_value(item) {
                Ok(result) => result,
                Err(err) => {
                    warn!(index, error = %err, "skipping undecodable search result");
                    continue;
                }
            };
            let Some(company) = result
                .company
                .and_then(|c| c.display_name)
                .filter(|name| !name.trim().is_empty())
            else {
                debug!(index, "search result without company");
                continue;
            };

            let mut metadata = Metadata::new();
            metadata.insert("query".to_string(), JsonValue::from(self.query.clone()));
            if let Some(id) = result.id {
                metadata.insert("adzuna_id".to_string(), id);
            }

            postings.push(RawPosting {
                title: result.title,
                company,
                location: result.location.and_then(|l| l.display_name),
                description: result.description,
                apply_url: result.redirect_url,
                source: SOURCE_ID.to_string(),
                metadata,
            });
        }
        Ok(postings)
    }
}

#[async_trait]
impl SourceAdapter for AdzunaAdapter {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn label(&self) -> String {
        format!("{SOURCE_ID}:{}", self.query)
    }

    async fn try_fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let Some(credentials) = &self.credentials else {
            return Err(AdapterError::MissingCredentials("ADZUNA_APP_ID/ADZUNA_APP_KEY"));
        };

        let mut postings = Vec::new();
        for page in 1..=self.pages.max(1) {
            let mut request = FetchRequest::get(self.search_url(page))
                .query("app_id", &credentials.app_id)
                .query("app_key", &credentials.app_key)
                .query("what", &self.query)
                .header("Accept", "application/json");
            if let Some(location) = &self.location {
                request = request.query("where", location);
            }

            let outcome = match http.fetch(ctx.run_id, SOURCE_ID, &request).await {
                Ok(response) => self.parse_results(&response.body),
                Err(err) => Err(err.into()),
            };
            match outcome {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => postings.extend(batch),
                Err(err) if postings.is_empty() => return Err(err),
                Err(err) => {
                    warn!(page, error = %err, "stopping pagination after partial results");
                    break;
                }
            }
        }
        Ok(postings)
    }
}
