//! LinkedIn guest job search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{Metadata, RawPosting};
use jobfeed_storage::{FetchRequest, HttpFetcher};
use scraper::Html;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::{first_attr, first_text, parse_selector, AdapterContext, AdapterError, SourceAdapter};

pub const SOURCE_ID: &str = "linkedin";
pub const SEARCH_URL: &str =
    "https://www.linkedin.com/jobs-guest/jobs/api/searchWithCurrentFilters";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

const CARD: &str = "div.base-card";
const TITLE: &str = "h3.base-search-card__title";
const COMPANY: &str = "h4.base-search-card__subtitle";
const LOCATION: &str = "span.job-search-card__location";
const LINK: &str = "a.base-card__full-link";

#[derive(Debug, Clone)]
pub struct LinkedInAdapter {
    pub keywords: String,
    pub location: String,
}

impl LinkedInAdapter {
    pub fn new(keywords: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            location: location.into(),
        }
    }

    /// Cards missing a title, a company or a link are skipped. Relative links are
    /// resolved against the search endpoint. The source exposes no posting date,
    /// so `fetched_at` is recorded as `posted_date`.
    pub fn parse_cards(
        &self,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let card = parse_selector(CARD)?;
        let title = parse_selector(TITLE)?;
        let company = parse_selector(COMPANY)?;
        let location = parse_selector(LOCATION)?;
        let link = parse_selector(LINK)?;
        let base = Url::parse(SEARCH_URL).map_err(|err| AdapterError::Parse(err.to_string()))?;

        let document = Html::parse_fragment(html);
        let mut postings = Vec::new();
        for (index, element) in document.select(&card).enumerate() {
            let (Some(title_text), Some(company_text), Some(href)) = (
                first_text(&element, &title),
                first_text(&element, &company),
                first_attr(&element, &link, "href"),
            ) else {
                debug!(index, "incomplete search card");
                continue;
            };
            let Ok(apply_url) = base.join(&href) else {
                debug!(index, href = %href, "unresolvable card link");
                continue;
            };

            let mut metadata = Metadata::new();
            metadata.insert(
                "posted_date".to_string(),
                JsonValue::from(fetched_at.to_rfc3339()),
            );
            metadata.insert("search_keywords".to_string(), JsonValue::from(self.keywords.clone()));

            postings.push(RawPosting {
                title: Some(title_text),
                company: company_text,
                location: first_text(&element, &location),
                description: None,
                apply_url: Some(apply_url.to_string()),
                source: SOURCE_ID.to_string(),
                metadata,
            });
        }
        Ok(postings)
    }
}

#[async_trait]
impl SourceAdapter for LinkedInAdapter {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn label(&self) -> String {
        format!("{SOURCE_ID}:{}@{}", self.keywords, self.location)
    }

    async fn try_fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let request = FetchRequest::get(SEARCH_URL)
            .query("keywords", &self.keywords)
            .query("location", &self.location)
            .query("pageNum", "0")
            .header("User-Agent", BROWSER_USER_AGENT);
        let response = http.fetch(ctx.run_id, SOURCE_ID, &request).await?;
        self.parse_cards(&response.text(), ctx.fetched_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;

    #[test]
    fn parses_cards_and_stamps_posted_date() {
        let fetched_at = Utc::now();
        let postings = LinkedInAdapter::new("software engineer", "United States")
            .parse_cards(&fixture("linkedin/search.html"), fetched_at)
            .unwrap();

        assert_eq!(postings.len(), 3);
        let first = &postings[0];
        assert_eq!(first.title.as_deref(), Some("Software Engineer"));
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location.as_deref(), Some("San Francisco, CA"));
        assert!(first
            .apply_url
            .as_deref()
            .unwrap()
            .contains("trackingId=xyz"));
        assert_eq!(
            first.metadata.get("posted_date"),
            Some(&JsonValue::from(fetched_at.to_rfc3339()))
        );
        assert_eq!(postings[1].company, "Globex");
        assert!(postings[1].location.is_none());
        assert_eq!(
            postings[2].apply_url.as_deref(),
            Some("https://www.linkedin.com/jobs/view/platform-engineer-at-hooli-3905")
        );
    }

    #[test]
    fn empty_page_yields_nothing() {
        let postings = LinkedInAdapter::new("rust", "Remote")
            .parse_cards("", Utc::now())
            .unwrap();
        assert!(postings.is_empty());
    }
}
