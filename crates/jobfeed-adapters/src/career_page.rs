//! Company career pages scraped through a declarative selector map.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobfeed_core::{Metadata, RawPosting};
use jobfeed_storage::{FetchRequest, HttpFetcher};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{first_attr, first_text, parse_selector, AdapterContext, AdapterError, SourceAdapter};

pub const DEFAULT_SOURCE: &str = "career_page";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareerPageSelectors {
    pub job_container: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
}

/// One YAML file per company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareerPageDefinition {
    pub company: String,
    pub base_url: String,
    pub job_url: String,
    pub selectors: CareerPageSelectors,
    #[serde(default)]
    pub source: Option<String>,
}

impl CareerPageDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Every `*.yaml`/`*.yml` in `dir`, sorted by file name. Unreadable files are skipped.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            warn!(dir = %dir.display(), "career page definitions directory not found");
            return Ok(Vec::new());
        }
        let mut paths = fs::read_dir(dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect::<Vec<PathBuf>>();
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load(&path) {
                Ok(definition) => definitions.push(definition),
                Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "skipping career page definition"),
            }
        }
        Ok(definitions)
    }
}

/// `base` + `/` + `link` unless the link is already absolute.
pub fn resolve_link(base_url: &str, link: &str) -> String {
    if link.starts_with("http") {
        link.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            link.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub struct CareerPageAdapter {
    definition: CareerPageDefinition,
}

impl CareerPageAdapter {
    pub fn new(definition: CareerPageDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &CareerPageDefinition {
        &self.definition
    }

    /// Elements lacking a title or a link are skipped.
    pub fn parse_listing(&self, html: &str) -> Result<Vec<RawPosting>, AdapterError> {
        let selectors = &self.definition.selectors;
        let container = parse_selector(&selectors.job_container)?;
        let title = parse_selector(&selectors.title)?;
        let link = parse_selector(&selectors.link)?;
        let location = selectors.location.as_deref().map(parse_selector).transpose()?;
        let description = selectors
            .description
            .as_deref()
            .map(parse_selector)
            .transpose()?;
        let job_type = selectors.job_type.as_deref().map(parse_selector).transpose()?;

        let document = Html::parse_document(html);
        let mut postings = Vec::new();
        for (index, element) in document.select(&container).enumerate() {
            let Some(title_text) = first_text(&element, &title) else {
                debug!(company = %self.definition.company, index, "job element without title");
                continue;
            };
            let Some(href) = first_attr(&element, &link, "href") else {
                debug!(company = %self.definition.company, index, "job element without link");
                continue;
            };

            let mut metadata = Metadata::new();
            if let Some(raw_type) = job_type.as_ref().and_then(|s| first_text(&element, s)) {
                metadata.insert("job_type".to_string(), JsonValue::from(raw_type));
            }

            postings.push(RawPosting {
                title: Some(title_text),
                company: self.definition.company.clone(),
                location: location.as_ref().and_then(|s| first_text(&element, s)),
                description: description.as_ref().and_then(|s| first_text(&element, s)),
                apply_url: Some(resolve_link(&self.definition.base_url, &href)),
                source: self.source_id().to_string(),
                metadata,
            });
        }
        Ok(postings)
    }
}

#[async_trait]
impl SourceAdapter for CareerPageAdapter {
    fn source_id(&self) -> &str {
        self.definition.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    fn label(&self) -> String {
        format!("{}:{}", self.source_id(), self.definition.company)
    }

    async fn try_fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let response = http
            .fetch(
                ctx.run_id,
                self.source_id(),
                &FetchRequest::get(&self.definition.job_url),
            )
            .await?;
        self.parse_listing(&response.text())
    }
}
