//! `sources.yaml`: which adapters run and how they are parameterised.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::career_page::{CareerPageAdapter, CareerPageDefinition};
use crate::platform::LinkedInAdapter;
use crate::search_api::{AdzunaAdapter, AdzunaCredentials, DEFAULT_BASE_URL};
use crate::SourceAdapter;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub career_pages: Option<CareerPagesConfig>,
    #[serde(default)]
    pub search_api: Option<SearchApiConfig>,
    #[serde(default)]
    pub platform: Option<PlatformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CareerPagesConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Relative paths resolve against the registry file's directory.
    pub definitions_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchApiConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_pages")]
    pub pages: u32,
    #[serde(default)]
    pub queries: Vec<SearchQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub what: String,
    #[serde(default, rename = "where")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub searches: Vec<PlatformSearch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSearch {
    pub keywords: String,
    pub location: String,
}

fn enabled() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_pages() -> u32 {
    1
}

#[derive(Debug, Clone)]
pub struct LoadedRegistry {
    pub registry: SourceRegistry,
    pub root: PathBuf,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedRegistry> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let registry =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(LoadedRegistry { registry, root })
    }
}

/// Instantiate every enabled adapter, career pages first.
pub fn build_adapters(
    loaded: &LoadedRegistry,
    adzuna: Option<AdzunaCredentials>,
) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let registry = &loaded.registry;
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

    if let Some(pages) = registry.career_pages.as_ref().filter(|c| c.enabled) {
        let dir = loaded.root.join(&pages.definitions_dir);
        let definitions = CareerPageDefinition::load_dir(&dir)?;
        info!(dir = %dir.display(), count = definitions.len(), "loaded career page definitions");
        adapters.extend(
            definitions
                .into_iter()
                .map(|d| Box::new(CareerPageAdapter::new(d)) as Box<dyn SourceAdapter>),
        );
    }

    if let Some(api) = registry.search_api.as_ref().filter(|c| c.enabled) {
        for query in &api.queries {
            adapters.push(Box::new(AdzunaAdapter {
                base_url: api.base_url.clone(),
                country: api.country.clone(),
                query: query.what.clone(),
                location: query.location.clone(),
                pages: api.pages,
                credentials: adzuna.clone(),
            }));
        }
    }

    if let Some(platform) = registry.platform.as_ref().filter(|c| c.enabled) {
        for search in &platform.searches {
            adapters.push(Box::new(LinkedInAdapter::new(
                search.keywords.clone(),
                search.location.clone(),
            )));
        }
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::workspace_root;

    #[test]
    fn fixture_registry_builds_all_adapter_kinds() {
        let loaded =
            SourceRegistry::load(workspace_root().join("fixtures/registry/sources.yaml")).unwrap();
        let adapters = build_adapters(&loaded, None).unwrap();
        let sources = adapters.iter().map(|a| a.source_id()).collect::<Vec<_>>();

        assert!(sources.contains(&"career_page"));
        assert!(sources.contains(&"adzuna_api"));
        assert!(sources.contains(&"linkedin"));
        assert_eq!(sources.first(), Some(&"career_page"));
        assert!(sources.contains(&"globex_careers"));
        assert_eq!(adapters.len(), 6);
    }

    #[test]
    fn shipped_registry_has_no_sample_career_pages() {
        let loaded = SourceRegistry::load(workspace_root().join("sources.yaml")).unwrap();
        let adapters = build_adapters(&loaded, None).unwrap();
        let sources = adapters.iter().map(|a| a.source_id()).collect::<Vec<_>>();

        assert_eq!(sources, ["adzuna_api", "adzuna_api", "adzuna_api", "linkedin"]);
    }

    #[test]
    fn disabled_sections_are_skipped_and_defaults_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(
            &path,
            r#"
career_pages:
  enabled: false
  definitions_dir: companies
search_api:
  queries:
    - what: data engineer
      where: Berlin
"#,
        )
        .unwrap();

        let loaded = SourceRegistry::load(&path).unwrap();
        let api = loaded.registry.search_api.as_ref().unwrap();
        assert_eq!(api.country, "us");
        assert_eq!(api.pages, 1);
        assert_eq!(api.queries[0].location.as_deref(), Some("Berlin"));

        let adapters = build_adapters(&loaded, None).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].label(), "adzuna_api:data engineer");
    }
}
