use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jobfeed_adapters::AdzunaCredentials;
use jobfeed_storage::{HttpClientConfig, RateLimit, SourceLimits};

const DAY_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

/// Cadence of every recurring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadences {
    pub fetch: Duration,
    pub backfill: Duration,
    pub drain: Duration,
    pub reconcile: Duration,
    pub purge: Duration,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(3600),
            backfill: Duration::from_secs(60),
            drain: Duration::from_secs(300),
            reconcile: Duration::from_secs(3600),
            purge: Duration::from_secs(30 * DAY_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub sources_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_requests_per_minute: Option<u32>,
    pub adapter_budget: Duration,
    pub cadences: Cadences,
    pub retention_days: i64,
    pub dedup_ttl: Duration,
    pub scheduler_enabled: bool,
    pub adzuna: Option<AdzunaCredentials>,
    pub embedding: EmbeddingConfig,
    pub backfill_batch: i64,
    pub smtp: SmtpConfig,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| text(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(parsed(key).filter(|n| *n > 0).unwrap_or(default))
        };
        let defaults = Cadences::default();

        let adzuna = match (text("ADZUNA_APP_ID"), text("ADZUNA_APP_KEY")) {
            (Some(app_id), Some(app_key)) => Some(AdzunaCredentials { app_id, app_key }),
            _ => None,
        };

        Self {
            database_url: text("DATABASE_URL"),
            redis_url: text("REDIS_URL"),
            sources_file: text("JOBFEED_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sources.yaml")),
            user_agent: text("JOBFEED_USER_AGENT")
                .unwrap_or_else(|| format!("jobfeed-bot/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: parsed("JOBFEED_HTTP_TIMEOUT_SECS").unwrap_or(20),
            http_requests_per_minute: text("JOBFEED_HTTP_REQUESTS_PER_MINUTE")
                .and_then(|v| parse_trimmed::<u32>(&v)),
            adapter_budget: secs("JOBFEED_ADAPTER_BUDGET_SECS", 120),
            cadences: Cadences {
                fetch: secs("JOBFEED_FETCH_EVERY_SECS", defaults.fetch.as_secs()),
                backfill: secs("JOBFEED_BACKFILL_EVERY_SECS", defaults.backfill.as_secs()),
                drain: secs("JOBFEED_DRAIN_EVERY_SECS", defaults.drain.as_secs()),
                reconcile: secs("JOBFEED_RECONCILE_EVERY_SECS", defaults.reconcile.as_secs()),
                purge: secs("JOBFEED_PURGE_EVERY_SECS", defaults.purge.as_secs()),
            },
            retention_days: text("JOBFEED_RETENTION_DAYS")
                .and_then(|v| parse_trimmed::<i64>(&v))
                .filter(|days| *days >= 0)
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            dedup_ttl: secs("JOBFEED_DEDUP_TTL_SECS", 14 * DAY_SECS),
            scheduler_enabled: text("JOBFEED_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            adzuna,
            embedding: EmbeddingConfig {
                base_url: text("EMBEDDING_SERVICE_URL"),
                api_key: text("EMBEDDING_API_KEY"),
                batch_size: text("EMBEDDING_BATCH_SIZE")
                    .and_then(|v| parse_trimmed::<usize>(&v))
                    .filter(|n| *n > 0)
                    .unwrap_or(32),
            },
            backfill_batch: text("JOBFEED_BACKFILL_BATCH")
                .and_then(|v| parse_trimmed::<i64>(&v))
                .filter(|n| *n > 0)
                .unwrap_or(1),
            smtp: SmtpConfig {
                host: text("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: text("SMTP_PORT")
                    .and_then(|v| parse_trimmed::<u16>(&v))
                    .unwrap_or(587),
                user: text("SMTP_USER"),
                password: text("SMTP_PASSWORD"),
                from: text("SMTP_FROM"),
            },
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            per_source: SourceLimits::default().with(jobfeed_adapters::platform::SOURCE_ID, 1),
            rate_limit: self
                .http_requests_per_minute
                .and_then(RateLimit::per_minute),
            ..Default::default()
        }
    }
}

fn parse_trimmed<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        SyncConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);
        assert!(config.database_url.is_none());
        assert_eq!(config.sources_file, PathBuf::from("sources.yaml"));
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.adapter_budget, Duration::from_secs(120));
        assert_eq!(config.cadences, Cadences::default());
        assert_eq!(config.cadences.purge, Duration::from_secs(30 * DAY_SECS));
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.dedup_ttl, Duration::from_secs(14 * DAY_SECS));
        assert!(config.scheduler_enabled);
        assert!(config.adzuna.is_none());
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.backfill_batch, 1);
        assert_eq!(config.smtp.port, 587);
        let http = config.http_client_config();
        assert!(http.rate_limit.is_none());
        assert_eq!(http.per_source.limit_for("linkedin"), 1);
        assert_eq!(http.per_source.limit_for("career_page"), 2);
    }

    #[test]
    fn overrides_are_parsed_and_blank_values_ignored() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://jobfeed@localhost/jobfeed"),
            ("REDIS_URL", "   "),
            ("JOBFEED_FETCH_EVERY_SECS", "900"),
            ("JOBFEED_RETENTION_DAYS", "7"),
            ("JOBFEED_SCHEDULER_ENABLED", "false"),
            ("JOBFEED_HTTP_REQUESTS_PER_MINUTE", "30"),
            ("ADZUNA_APP_ID", "id"),
            ("ADZUNA_APP_KEY", "key"),
            ("EMBEDDING_BATCH_SIZE", "0"),
            ("SMTP_PORT", "not-a-port"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://jobfeed@localhost/jobfeed")
        );
        assert!(config.redis_url.is_none());
        assert_eq!(config.cadences.fetch, Duration::from_secs(900));
        assert_eq!(config.retention_days, 7);
        assert!(!config.scheduler_enabled);
        assert_eq!(
            config.adzuna,
            Some(AdzunaCredentials {
                app_id: "id".into(),
                app_key: "key".into()
            })
        );
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(
            config.http_client_config().rate_limit.map(|limit| limit.burst),
            Some(30)
        );
    }

    #[test]
    fn negative_retention_and_zero_cadences_fall_back_to_defaults() {
        let config = config_from(&[
            ("JOBFEED_RETENTION_DAYS", "-5"),
            ("JOBFEED_FETCH_EVERY_SECS", "0"),
            ("JOBFEED_DRAIN_EVERY_SECS", "0"),
            ("JOBFEED_ADAPTER_BUDGET_SECS", "0"),
        ]);
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.cadences, Cadences::default());
        assert_eq!(config.adapter_budget, Duration::from_secs(120));

        assert_eq!(config_from(&[("JOBFEED_RETENTION_DAYS", "0")]).retention_days, 0);
    }

    #[test]
    fn adzuna_needs_both_credentials() {
        assert!(config_from(&[("ADZUNA_APP_ID", "id")]).adzuna.is_none());
    }
}
