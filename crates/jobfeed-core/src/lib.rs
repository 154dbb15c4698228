//! Core domain model for jobfeed: raw postings, canonical jobs, alerts and notification tasks.

pub mod keywords;
pub mod matching;
pub mod normalize;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

pub use keywords::extract_keywords;
pub use matching::{cosine_similarity, HybridMatcher, MatchResult};
pub use normalize::{canonical_url, classify_job_type, identity_hash, normalize, normalize_whitespace};

pub const CRATE_NAME: &str = "jobfeed-core";

/// Open, loosely-typed metadata attached to postings and stored alongside jobs.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Coerce a stored metadata blob into a map.
///
/// Objects are used as-is. Older rows stored the map wrapped in a
/// single-element list; that wrapper is removed. Anything else is dropped.
pub fn coerce_metadata(value: JsonValue) -> Metadata {
    match value {
        JsonValue::Object(map) => map.into_iter().collect(),
        JsonValue::Array(mut items) if items.len() == 1 && items[0].is_object() => {
            coerce_metadata(items.remove(0))
        }
        JsonValue::Null => Metadata::new(),
        other => {
            warn!(blob = %other, "discarding metadata blob that is not a map");
            Metadata::new()
        }
    }
}

/// Classification attached to every soft failure so call sites can pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transport,
    Parse,
    Persistence,
    Unavailable,
    Configuration,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureClass::Transport => "transport",
            FailureClass::Parse => "parse",
            FailureClass::Persistence => "persistence",
            FailureClass::Unavailable => "unavailable",
            FailureClass::Configuration => "configuration",
        };
        f.write_str(label)
    }
}

/// Adapter output before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPosting {
    pub title: Option<String>,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub apply_url: Option<String>,
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "internship")]
    Internship,
    #[serde(rename = "contract")]
    Contract,
    #[serde(rename = "full-time")]
    FullTime,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Internship => "internship",
            JobType::Contract => "contract",
            JobType::FullTime => "full-time",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internship" => Ok(JobType::Internship),
            "contract" => Ok(JobType::Contract),
            "full-time" => Ok(JobType::FullTime),
            other => Err(format!("unknown job type {other:?}")),
        }
    }
}

/// Normalized posting keyed by its identity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJob {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub job_type: JobType,
    pub description: Option<String>,
    /// Scheme, authority and path only.
    pub apply_url: Option<String>,
    pub source: String,
    pub identity_hash: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A canonical job as held by durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    #[serde(flatten)]
    pub job: CanonicalJob,
    pub is_active: bool,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional predicates of a user alert. Unset or blank fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, job: &CanonicalJob) -> bool {
        if let Some(needle) = populated(&self.title) {
            if !contains_ignore_case(&job.title, needle) {
                return false;
            }
        }
        if let Some(needle) = populated(&self.company) {
            if !contains_ignore_case(&job.company, needle) {
                return false;
            }
        }
        if let Some(needle) = populated(&self.location) {
            match job.location.as_deref() {
                Some(location) if contains_ignore_case(location, needle) => {}
                _ => return false,
            }
        }
        if let Some(job_type) = populated(&self.job_type) {
            if job.job_type.as_str() != job_type {
                return false;
            }
        }
        true
    }
}

fn populated(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub filters: AlertFilter,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Minimal job fields carried inside a queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub job_type: String,
    pub source: String,
    #[serde(rename = "apply_link")]
    pub apply_url: Option<String>,
}

impl From<&JobRecord> for JobSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            title: record.job.title.clone(),
            company: record.job.company.clone(),
            location: record.job.location.clone(),
            job_type: record.job.job_type.as_str().to_string(),
            source: record.job.source.clone(),
            apply_url: record.job.apply_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub to_email: String,
    pub alert_name: String,
    pub jobs: Vec<JobSnapshot>,
}
