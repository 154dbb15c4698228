//! Raw posting -> canonical job, plus the identity hash used for deduplication.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{CanonicalJob, JobType, RawPosting};

const UNKNOWN_TITLE: &str = "Unknown";
const UNKNOWN_COMPANY: &str = "Unknown";
const UNKNOWN_SOURCE: &str = "unknown";

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep scheme, authority and path; drop query and fragment.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match Url::parse(trimmed) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        _ => {
            let end = trimmed
                .find(|c: char| c == '?' || c == '#')
                .unwrap_or(trimmed.len());
            trimmed[..end].to_string()
        }
    }
}

pub fn classify_job_type(raw: &str) -> JobType {
    let lower = raw.trim().to_lowercase();
    if lower.contains("intern") {
        JobType::Internship
    } else if lower.contains("contract") || lower.contains("temporary") {
        JobType::Contract
    } else {
        JobType::FullTime
    }
}

/// SHA-256 over the lower-cased `title|company|location|url` tuple.
pub fn identity_hash(title: &str, company: &str, location: &str, apply_url: &str) -> String {
    let joined = [title, company, location, apply_url]
        .iter()
        .map(|part| normalize_whitespace(part).to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Total and deterministic: missing fields fall back to placeholders.
pub fn normalize(raw: &RawPosting) -> CanonicalJob {
    let title = non_empty(normalize_whitespace(raw.title.as_deref().unwrap_or_default()))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let company =
        non_empty(normalize_whitespace(&raw.company)).unwrap_or_else(|| UNKNOWN_COMPANY.to_string());
    let location = raw
        .location
        .as_deref()
        .map(normalize_whitespace)
        .and_then(non_empty);
    let apply_url = raw
        .apply_url
        .as_deref()
        .map(canonical_url)
        .and_then(non_empty);
    let source =
        non_empty(normalize_whitespace(&raw.source)).unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

    let identity_hash = identity_hash(
        &title,
        &company,
        location.as_deref().unwrap_or_default(),
        apply_url.as_deref().unwrap_or_default(),
    );

    let job_type_hint = raw
        .metadata
        .get("job_type")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&title);
    let job_type = classify_job_type(job_type_hint);

    let mut metadata = raw.metadata.clone();
    if let Some(original) = raw.apply_url.as_deref().map(str::trim) {
        if !original.is_empty() && Some(original) != apply_url.as_deref() {
            metadata.insert("raw_apply_url".to_string(), JsonValue::from(original));
        }
    }

    CanonicalJob {
        title,
        company,
        location,
        job_type,
        description: raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(ToString::to_string),
        apply_url,
        source,
        identity_hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme(title: &str, location: &str, url: &str) -> RawPosting {
        RawPosting {
            title: Some(title.to_string()),
            company: "Acme Corp".to_string(),
            location: Some(location.to_string()),
            description: Some("Build things".to_string()),
            apply_url: Some(url.to_string()),
            source: "career_page".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn tracking_params_and_whitespace_collapse_to_same_hash() {
        let a = normalize(&acme(
            "Software Engineer",
            "San Francisco, CA",
            "https://jobs.example.com/listing/123?utm_source=abc",
        ));
        let b = normalize(&acme(
            "Software   Engineer",
            "San  Francisco,\tCA",
            "https://jobs.example.com/listing/123?utm_campaign=xyz#apply",
        ));
        assert_eq!(a.apply_url, b.apply_url);
        assert_eq!(a.apply_url.as_deref(), Some("https://jobs.example.com/listing/123"));
        assert_eq!(a.identity_hash, b.identity_hash);
        assert_eq!(b.title, "Software Engineer");
    }

    #[test]
    fn hash_is_case_insensitive_and_field_sensitive() {
        let a = normalize(&acme("Software Engineer", "Remote", "https://x.test/1"));
        let upper = normalize(&acme("SOFTWARE ENGINEER", "remote", "https://x.test/1"));
        let other = normalize(&acme("Software Engineer", "Remote", "https://x.test/2"));
        assert_eq!(a.identity_hash, upper.identity_hash);
        assert_ne!(a.identity_hash, other.identity_hash);
        assert_eq!(a.identity_hash.len(), 64);
    }

    #[test]
    fn renormalizing_canonical_fields_is_idempotent() {
        let first = normalize(&acme(
            "  Data   Engineer ",
            "Austin,  TX",
            "https://jobs.example.com/a/b?ref=feed",
        ));
        let again = normalize(&RawPosting {
            title: Some(first.title.clone()),
            company: first.company.clone(),
            location: first.location.clone(),
            description: first.description.clone(),
            apply_url: first.apply_url.clone(),
            source: first.source.clone(),
            metadata: first.metadata.clone(),
        });
        assert_eq!(first.identity_hash, again.identity_hash);
        assert_eq!(first.apply_url, again.apply_url);
    }

    #[test]
    fn missing_fields_become_placeholders() {
        let job = normalize(&RawPosting {
            company: "   ".to_string(),
            ..Default::default()
        });
        assert_eq!(job.title, "Unknown");
        assert_eq!(job.company, "Unknown");
        assert_eq!(job.source, "unknown");
        assert!(job.location.is_none());
        assert!(job.apply_url.is_none());
        assert!(job.description.is_none());
        assert_eq!(job.identity_hash, identity_hash("unknown", "unknown", "", ""));
    }

    #[test]
    fn job_type_prefers_recorded_hint_then_title() {
        let mut raw = acme("Software Engineering Intern", "NYC", "https://x.test/1");
        assert_eq!(normalize(&raw).job_type, JobType::Internship);

        raw.metadata
            .insert("job_type".to_string(), JsonValue::from("Temporary contract"));
        assert_eq!(normalize(&raw).job_type, JobType::Contract);

        assert_eq!(classify_job_type("Full time"), JobType::FullTime);
        assert_eq!(classify_job_type(""), JobType::FullTime);
    }

    #[test]
    fn raw_apply_url_is_kept_only_when_it_differs() {
        let tracked = normalize(&acme("A", "B", "https://x.test/p?utm=1"));
        assert_eq!(
            tracked.metadata.get("raw_apply_url"),
            Some(&JsonValue::from("https://x.test/p?utm=1"))
        );
        let clean = normalize(&acme("A", "B", "https://x.test/p"));
        assert!(!clean.metadata.contains_key("raw_apply_url"));
    }

    #[test]
    fn unparseable_urls_still_lose_query_and_fragment() {
        assert_eq!(canonical_url("/careers/42?src=x"), "/careers/42");
        assert_eq!(canonical_url("careers#top"), "careers");
        assert_eq!(canonical_url("   "), "");
    }
}
