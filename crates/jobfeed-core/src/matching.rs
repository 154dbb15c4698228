//! Résumé-to-jobs scoring: keyword overlap blended with embedding similarity.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::keywords::extract_keywords;
use crate::JobRecord;

const SEMANTIC_WEIGHT: f64 = 0.7;
const KEYWORD_WEIGHT: f64 = 0.3;

const TITLE_WEIGHT: u32 = 3;
const DESCRIPTION_WEIGHT: u32 = 1;
const COMPANY_BONUS: u32 = 2;
const LOCATION_BONUS: u32 = 1;

/// Cosine similarity; 0 for mismatched, empty or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub job: JobRecord,
    /// Final blended score, 0–100.
    pub match_score: f64,
    /// Keyword score normalized against the batch maximum, 0–100.
    pub keyword_score: f64,
    /// Cosine similarity, 0–100, when both embeddings exist.
    pub semantic_score: Option<f64>,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HybridMatcher;

impl HybridMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        resume_text: &str,
        resume_embedding: Option<&[f32]>,
        jobs: &[JobRecord],
        top_n: usize,
    ) -> Vec<MatchResult> {
        if resume_text.trim().is_empty() || jobs.is_empty() {
            return Vec::new();
        }

        let resume_keywords = extract_keywords(resume_text);
        let raw = jobs
            .iter()
            .map(|job| keyword_overlap(&resume_keywords, job))
            .collect::<Vec<_>>();
        let max_raw = raw.iter().map(|(score, _)| *score).max().unwrap_or(0);

        let mut results = jobs
            .iter()
            .zip(raw)
            .map(|(job, (raw_score, matched_keywords))| {
                let keyword = if max_raw == 0 {
                    0.0
                } else {
                    f64::from(raw_score) / f64::from(max_raw)
                };
                let semantic = match (resume_embedding, job.embedding.as_deref()) {
                    (Some(resume), Some(job_vec)) => Some(cosine_similarity(resume, job_vec)),
                    _ => None,
                };
                let blended = match semantic {
                    Some(semantic) => SEMANTIC_WEIGHT * semantic + KEYWORD_WEIGHT * keyword,
                    None => keyword,
                };
                MatchResult {
                    job: job.clone(),
                    match_score: percent(blended),
                    keyword_score: percent(keyword),
                    semantic_score: semantic.map(percent),
                    matched_keywords,
                }
            })
            .collect::<Vec<_>>();

        results.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(top_n);
        results
    }
}

fn percent(fraction: f64) -> f64 {
    (fraction * 100.0 * 100.0).round() / 100.0
}

fn keyword_overlap(resume: &BTreeSet<String>, job: &JobRecord) -> (u32, Vec<String>) {
    let title = extract_keywords(&job.job.title);
    let description = extract_keywords(job.job.description.as_deref().unwrap_or_default());
    let company = extract_keywords(&job.job.company);
    let location = extract_keywords(job.job.location.as_deref().unwrap_or_default());

    let title_hits = resume.intersection(&title).count() as u32;
    let description_hits = resume.intersection(&description).count() as u32;
    let mut score = title_hits * TITLE_WEIGHT + description_hits * DESCRIPTION_WEIGHT;
    if resume.intersection(&company).next().is_some() {
        score += COMPANY_BONUS;
    }
    if resume.intersection(&location).next().is_some() {
        score += LOCATION_BONUS;
    }

    let matched = resume
        .iter()
        .filter(|k| {
            title.contains(*k) || description.contains(*k) || company.contains(*k) || location.contains(*k)
        })
        .cloned()
        .collect();
    (score, matched)
}
