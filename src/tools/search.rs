//! Unified academic paper search.
//!
//! The canonical ingestion entry point: ArXiv and OpenAlex queried in
//! parallel, merged, quick-deduplicated, quality-gated, and refined through
//! up to two rounds of alternative queries when results are poor.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

use super::{ArxivClient, OpenAlexClient, QueryRefiner};

const MIN_ACCEPTABLE_RESULTS: usize = 3;

const QUERY_STOPWORDS: &[&str] = &[
    "and", "or", "the", "for", "with", "from", "about", "into", "that", "this", "are", "was",
    "were", "been", "have", "has",
];

/// Extra filler dropped when condensing queries for OpenAlex.
const CONDENSE_STOPWORDS: &[&str] = &[
    "a", "an", "of", "in", "on", "to", "is", "methods", "approaches", "techniques", "challenges",
    "gaps", "summary", "review", "recent", "studies",
];

/// Quality verdict over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchQuality {
    Acceptable,
    Poor,
}

pub struct UnifiedSearch {
    arxiv: ArxivClient,
    openalex: OpenAlexClient,
    refiner: QueryRefiner,
    max_refine_attempts: usize,
}

impl UnifiedSearch {
    pub fn new(timeout: Duration, refiner: QueryRefiner, max_refine_attempts: usize) -> Self {
        UnifiedSearch {
            arxiv: ArxivClient::new(timeout),
            openalex: OpenAlexClient::new(timeout),
            refiner,
            max_refine_attempts,
        }
    }

    /// Search both sources, refine if poor, return the accumulated unique list.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        categories: &[String],
    ) -> Vec<Value> {
        let mut results = self.parallel_search(query, max_results, categories).await;

        if quality(query, &results) == SearchQuality::Poor {
            if let Some(improved) = self
                .refine_and_retry(query, &results, max_results, categories)
                .await
            {
                results = improved;
            }
        }

        info!(
            query,
            total = results.len(),
            sources = ?count_sources(&results),
            "search_complete"
        );
        results
    }

    /// Run ArXiv and OpenAlex concurrently; either failure degrades to an
    /// empty list rather than failing the search.
    async fn parallel_search(
        &self,
        query: &str,
        max_results: usize,
        categories: &[String],
    ) -> Vec<Value> {
        let arxiv_fut = self.arxiv.search(query, categories, max_results);
        let openalex_fut = async {
            let condensed = condense_for_openalex(query);
            if condensed.is_empty() {
                return Ok(Vec::new());
            }
            self.openalex.search(&condensed, max_results).await
        };

        let (arxiv_results, openalex_results) = tokio::join!(arxiv_fut, openalex_fut);

        let mut all = Vec::new();
        match arxiv_results {
            Ok(papers) => all.extend(papers),
            Err(error) => warn!(%error, "arxiv_parallel_failed"),
        }
        match openalex_results {
            Ok(papers) => all.extend(papers),
            Err(error) => warn!(%error, "openalex_parallel_failed"),
        }

        let before = all.len();
        let unique = quick_dedup(all);
        if before > unique.len() {
            info!(removed = before - unique.len(), remaining = unique.len(), "search_dedup");
        }
        unique
    }

    async fn refine_and_retry(
        &self,
        original_query: &str,
        current: &[Value],
        max_results: usize,
        categories: &[String],
    ) -> Option<Vec<Value>> {
        let mut tried: Vec<String> = vec![original_query.to_lowercase().trim().to_string()];
        let mut best: Vec<Value> = current.to_vec();
        let mut found_relevant = false;

        for attempt in 0..self.max_refine_attempts {
            info!(
                attempt = attempt + 1,
                original_query,
                current_count = best.len(),
                "query_refine_attempt"
            );

            let suggestions = self
                .refiner
                .refine(original_query, best.len(), &tried)
                .await;
            if suggestions.is_empty() {
                info!("query_refine_no_suggestions");
                break;
            }

            for suggestion in suggestions {
                let normalized = suggestion.to_lowercase().trim().to_string();
                if tried.contains(&normalized) {
                    continue;
                }
                tried.push(normalized);

                info!(refined_query = %suggestion, "query_refine_trying");
                let fresh = self
                    .parallel_search(&suggestion, max_results, categories)
                    .await;
                if fresh.is_empty() {
                    continue;
                }

                if quality(&suggestion, &fresh) == SearchQuality::Acceptable {
                    best.extend(fresh);
                    best = quick_dedup(best);
                    found_relevant = true;
                    info!(new_total = best.len(), "query_refine_improved");
                    break;
                }
            }

            if found_relevant {
                break;
            }
        }

        (best.len() > current.len()).then_some(best)
    }
}

/// Poor quality: under 3 results, or under 20% of titles contain any
/// significant query keyword.
pub fn quality(query: &str, results: &[Value]) -> SearchQuality {
    if results.len() < MIN_ACCEPTABLE_RESULTS {
        return SearchQuality::Poor;
    }

    let keywords: HashSet<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|word| word.len() >= 3 && !QUERY_STOPWORDS.contains(&word.as_str()))
        .collect();
    if keywords.is_empty() {
        return SearchQuality::Acceptable;
    }

    let relevant = results
        .iter()
        .filter(|record| {
            let title = record
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            keywords.iter().any(|keyword| title.contains(keyword))
        })
        .count();

    let ratio = relevant as f64 / results.len() as f64;
    if ratio < 0.2 {
        info!(
            query,
            total = results.len(),
            relevant,
            "search_quality_poor"
        );
        SearchQuality::Poor
    } else {
        SearchQuality::Acceptable
    }
}

/// OpenAlex AND-matches all terms, so long queries return nothing. Keep at
/// most 4 significant words.
pub fn condense_for_openalex(query: &str) -> String {
    let words: Vec<&str> = query
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            word.len() >= 2
                && !QUERY_STOPWORDS.contains(&lower.as_str())
                && !CONDENSE_STOPWORDS.contains(&lower.as_str())
        })
        .take(4)
        .collect();

    if words.is_empty() {
        return query.trim().to_string();
    }
    let condensed = words.join(" ");
    if condensed != query.trim() {
        info!(original = query, condensed = %condensed, "openalex_query_condensed");
    }
    condensed
}

/// Quick dedup by arXiv id, DOI, and a title/first-author fingerprint.
pub fn quick_dedup(papers: Vec<Value>) -> Vec<Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();

    for paper in papers {
        let arxiv_id = paper
            .get("arxiv_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(id) = &arxiv_id {
            if seen.contains(id) {
                continue;
            }
        }

        if let Some(doi) = paper.get("doi").and_then(Value::as_str) {
            let doi_key = format!("doi:{}", doi.to_lowercase());
            if seen.contains(&doi_key) {
                continue;
            }
            seen.insert(doi_key);
        }

        let title: String = paper
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase()
            .trim()
            .chars()
            .take(50)
            .collect();
        let first_author = paper
            .get("authors")
            .and_then(Value::as_array)
            .and_then(|authors| authors.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let fingerprint = format!("fp:{title}|{first_author}");
        if seen.contains(&fingerprint) {
            continue;
        }

        if let Some(id) = arxiv_id {
            seen.insert(id);
        }
        seen.insert(fingerprint);
        unique.push(paper);
    }

    unique
}

fn count_sources(papers: &[Value]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for paper in papers {
        let source = paper
            .get("source_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        *counts.entry(source).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condense_keeps_four_significant_words() {
        assert_eq!(
            condense_for_openalex("knowledge distillation of LLM for text to SQL generation"),
            "knowledge distillation LLM text"
        );
        assert_eq!(condense_for_openalex("transformers"), "transformers");
    }

    #[test]
    fn quality_flags_few_results() {
        let results = vec![json!({"title": "Vision transformers"})];
        assert_eq!(quality("vision transformers", &results), SearchQuality::Poor);
    }

    #[test]
    fn quality_flags_irrelevant_titles() {
        let results: Vec<Value> = (0..5)
            .map(|i| json!({"title": format!("Unrelated paper {i}")}))
            .collect();
        assert_eq!(quality("quantum entanglement", &results), SearchQuality::Poor);
    }

    #[test]
    fn quality_accepts_matching_titles() {
        let results: Vec<Value> = (0..5)
            .map(|i| json!({"title": format!("Quantum entanglement study {i}")}))
            .collect();
        assert_eq!(
            quality("quantum entanglement", &results),
            SearchQuality::Acceptable
        );
    }

    #[test]
    fn dedup_catches_cross_source_duplicates() {
        let papers = vec![
            json!({"title": "Vision Transformer Architecture", "authors": ["Alice"], "arxiv_id": "2301.00001"}),
            json!({"title": "Vision Transformer Architecture", "authors": ["Alice"], "arxiv_id": "2301.00001"}),
            json!({"title": "BERT Pre-training", "authors": ["Bob"], "doi": "10.1234/test"}),
            json!({"title": "BERT Language Models", "authors": ["Bob"], "doi": "10.1234/TEST"}),
            json!({"title": "RL Robotics", "authors": ["Diana"], "doi": "10.5678/rl"}),
        ];
        let unique = quick_dedup(papers);
        assert_eq!(unique.len(), 3);
    }
}
