//! Query refinement for poor search results.
//!
//! LLM-first with a heuristic fallback: strip version numbers, drop
//! stopwords, try adjacent word pairs, broaden with "survey". Never emits
//! single-word queries and never repeats an already-tried query.

use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::llm::{extract_json_value, GenerateRequest, LlmClient};
use crate::prompts;

const MAX_SUGGESTIONS: usize = 3;

const STOPWORDS: &[&str] = &[
    "and", "or", "the", "a", "an", "of", "for", "in", "on", "to", "with", "from", "about", "into",
    "that", "this", "are", "was", "is", "been", "have", "has", "were",
];

pub struct QueryRefiner {
    llm: Option<Arc<dyn LlmClient>>,
}

impl QueryRefiner {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        QueryRefiner { llm }
    }

    /// Generate 2-3 alternative queries, excluding everything in `tried`.
    pub async fn refine(
        &self,
        original_query: &str,
        num_results: usize,
        tried: &[String],
    ) -> Vec<String> {
        let tried_set: HashSet<String> =
            tried.iter().map(|q| q.to_lowercase().trim().to_string()).collect();

        if let Some(llm) = &self.llm {
            let suggestions = self
                .refine_with_llm(llm.as_ref(), original_query, num_results, &tried_set)
                .await;
            if !suggestions.is_empty() {
                return suggestions;
            }
        }

        refine_heuristic(original_query, &tried_set)
    }

    async fn refine_with_llm(
        &self,
        llm: &dyn LlmClient,
        query: &str,
        num_results: usize,
        tried: &HashSet<String>,
    ) -> Vec<String> {
        let tried_list = if tried.is_empty() {
            "none".to_string()
        } else {
            tried
                .iter()
                .map(|q| format!("\"{q}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let prompt = prompts::query_refine_prompt(query, num_results, &tried_list);
        match llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => {
                let suggestions: Vec<String> = extract_json_value(&response)
                    .and_then(|value| value.as_array().cloned())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .filter(|q| {
                                let normalized = q.to_lowercase().trim().to_string();
                                q.trim().len() > 2 && !tried.contains(&normalized)
                            })
                            .take(MAX_SUGGESTIONS)
                            .collect()
                    })
                    .unwrap_or_default();
                if !suggestions.is_empty() {
                    info!(original = query, refined = ?suggestions, "query_refine_llm_success");
                }
                suggestions
            }
            Err(error) => {
                warn!(%error, "query_refine_llm_failed");
                Vec::new()
            }
        }
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(v?\d+(\.\d+)*)\b").expect("valid regex"))
}

fn refine_heuristic(query: &str, tried: &HashSet<String>) -> Vec<String> {
    let mut suggestions = Vec::new();
    let mut seen = tried.clone();

    let mut add = |candidate: String, seen: &mut HashSet<String>, out: &mut Vec<String>| {
        let candidate = candidate.trim().to_string();
        let normalized = candidate.to_lowercase();
        // Single-word searches produce garbage; require at least two words.
        if !candidate.is_empty()
            && candidate.split_whitespace().count() >= 2
            && !seen.contains(&normalized)
        {
            seen.insert(normalized);
            out.push(candidate);
        }
    };

    // Strip version numbers and dangling stopwords left behind.
    let mut cleaned = version_regex().replace_all(query, "").to_string();
    cleaned = cleaned
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(&word.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    add(cleaned.clone(), &mut seen, &mut suggestions);

    // Significant words only.
    let words: Vec<&str> = query
        .split_whitespace()
        .filter(|word| word.len() > 2 && !STOPWORDS.contains(&word.to_lowercase().as_str()))
        .collect();
    if words.len() >= 2 {
        add(words.join(" "), &mut seen, &mut suggestions);
    }

    // Adjacent pairs break apart multi-concept queries.
    if words.len() >= 3 {
        for pair in words.windows(2) {
            add(format!("{} {}", pair[0], pair[1]), &mut seen, &mut suggestions);
        }
    }

    // Broaden.
    let base = if cleaned.is_empty() { query } else { &cleaned };
    add(format!("{base} survey"), &mut seen, &mut suggestions);

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_strips_versions_and_avoids_single_words() {
        let suggestions = refine_heuristic("DeepSeek OCR 2", &HashSet::new());
        assert!(!suggestions.is_empty());
        for suggestion in &suggestions {
            assert!(suggestion.split_whitespace().count() >= 2, "{suggestion}");
            assert!(!suggestion.contains('2'), "{suggestion}");
        }
    }

    #[test]
    fn heuristic_never_repeats_tried_queries() {
        let mut tried = HashSet::new();
        tried.insert("deepseek ocr".to_string());
        let suggestions = refine_heuristic("DeepSeek OCR", &tried);
        for suggestion in &suggestions {
            assert_ne!(suggestion.to_lowercase(), "deepseek ocr");
        }
    }

    #[test]
    fn heuristic_adds_survey_variant() {
        let suggestions = refine_heuristic("graph learning", &HashSet::new());
        assert!(suggestions.iter().any(|s| s.ends_with("survey")));
    }

    #[tokio::test]
    async fn refiner_without_llm_falls_back() {
        let refiner = QueryRefiner::new(None);
        let suggestions = refiner.refine("knowledge distillation LLM", 0, &[]).await;
        assert!(!suggestions.is_empty());
        assert!(suggestions.len() <= MAX_SUGGESTIONS);
    }
}
