//! Query analysis for adaptive planning: QUICK vs FULL routing and URL
//! extraction. Works with any language via multilingual keyword sets.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::core::{QueryInfo, QueryType};

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"))
}

/// Keywords indicating QUICK mode.
const QUICK_KEYWORDS: &[&str] = &[
    "quick", "fast", "brief", "simple", "basic", "short",
    // Vietnamese
    "nhanh", "ngắn",
    // Chinese
    "快速", "简单",
];

/// Keywords indicating FULL mode.
const FULL_KEYWORDS: &[&str] = &[
    "comprehensive", "thorough", "complete", "detailed", "in-depth", "survey", "overview", "full",
    "deep",
    // Vietnamese
    "chi tiết", "toàn diện", "đầy đủ", "sâu",
    // Chinese
    "全面", "详细", "完整", "深入",
];

/// Common prefixes stripped when extracting the main topic.
const TOPIC_PREFIXES: &[&str] = &[
    "research",
    "find papers on",
    "search for",
    "look up",
    "survey of",
    "overview of",
    "tell me about",
    // Vietnamese
    "nghiên cứu về",
    "tìm bài báo về",
    "tìm kiếm",
];

/// Extract URLs from raw message text.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[derive(Default)]
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        QueryParser
    }

    pub fn parse(&self, query: &str) -> QueryInfo {
        let query_clean = query.trim();
        let query_lower = query_clean.to_lowercase();
        let words: HashSet<&str> = query_lower.split_whitespace().collect();

        let urls = extract_urls(query);
        let query_type = detect_type(&query_lower, &words);

        QueryInfo {
            original_query: query.to_string(),
            query_type,
            main_topic: extract_topic(query_clean),
            urls,
            skip_synthesis: query_type == QueryType::Quick,
        }
    }
}

fn detect_type(query_lower: &str, words: &HashSet<&str>) -> QueryType {
    // Single-word indicators match on word boundaries, multi-word ones by
    // substring (CJK sets have no spaces to split on).
    let matches = |keywords: &[&str]| {
        keywords.iter().any(|keyword| {
            if keyword.contains(' ') || !keyword.is_ascii() {
                query_lower.contains(keyword)
            } else {
                words.contains(keyword)
            }
        })
    };

    if matches(QUICK_KEYWORDS) {
        return QueryType::Quick;
    }
    if matches(FULL_KEYWORDS) {
        return QueryType::Full;
    }
    // A short lookup of a specific paper ("BERT paper") wants an answer,
    // not a survey.
    if words.contains("paper") && words.len() <= 3 {
        return QueryType::Quick;
    }
    // Research tasks default to the full pipeline.
    QueryType::Full
}

fn extract_topic(query: &str) -> String {
    let mut result = query.trim().to_string();

    loop {
        let lower = result.to_lowercase();
        let Some(prefix) = TOPIC_PREFIXES.iter().find(|p| lower.starts_with(**p)) else {
            break;
        };
        result = result[prefix.len()..].trim().to_string();
        if result.is_empty() {
            return query.trim().to_string();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_keyword_routes_quick() {
        let parser = QueryParser::new();
        let info = parser.parse("quick look at BERT");
        assert_eq!(info.query_type, QueryType::Quick);
        assert!(info.skip_synthesis);
    }

    #[test]
    fn default_is_full() {
        let parser = QueryParser::new();
        let info = parser.parse("vision transformers");
        assert_eq!(info.query_type, QueryType::Full);
        assert!(!info.skip_synthesis);
    }

    #[test]
    fn vietnamese_quick_keyword() {
        let parser = QueryParser::new();
        let info = parser.parse("tóm tắt nhanh về transformers");
        assert_eq!(info.query_type, QueryType::Quick);
    }

    #[test]
    fn short_paper_lookup_is_quick() {
        let parser = QueryParser::new();
        assert_eq!(parser.parse("BERT paper").query_type, QueryType::Quick);
        assert_eq!(
            parser.parse("survey of BERT paper variants").query_type,
            QueryType::Full
        );
    }

    #[test]
    fn urls_are_extracted() {
        let parser = QueryParser::new();
        let info = parser.parse("summarize https://arxiv.org/abs/2301.00001 please");
        assert_eq!(info.urls, vec!["https://arxiv.org/abs/2301.00001"]);
    }

    #[test]
    fn topic_prefixes_are_stripped() {
        let parser = QueryParser::new();
        let info = parser.parse("find papers on linear attention");
        assert_eq!(info.main_topic, "linear attention");

        let info = parser.parse("tell me about survey of diffusion models");
        assert_eq!(info.main_topic, "diffusion models");
    }
}
