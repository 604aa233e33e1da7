//! Query clarification: complexity detection, language detection, and the
//! clarifying-question round-trip a researcher would ask before searching.

use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::llm::{GenerateRequest, LlmClient};
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    Simple,
    Compound,
    Ambiguous,
}

/// Detected user language. All user-visible messages are templated per
/// language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Vietnamese,
    Spanish,
    French,
    German,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::English => "English",
            Language::Vietnamese => "Vietnamese",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClarificationResult {
    pub needs_clarification: bool,
    pub complexity: QueryComplexity,
    pub questions: Vec<String>,
    pub understanding: String,
    pub sub_queries: Vec<String>,
    pub original_query: String,
    pub detected_language: Language,
}

const COMPOUND_INDICATORS: &[&str] = &[
    " and ", " then ", " also ", " plus ",
    // Vietnamese
    " và ", " rồi ", " thêm ",
    ", ",
];

const EXPLORATION_WORDS: &[&str] = &[
    "can", "could", "possible", "if", "whether", "how to",
    // Vietnamese
    "có thể", "liệu",
];

/// A language qualifies only with at least two distinct indicator words.
const MIN_INDICATOR_WORDS: usize = 2;

const VIETNAMESE_WORDS: &[&str] = &[
    "chào", "tôi", "cho", "tìm", "về", "có", "là", "của", "và", "được", "này", "đó", "muốn",
    "bạn", "nghiên", "cứu",
];
const SPANISH_WORDS: &[&str] = &[
    "hola", "buscar", "encontrar", "sobre", "investigación", "qué", "cómo", "dónde",
];
const FRENCH_WORDS: &[&str] = &[
    "bonjour", "chercher", "trouver", "recherche", "recherches", "où",
];
const GERMAN_WORDS: &[&str] = &["hallo", "suchen", "finden", "über", "forschung"];

/// Word-boundary language detection over per-language indicator sets.
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    let count = |set: &[&str]| set.iter().filter(|w| words.contains(w)).count();

    if count(VIETNAMESE_WORDS) >= MIN_INDICATOR_WORDS {
        return Language::Vietnamese;
    }
    if count(SPANISH_WORDS) >= MIN_INDICATOR_WORDS {
        return Language::Spanish;
    }
    if count(FRENCH_WORDS) >= MIN_INDICATOR_WORDS {
        return Language::French;
    }
    if count(GERMAN_WORDS) >= MIN_INDICATOR_WORDS {
        return Language::German;
    }
    Language::English
}

pub struct QueryClarifier {
    llm: Option<Arc<dyn LlmClient>>,
}

impl QueryClarifier {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        QueryClarifier { llm }
    }

    /// Analyze a query; short simple queries skip clarification entirely.
    pub async fn analyze(&self, query: &str) -> ClarificationResult {
        let query_lower = query.to_lowercase();
        let complexity = detect_complexity(&query_lower);

        if complexity == QueryComplexity::Simple && query.split_whitespace().count() < 6 {
            return ClarificationResult {
                needs_clarification: false,
                complexity,
                questions: Vec::new(),
                understanding: String::new(),
                sub_queries: Vec::new(),
                original_query: query.to_string(),
                detected_language: detect_language(query),
            };
        }

        if let Some(llm) = &self.llm {
            if let Some(result) = self.analyze_with_llm(llm.as_ref(), query, complexity).await {
                return result;
            }
        }
        analyze_with_rules(query, complexity)
    }

    async fn analyze_with_llm(
        &self,
        llm: &dyn LlmClient,
        query: &str,
        complexity: QueryComplexity,
    ) -> Option<ClarificationResult> {
        let language = detect_language(query);
        let prompt = prompts::clarify_prompt(query, &language.to_string());

        match llm.generate(GenerateRequest::new(prompt)).await {
            Ok(response) => {
                let mut result = parse_llm_response(&response, query, complexity);
                result.detected_language = language;
                Some(result)
            }
            Err(error) => {
                warn!(%error, "llm clarification failed");
                None
            }
        }
    }

    /// Format clarification as natural prose, no robotic headers.
    pub fn format_message(&self, result: &ClarificationResult) -> String {
        let mut lines = Vec::new();
        lines.push(result.understanding.clone());

        if !result.sub_queries.is_empty() {
            lines.push(String::new());
            lines.push(
                match result.detected_language {
                    Language::Vietnamese => "Tôi thấy bạn muốn tìm hiểu về:",
                    Language::Spanish => "Veo que quieres investigar:",
                    Language::French => "Je vois que vous voulez rechercher:",
                    Language::German => "Ich sehe, Sie möchten recherchieren:",
                    Language::English => "I see you want to look into:",
                }
                .to_string(),
            );
            for (index, sub_query) in result.sub_queries.iter().enumerate() {
                lines.push(format!("{}. {sub_query}", index + 1));
            }
        }

        if !result.questions.is_empty() {
            lines.push(String::new());
            for question in &result.questions {
                lines.push(question.clone());
            }
        }

        lines.join("\n")
    }
}

fn detect_complexity(query_lower: &str) -> QueryComplexity {
    for indicator in COMPOUND_INDICATORS {
        if query_lower.contains(indicator) {
            // Both sides of the split have to carry content, otherwise
            // "research and development" style phrases would trip this.
            let parts: Vec<&str> = query_lower.splitn(2, indicator).collect();
            if parts.len() == 2 && parts.iter().all(|part| part.trim().len() > 3) {
                return QueryComplexity::Compound;
            }
        }
    }

    if EXPLORATION_WORDS
        .iter()
        .any(|word| query_lower.contains(word))
    {
        return QueryComplexity::Ambiguous;
    }

    if query_lower.split_whitespace().count() > 10 {
        return QueryComplexity::Compound;
    }
    QueryComplexity::Simple
}

fn analyze_with_rules(query: &str, complexity: QueryComplexity) -> ClarificationResult {
    let query_lower = query.to_lowercase();
    let mut questions = Vec::new();
    let mut sub_queries = Vec::new();

    if complexity == QueryComplexity::Compound {
        for indicator in COMPOUND_INDICATORS {
            if query_lower.contains(indicator) {
                sub_queries = query_lower
                    .split(indicator)
                    .map(str::trim)
                    .filter(|part| part.len() > 3)
                    .map(str::to_string)
                    .collect();
                break;
            }
        }
        if sub_queries.is_empty() {
            questions.push("This seems like a complex question. What's your main goal?".to_string());
        } else {
            questions.push("This has multiple parts. Which is most important to you?".to_string());
        }
    }

    if EXPLORATION_WORDS
        .iter()
        .any(|word| query_lower.contains(word))
    {
        questions
            .push("Are you looking for existing research, or exploring if this is possible?".to_string());
    }

    questions.truncate(2);
    ClarificationResult {
        needs_clarification: !questions.is_empty(),
        complexity,
        questions,
        understanding: format!("Research query: {query}"),
        sub_queries,
        original_query: query.to_string(),
        detected_language: detect_language(query),
    }
}

/// Parse the line-based UNDERSTANDING/SUBQUERIES/QUESTIONS format,
/// tolerantly.
fn parse_llm_response(
    response: &str,
    query: &str,
    complexity: QueryComplexity,
) -> ClarificationResult {
    let mut understanding = String::new();
    let mut sub_queries = Vec::new();
    let mut questions: Vec<String> = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("UNDERSTANDING:") {
            understanding = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("SUBQUERIES:") {
            let content = rest.trim();
            if !content.eq_ignore_ascii_case("none") {
                sub_queries = content
                    .split('|')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        } else if let Some(rest) = line.strip_prefix("QUESTIONS:") {
            let content = rest.trim();
            if !content.eq_ignore_ascii_case("none") {
                questions = content
                    .split('|')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
    }

    questions.truncate(2);
    ClarificationResult {
        needs_clarification: !questions.is_empty(),
        complexity,
        questions,
        understanding: if understanding.is_empty() {
            format!("Research query: {query}")
        } else {
            understanding
        },
        sub_queries,
        original_query: query.to_string(),
        detected_language: Language::English,
    }
}
