use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing status of a collected paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Raw,
    Screened,
    Fulltext,
    Extracted,
    Scored,
    Summarized,
    Indexed,
    Reported,
}

impl PaperStatus {
    /// True once the paper has passed at least screening/scoring.
    pub fn is_processed(self) -> bool {
        self != PaperStatus::Raw
    }
}

/// Structured summary extracted from a paper (abstract-level analysis).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperSummary {
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub results: String,
    #[serde(default)]
    pub limitations: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

/// One page of extracted PDF text, as character offsets into the full text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: usize,
    #[serde(default)]
    pub section: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
}

/// The canonical paper record.
///
/// Created by a collection step, deduplicated across the plan, then promoted
/// through statuses by the downstream phases. Never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Persistent id, assigned by the persistence phase.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,

    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    /// Source tag: arxiv, openalex, huggingface, url.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,

    #[serde(default = "default_status")]
    pub status: PaperStatus,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub summary: Option<PaperSummary>,
    #[serde(default)]
    pub cluster_id: Option<String>,

    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<u32>,

    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub page_map: Vec<PageInfo>,
    #[serde(default)]
    pub metadata_hash: Option<String>,
    #[serde(default)]
    pub pdf_hash: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_source() -> String {
    "arxiv".to_string()
}

fn default_status() -> PaperStatus {
    PaperStatus::Raw
}

impl Paper {
    pub fn new(title: impl Into<String>) -> Self {
        Paper {
            id: None,
            arxiv_id: None,
            doi: None,
            title: title.into(),
            abstract_text: String::new(),
            authors: Vec::new(),
            published: None,
            source: default_source(),
            url: None,
            pdf_url: None,
            status: PaperStatus::Raw,
            relevance_score: None,
            summary: None,
            cluster_id: None,
            plan_id: None,
            step_id: None,
            full_text: None,
            page_map: Vec::new(),
            metadata_hash: None,
            pdf_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Stable identity used for cross-references: persistent id if assigned,
    /// otherwise the arXiv id, otherwise the title.
    pub fn identity(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.arxiv_id.clone())
            .unwrap_or_else(|| self.title.clone())
    }

    /// Build a paper from the raw tool-boundary record.
    ///
    /// Unknown fields are ignored; missing optional fields stay empty.
    /// Source tags from the search tools are normalized (`arxiv_api` ->
    /// `arxiv`, `huggingface_trending` -> `huggingface`).
    pub fn from_tool_record(record: &Value) -> Option<Paper> {
        let title = record.get("title")?.as_str()?.trim();
        if title.is_empty() {
            return None;
        }

        let mut paper = Paper::new(title);
        paper.arxiv_id = string_field(record, "arxiv_id");
        paper.doi = string_field(record, "doi");
        paper.abstract_text = string_field(record, "abstract").unwrap_or_default();
        paper.url = string_field(record, "url");
        paper.pdf_url = string_field(record, "pdf_url");
        paper.authors = record
            .get("authors")
            .and_then(Value::as_array)
            .map(|authors| {
                authors
                    .iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        paper.published = string_field(record, "published")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        paper.source = match string_field(record, "source_type").as_deref() {
            Some("arxiv_api") | Some("arxiv_direct") => "arxiv".to_string(),
            Some("huggingface_trending") => "huggingface".to_string(),
            Some(other) => other.to_string(),
            None => string_field(record, "source").unwrap_or_else(default_source),
        };
        if let Some(step) = record.get("step_id").and_then(Value::as_u64) {
            paper.step_id = Some(step as u32);
        }
        paper.plan_id = string_field(record, "plan_id");
        Some(paper)
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }

    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.published.map(|date| date.year())
    }
}

fn string_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_tool_record_normalizes_sources() {
        let record = json!({
            "title": "Vision Transformer",
            "abstract": "We study attention.",
            "authors": ["Alice", "Bob"],
            "arxiv_id": "2301.00001",
            "source_type": "arxiv_api",
            "unknown_field": 42,
        });
        let paper = Paper::from_tool_record(&record).unwrap();
        assert_eq!(paper.source, "arxiv");
        assert_eq!(paper.first_author(), Some("Alice"));
        assert_eq!(paper.identity(), "2301.00001");
        assert_eq!(paper.status, PaperStatus::Raw);
    }

    #[test]
    fn record_without_title_is_rejected() {
        assert!(Paper::from_tool_record(&json!({"abstract": "x"})).is_none());
        assert!(Paper::from_tool_record(&json!({"title": "  "})).is_none());
    }

    #[test]
    fn serde_roundtrip_keeps_abstract_field_name() {
        let mut paper = Paper::new("T");
        paper.abstract_text = "body".into();
        let raw = serde_json::to_value(&paper).unwrap();
        assert_eq!(raw["abstract"], "body");
        let back: Paper = serde_json::from_value(raw).unwrap();
        assert_eq!(back.abstract_text, "body");
    }
}
