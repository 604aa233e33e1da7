use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Screening decision tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningTier {
    Core,
    Background,
    Exclude,
}

impl ScreeningTier {
    pub fn includes(self) -> bool {
        self != ScreeningTier::Exclude
    }
}

/// Write-once record of a screening decision for one paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRecord {
    pub paper_id: String,
    pub tier: ScreeningTier,
    pub include: bool,
    pub reason_code: String,
    pub rationale_short: String,
    pub scored_relevance: Option<f64>,
}

impl ScreeningRecord {
    pub fn new(paper_id: impl Into<String>, tier: ScreeningTier) -> Self {
        ScreeningRecord {
            paper_id: paper_id.into(),
            tier,
            include: tier.includes(),
            reason_code: String::new(),
            rationale_short: String::new(),
            scored_relevance: None,
        }
    }
}

/// Which study-card field an evidence span backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceField {
    Problem,
    Method,
    Dataset,
    Metric,
    Result,
    Limitation,
}

impl EvidenceField {
    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceField::Problem => "problem",
            EvidenceField::Method => "method",
            EvidenceField::Dataset => "dataset",
            EvidenceField::Metric => "metric",
            EvidenceField::Result => "result",
            EvidenceField::Limitation => "limitation",
        }
    }
}

/// Position of a snippet within a paper's full text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub char_start: Option<usize>,
    #[serde(default)]
    pub char_end: Option<usize>,
}

/// A verbatim snippet from a paper, addressable by a deterministic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub span_id: String,
    pub paper_id: String,
    pub field: EvidenceField,
    pub snippet: String,
    #[serde(default)]
    pub locator: Locator,
    pub confidence: f64,
    #[serde(default)]
    pub source_url: String,
}

/// Maximum snippet length retained on a span.
pub const SNIPPET_MAX_CHARS: usize = 300;

impl EvidenceSpan {
    /// Deterministic span id: `{paper_id}#{sha1(snippet)[:8]}`.
    ///
    /// Reproducible across runs, which both makes re-extraction idempotent
    /// and prevents the model from minting ids for snippets it invented.
    pub fn span_id_for(paper_id: &str, snippet: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(snippet.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}#{}", paper_id, &digest[..8])
    }

    pub fn new(
        paper_id: impl Into<String>,
        field: EvidenceField,
        snippet: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let paper_id = paper_id.into();
        let mut snippet: String = snippet.into();
        if snippet.chars().count() > SNIPPET_MAX_CHARS {
            snippet = snippet.chars().take(SNIPPET_MAX_CHARS).collect();
        }
        let span_id = Self::span_id_for(&paper_id, &snippet);
        EvidenceSpan {
            span_id,
            paper_id,
            field,
            snippet,
            locator: Locator::default(),
            confidence: confidence.clamp(0.0, 1.0),
            source_url: String::new(),
        }
    }
}

/// Structured per-paper extraction. Every populated field must be backed by
/// at least one span id in `evidence_span_ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyCard {
    pub paper_id: String,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub evidence_span_ids: Vec<String>,
    /// Where the text came from: "full_text" or "abstract".
    #[serde(default)]
    pub content_source: String,
}

/// Thematic grouping of papers. Partitions the post-screening corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub paper_ids: Vec<String>,
    #[serde(default)]
    pub plan_id: String,
}

/// An atomic factual statement backed by evidence spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub claim_text: String,
    pub evidence_span_ids: Vec<String>,
    pub theme_id: String,
    pub salience_score: f64,
    #[serde(default)]
    pub uncertainty_flag: bool,
}

/// Coverage matrix over (theme, dataset, metric) cells.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyMatrix {
    pub themes: Vec<String>,
    pub datasets: Vec<String>,
    pub metrics: Vec<String>,
    pub method_families: Vec<String>,
    /// `"(theme, dataset, metric)"` -> paper ids covering that cell.
    pub cells: HashMap<String, Vec<String>>,
}

impl TaxonomyMatrix {
    pub fn cell_key(theme: &str, dataset: &str, metric: &str) -> String {
        format!("({theme}, {dataset}, {metric})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionType {
    OpenProblem,
    ResearchOpportunity,
    NextExperiment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSource {
    LimitationCluster,
    ContradictoryResults,
    TaxonomyHole,
}

impl GapSource {
    pub fn label(self) -> &'static str {
        match self {
            GapSource::LimitationCluster => "limitation cluster",
            GapSource::ContradictoryResults => "contradictory results",
            GapSource::TaxonomyHole => "taxonomy hole",
        }
    }
}

/// A future research direction mined from gaps in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutureDirection {
    pub direction_type: DirectionType,
    pub title: String,
    pub description: String,
    /// Limitation-field span ids grounding this direction. May be empty
    /// for taxonomy-hole gaps.
    #[serde(default)]
    pub evidence_span_ids: Vec<String>,
    pub gap_source: GapSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_id_is_deterministic_and_prefixed() {
        let a = EvidenceSpan::span_id_for("2301.00001", "some snippet");
        let b = EvidenceSpan::span_id_for("2301.00001", "some snippet");
        assert_eq!(a, b);
        assert!(a.starts_with("2301.00001#"));
        assert_eq!(a.len(), "2301.00001#".len() + 8);
    }

    #[test]
    fn span_constructor_truncates_and_clamps() {
        let long: String = "x".repeat(500);
        let span = EvidenceSpan::new("p1", EvidenceField::Result, long, 3.0);
        assert_eq!(span.snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert_eq!(span.confidence, 1.0);
        assert_eq!(span.span_id, EvidenceSpan::span_id_for("p1", &span.snippet));
    }

    #[test]
    fn exclude_tier_never_includes() {
        let record = ScreeningRecord::new("p1", ScreeningTier::Exclude);
        assert!(!record.include);
        assert!(ScreeningRecord::new("p2", ScreeningTier::Background).include);
    }
}
