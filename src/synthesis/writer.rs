//! Grounded report writer.
//!
//! Produces a Markdown report with a fixed outline: scope and search
//! strategy, theme map, per-theme synthesis with inline evidence quotes, a
//! comparative table from the taxonomy, aggregated limitations, future
//! directions, and a numbered reference list. Every statement traces back
//! to a claim, which traces back to evidence spans.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

use crate::core::{
    Claim, Cluster, EvidenceField, EvidenceSpan, FutureDirection, Paper, TaxonomyMatrix,
};
use crate::llm::{GenerateRequest, LlmClient};
use crate::prompts;

pub struct GroundedWriter<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> GroundedWriter<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        GroundedWriter { llm }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn generate_report(
        &self,
        topic: &str,
        claims: &[Claim],
        clusters: &[Cluster],
        evidence_spans: &[EvidenceSpan],
        papers: &[Paper],
        taxonomy: &TaxonomyMatrix,
        future_directions: &[FutureDirection],
        search_strategy: &str,
    ) -> String {
        let paper_map: HashMap<String, &Paper> =
            papers.iter().map(|paper| (paper.identity(), paper)).collect();
        let span_map: HashMap<&str, &EvidenceSpan> = evidence_spans
            .iter()
            .map(|span| (span.span_id.as_str(), span))
            .collect();
        let mut claims_by_theme: HashMap<&str, Vec<&Claim>> = HashMap::new();
        for claim in claims {
            claims_by_theme
                .entry(claim.theme_id.as_str())
                .or_default()
                .push(claim);
        }

        let mut sections: Vec<String> = Vec::new();
        sections.push(format!("# Research Report: {topic}"));
        sections.push(format!(
            "*Generated: {}*\n*Papers analyzed: {}*",
            Utc::now().format("%Y-%m-%d %H:%M"),
            papers.len()
        ));

        // 1. Scope & search strategy
        sections.push("## 1. Scope & Search Strategy".into());
        if search_strategy.is_empty() {
            sections.push(format!(
                "This report synthesizes findings from {} papers on the topic of \
                 **{topic}**. Papers were collected, screened, and analyzed through \
                 an automated citation-first pipeline.",
                papers.len()
            ));
        } else {
            sections.push(search_strategy.to_string());
        }

        // 2. Theme map
        sections.push("## 2. Theme Map".into());
        if clusters.is_empty() {
            sections.push("No thematic clusters were identified.".into());
        } else {
            let mut lines = Vec::new();
            for cluster in clusters {
                lines.push(format!(
                    "- **{}** ({} papers): {}",
                    cluster.name,
                    cluster.paper_ids.len(),
                    cluster.description
                ));
            }
            sections.push(lines.join("\n"));
        }

        // 3. Per-theme synthesis
        sections.push("## 3. Thematic Synthesis".into());
        for cluster in clusters {
            sections.push(format!("### {}", cluster.name));
            let theme_claims = claims_by_theme.get(cluster.id.as_str());
            match theme_claims {
                Some(theme_claims) if !theme_claims.is_empty() => {
                    let synthesis = self
                        .synthesize_theme(&cluster.name, theme_claims, &span_map, &paper_map)
                        .await;
                    sections.push(synthesis);
                    sections.push(key_evidence_block(theme_claims, &span_map, &paper_map));
                }
                _ => sections.push("*No grounded claims available for this theme.*".into()),
            }
        }

        // 4. Comparative table
        let has_table = !taxonomy.cells.is_empty();
        if has_table {
            sections.push("## 4. Comparative Table".into());
            sections.push(render_comparative_table(taxonomy));
        }

        // 5. Aggregated limitations
        let section = if has_table { 5 } else { 4 };
        sections.push(format!("## {section}. Limitations"));
        let limitation_spans: Vec<&EvidenceSpan> = evidence_spans
            .iter()
            .filter(|span| span.field == EvidenceField::Limitation)
            .collect();
        if limitation_spans.is_empty() {
            sections.push("*No explicit limitations extracted from the corpus.*".into());
        } else {
            let mut lines = Vec::new();
            for span in limitation_spans.iter().take(15) {
                let reference = paper_map
                    .get(&span.paper_id)
                    .map(|paper| truncate(&paper.title, 50))
                    .unwrap_or_else(|| span.paper_id.clone());
                lines.push(format!(
                    "- *\"{}\"* — [{reference}]",
                    truncate(&span.snippet, 200)
                ));
            }
            sections.push(lines.join("\n"));
        }

        // 6. Future research directions
        sections.push(format!("## {}. Future Research Directions", section + 1));
        if future_directions.is_empty() {
            sections.push("*No future directions generated.*".into());
        } else {
            for (index, direction) in future_directions.iter().enumerate() {
                let type_label = match direction.direction_type {
                    crate::core::DirectionType::OpenProblem => "Open Problem",
                    crate::core::DirectionType::ResearchOpportunity => "Research Opportunity",
                    crate::core::DirectionType::NextExperiment => "Next Experiment",
                };
                let mut block = vec![
                    format!("### {}. {} ({type_label})", index + 1, direction.title),
                    direction.description.clone(),
                ];
                for span_id in direction.evidence_span_ids.iter().take(2) {
                    if let Some(span) = span_map.get(span_id.as_str()) {
                        block.push(format!("  - Based on: *\"{}...\"*", truncate(&span.snippet, 150)));
                    }
                }
                block.push(format!("  - Source: {}", direction.gap_source.label()));
                sections.push(block.join("\n"));
            }
        }

        // References
        sections.push("## References".into());
        let mut references = Vec::new();
        for (index, paper) in papers.iter().enumerate() {
            references.push(format!("{}. {}", index + 1, reference_entry(paper)));
        }
        sections.push(references.join("\n"));

        sections.join("\n\n")
    }

    async fn synthesize_theme(
        &self,
        theme_name: &str,
        claims: &[&Claim],
        span_map: &HashMap<&str, &EvidenceSpan>,
        paper_map: &HashMap<String, &Paper>,
    ) -> String {
        let claims_json = serde_json::to_string(
            &claims
                .iter()
                .map(|claim| {
                    let cited: Vec<String> = claim
                        .evidence_span_ids
                        .iter()
                        .filter_map(|id| span_map.get(id.as_str()))
                        .filter_map(|span| paper_map.get(&span.paper_id))
                        .map(|paper| truncate(&paper.title, 50))
                        .collect();
                    json!({
                        "text": claim.claim_text,
                        "papers": cited,
                        "uncertain": claim.uncertainty_flag,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        let mut cited_papers: Vec<serde_json::Value> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for claim in claims {
            for span_id in &claim.evidence_span_ids {
                let Some(span) = span_map.get(span_id.as_str()) else {
                    continue;
                };
                if !seen.insert(span.paper_id.clone()) {
                    continue;
                }
                if let Some(paper) = paper_map.get(&span.paper_id) {
                    let author = paper.first_author().unwrap_or("Unknown");
                    let year = paper
                        .year()
                        .map(|y| y.to_string())
                        .unwrap_or_else(|| "n.d.".into());
                    cited_papers.push(json!({
                        "id": span.paper_id,
                        "short_ref": format!("{author} ({year})"),
                        "title": truncate(&paper.title, 60),
                    }));
                }
            }
        }

        let prompt = prompts::theme_synthesis_prompt(
            theme_name,
            &claims_json,
            &serde_json::to_string(&cited_papers).unwrap_or_default(),
        );

        match self.llm.generate(GenerateRequest::new(prompt)).await {
            Ok(synthesis) => synthesis.trim().to_string(),
            Err(error) => {
                warn!(theme = theme_name, %error, "theme synthesis failed, listing claims");
                claims
                    .iter()
                    .map(|claim| format!("- {}", claim.claim_text))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

fn key_evidence_block(
    claims: &[&Claim],
    span_map: &HashMap<&str, &EvidenceSpan>,
    paper_map: &HashMap<String, &Paper>,
) -> String {
    let mut ranked: Vec<&&Claim> = claims.iter().collect();
    ranked.sort_by(|a, b| {
        b.salience_score
            .partial_cmp(&a.salience_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut lines = vec!["**Key evidence:**".to_string()];
    for claim in ranked.iter().take(5) {
        let uncertainty = if claim.uncertainty_flag {
            " [uncertain]"
        } else {
            ""
        };
        lines.push(format!("- {}{uncertainty}", claim.claim_text));
        for span_id in claim.evidence_span_ids.iter().take(2) {
            if let Some(span) = span_map.get(span_id.as_str()) {
                let reference = paper_map
                    .get(&span.paper_id)
                    .map(|paper| truncate(&paper.title, 60))
                    .unwrap_or_else(|| span.paper_id.clone());
                lines.push(format!(
                    "  - *\"{}...\"* — [{reference}]",
                    truncate(&span.snippet, 150)
                ));
            }
        }
    }
    lines.join("\n")
}

fn render_comparative_table(taxonomy: &TaxonomyMatrix) -> String {
    if taxonomy.datasets.is_empty() || taxonomy.metrics.is_empty() {
        return "*No comparative data available.*".into();
    }

    let datasets: Vec<&String> = taxonomy.datasets.iter().take(8).collect();
    let metrics: Vec<&String> = taxonomy.metrics.iter().take(5).collect();

    let mut lines = Vec::new();
    lines.push(format!(
        "| Dataset | {} |",
        metrics
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    ));
    lines.push(format!("|{}", "---|".repeat(metrics.len() + 1)));

    for dataset in datasets {
        let mut row = format!("| {dataset} |");
        for metric in &metrics {
            // Papers covering this cell across all themes.
            let count: usize = taxonomy
                .themes
                .iter()
                .map(|theme| {
                    taxonomy
                        .cells
                        .get(&TaxonomyMatrix::cell_key(theme, dataset, metric))
                        .map_or(0, Vec::len)
                })
                .sum();
            if count == 0 {
                row.push_str(" - |");
            } else {
                row.push_str(&format!(" {count} |"));
            }
        }
        lines.push(row);
    }

    lines.join("\n")
}

/// One numbered reference: `authors (year). *title*. [url](url)`.
fn reference_entry(paper: &Paper) -> String {
    let mut authors = paper
        .authors
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if authors.is_empty() {
        authors = "Unknown".into();
    } else if paper.authors.len() > 3 {
        authors.push_str(" et al.");
    }
    let year = paper
        .year()
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".into());
    let url = paper
        .url
        .clone()
        .or_else(|| paper.pdf_url.clone())
        .unwrap_or_default();
    format!("{authors} ({year}). *{}*. [{url}]({url})", paper.title)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct ScriptedLlm;

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            Ok("Synthesized prose about the theme.".into())
        }
    }

    fn fixture() -> (Vec<Paper>, Vec<EvidenceSpan>, Vec<Cluster>, Vec<Claim>) {
        let mut paper = Paper::new("Linear Attention Transformers");
        paper.arxiv_id = Some("2301.00001".into());
        paper.authors = vec!["Alice".into(), "Bob".into()];
        paper.url = Some("https://arxiv.org/abs/2301.00001".into());
        paper.published = Some(chrono::Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());

        let span = EvidenceSpan::new(
            "2301.00001",
            EvidenceField::Limitation,
            "only evaluated on short sequences",
            0.7,
        );
        let cluster = Cluster {
            id: "plan:0".into(),
            name: "Efficient Attention".into(),
            description: "speeding up transformers".into(),
            paper_ids: vec!["2301.00001".into()],
            plan_id: "plan".into(),
        };
        let claim = Claim {
            claim_id: "c1".into(),
            claim_text: "Linear attention matches softmax quality.".into(),
            evidence_span_ids: vec![span.span_id.clone()],
            theme_id: "plan:0".into(),
            salience_score: 0.9,
            uncertainty_flag: false,
        };
        (vec![paper], vec![span], vec![cluster], vec![claim])
    }

    #[tokio::test]
    async fn report_has_fixed_outline_and_references() {
        let (papers, spans, clusters, claims) = fixture();
        let llm = ScriptedLlm;
        let writer = GroundedWriter::new(&llm);
        let taxonomy = TaxonomyMatrix::default();

        let report = writer
            .generate_report("linear attention", &claims, &clusters, &spans, &papers, &taxonomy, &[], "")
            .await;

        assert!(report.starts_with("# Research Report: linear attention"));
        assert!(report.contains("## 1. Scope & Search Strategy"));
        assert!(report.contains("## 2. Theme Map"));
        assert!(report.contains("## 3. Thematic Synthesis"));
        assert!(report.contains("### Efficient Attention"));
        assert!(report.contains("Synthesized prose"));
        // No taxonomy cells: limitations take section 4.
        assert!(report.contains("## 4. Limitations"));
        assert!(report.contains("only evaluated on short sequences"));
        assert!(report.contains("## 5. Future Research Directions"));
        assert!(report.contains("## References"));
        assert!(report.contains(
            "1. Alice, Bob (2023). *Linear Attention Transformers*. \
             [https://arxiv.org/abs/2301.00001](https://arxiv.org/abs/2301.00001)"
        ));
    }

    #[test]
    fn comparative_table_counts_cells() {
        let mut taxonomy = TaxonomyMatrix {
            themes: vec!["A".into()],
            datasets: vec!["ImageNet".into()],
            metrics: vec!["accuracy".into()],
            method_families: vec![],
            cells: HashMap::new(),
        };
        taxonomy.cells.insert(
            TaxonomyMatrix::cell_key("A", "ImageNet", "accuracy"),
            vec!["p1".into(), "p2".into()],
        );
        let table = render_comparative_table(&taxonomy);
        assert!(table.contains("| ImageNet | 2 |"));
    }

    #[test]
    fn reference_entry_formats_et_al() {
        let mut paper = Paper::new("Big Paper");
        paper.authors = vec!["A".into(), "B".into(), "C".into(), "D".into()];
        let entry = reference_entry(&paper);
        assert!(entry.starts_with("A, B, C et al. (n.d.). *Big Paper*."));
    }
}
