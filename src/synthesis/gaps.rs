//! Gap mining: future research directions grounded in limitation spans,
//! contradictory results, and taxonomy holes.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::analysis::TaxonomyBuilder;
use crate::core::{
    DirectionType, EvidenceField, EvidenceSpan, FutureDirection, GapSource, StudyCard,
    TaxonomyMatrix,
};
use crate::llm::{extract_json_array, GenerateRequest, LlmClient};
use crate::prompts;

/// One limitation statement with the span that grounds it.
#[derive(Debug, Clone)]
struct LimitationEntry {
    paper_id: String,
    text: String,
    span_id: Option<String>,
}

pub struct GapMiner<'a> {
    llm: &'a dyn LlmClient,
    taxonomy_builder: TaxonomyBuilder,
}

impl<'a> GapMiner<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        GapMiner {
            llm,
            taxonomy_builder: TaxonomyBuilder::new(),
        }
    }

    pub async fn mine_gaps(
        &self,
        study_cards: &[StudyCard],
        evidence_spans: &[EvidenceSpan],
        taxonomy: &TaxonomyMatrix,
        topic: &str,
    ) -> Vec<FutureDirection> {
        let limitations = aggregate_limitations(study_cards, evidence_spans);
        let contradictions = find_contradictions(study_cards);
        let holes = self.taxonomy_builder.find_taxonomy_holes(taxonomy);

        let directions = self
            .generate_directions(topic, &limitations, &contradictions, &holes, taxonomy)
            .await;
        info!(directions = directions.len(), "gap mining complete");
        directions
    }

    async fn generate_directions(
        &self,
        topic: &str,
        limitations: &[LimitationEntry],
        contradictions: &[Value],
        holes: &[String],
        taxonomy: &TaxonomyMatrix,
    ) -> Vec<FutureDirection> {
        let limitations_json = serde_json::to_string(
            &limitations
                .iter()
                .filter(|entry| entry.span_id.is_some())
                .map(|entry| {
                    json!({
                        "text": entry.text,
                        "span_id": entry.span_id,
                        "paper_id": entry.paper_id,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        let contradictions_str = if contradictions.is_empty() {
            "None found".to_string()
        } else {
            serde_json::to_string(contradictions).unwrap_or_default()
        };
        let holes_str = if holes.is_empty() {
            "None found".to_string()
        } else {
            holes
                .iter()
                .take(20)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        let prompt = prompts::gap_mining_prompt(
            topic,
            &limitations_json,
            &taxonomy.themes.join(", "),
            &taxonomy.datasets.iter().take(15).cloned().collect::<Vec<_>>().join(", "),
            &taxonomy.metrics.iter().take(15).cloned().collect::<Vec<_>>().join(", "),
            &taxonomy
                .method_families
                .iter()
                .take(15)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            &holes_str,
            &contradictions_str,
        );

        let response = match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "gap mining failed");
                return Vec::new();
            }
        };

        let valid_span_ids: HashSet<&str> = limitations
            .iter()
            .filter_map(|entry| entry.span_id.as_deref())
            .collect();

        extract_json_array(&response)
            .iter()
            .filter_map(|item| {
                let object = item.as_object()?;
                let title = object.get("title").and_then(Value::as_str)?.to_string();
                // Only limitation spans the miner was shown may be cited.
                let evidence_span_ids: Vec<String> = object
                    .get("evidence_span_ids")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .filter(|id| valid_span_ids.contains(id))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                Some(FutureDirection {
                    direction_type: match object.get("direction_type").and_then(Value::as_str) {
                        Some("open_problem") => DirectionType::OpenProblem,
                        Some("next_experiment") => DirectionType::NextExperiment,
                        _ => DirectionType::ResearchOpportunity,
                    },
                    title,
                    description: object
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    evidence_span_ids,
                    gap_source: match object.get("gap_source").and_then(Value::as_str) {
                        Some("contradictory_results") => GapSource::ContradictoryResults,
                        Some("taxonomy_hole") => GapSource::TaxonomyHole,
                        _ => GapSource::LimitationCluster,
                    },
                })
            })
            .collect()
    }
}

fn aggregate_limitations(
    study_cards: &[StudyCard],
    evidence_spans: &[EvidenceSpan],
) -> Vec<LimitationEntry> {
    let span_by_id: HashMap<&str, &EvidenceSpan> = evidence_spans
        .iter()
        .map(|span| (span.span_id.as_str(), span))
        .collect();

    let mut entries = Vec::new();
    for card in study_cards {
        let limitation_spans: Vec<&EvidenceSpan> = card
            .evidence_span_ids
            .iter()
            .filter_map(|id| span_by_id.get(id.as_str()).copied())
            .filter(|span| span.field == EvidenceField::Limitation)
            .collect();

        for (index, text) in card.limitations.iter().enumerate() {
            entries.push(LimitationEntry {
                paper_id: card.paper_id.clone(),
                text: text.clone(),
                span_id: limitation_spans
                    .get(index)
                    .map(|span| span.span_id.clone()),
            });
        }
    }
    entries
}

/// Papers reporting on the same (dataset, metric) pair are candidate
/// contradictions for the model to inspect.
fn find_contradictions(study_cards: &[StudyCard]) -> Vec<Value> {
    let mut groups: HashMap<(String, String), Vec<&StudyCard>> = HashMap::new();
    for card in study_cards {
        for dataset in &card.datasets {
            for metric in &card.metrics {
                groups
                    .entry((dataset.clone(), metric.clone()))
                    .or_default()
                    .push(card);
            }
        }
    }

    let mut contradictions: Vec<Value> = groups
        .into_iter()
        .filter(|(_, cards)| cards.len() >= 2)
        .map(|((dataset, metric), cards)| {
            json!({
                "dataset": dataset,
                "metric": metric,
                "paper_count": cards.len(),
            })
        })
        .collect();
    contradictions.sort_by_key(|value| value["dataset"].as_str().unwrap_or_default().to_string());
    contradictions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn fixture() -> (Vec<StudyCard>, Vec<EvidenceSpan>) {
        let span = EvidenceSpan::new("p1", EvidenceField::Limitation, "limited to English", 0.7);
        let card = StudyCard {
            paper_id: "p1".into(),
            datasets: vec!["GLUE".into()],
            metrics: vec!["accuracy".into()],
            limitations: vec!["English only".into()],
            evidence_span_ids: vec![span.span_id.clone()],
            ..Default::default()
        };
        let card2 = StudyCard {
            paper_id: "p2".into(),
            datasets: vec!["GLUE".into()],
            metrics: vec!["accuracy".into()],
            ..Default::default()
        };
        (vec![card, card2], vec![span])
    }

    #[test]
    fn contradictions_require_two_papers_on_same_cell() {
        let (cards, _) = fixture();
        let contradictions = find_contradictions(&cards);
        assert_eq!(contradictions.len(), 1);
        assert_eq!(contradictions[0]["dataset"], "GLUE");
        assert_eq!(contradictions[0]["paper_count"], 2);
    }

    #[test]
    fn limitations_pair_with_their_spans() {
        let (cards, spans) = fixture();
        let entries = aggregate_limitations(&cards, &spans);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].span_id.as_deref(), Some(spans[0].span_id.as_str()));
    }

    #[tokio::test]
    async fn directions_validate_span_ids() {
        let (cards, spans) = fixture();
        let valid_id = spans[0].span_id.clone();
        let llm = ScriptedLlm(format!(
            r#"[{{
                "direction_type": "open_problem",
                "title": "Multilingual evaluation",
                "description": "Extend beyond English.",
                "evidence_span_ids": ["{valid_id}", "p9#feedface"],
                "gap_source": "limitation_cluster"
            }}]"#
        ));
        let miner = GapMiner::new(&llm);
        let taxonomy = TaxonomyBuilder::new().build(&cards, &[]);
        let directions = miner.mine_gaps(&cards, &spans, &taxonomy, "topic").await;

        assert_eq!(directions.len(), 1);
        assert_eq!(directions[0].direction_type, DirectionType::OpenProblem);
        assert_eq!(directions[0].evidence_span_ids, vec![valid_id]);
        assert_eq!(directions[0].gap_source, GapSource::LimitationCluster);
    }
}
