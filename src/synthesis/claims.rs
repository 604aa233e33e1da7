//! Claim generation: atomic, citable statements per theme.
//!
//! Claims citing span ids that do not resolve are dropped; a claim survives
//! only with at least one valid span behind it. Themes generate
//! concurrently, at most three in flight.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{Claim, Cluster, EvidenceSpan, StudyCard};
use crate::llm::{extract_json_array, GenerateRequest, LlmClient};
use crate::prompts;

const MAX_IN_FLIGHT: usize = 3;

pub struct ClaimGenerator<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> ClaimGenerator<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        ClaimGenerator { llm }
    }

    pub async fn generate_claims(
        &self,
        study_cards: &[StudyCard],
        evidence_spans: &[EvidenceSpan],
        clusters: &[Cluster],
    ) -> Vec<Claim> {
        let card_by_paper: HashMap<&str, &StudyCard> = study_cards
            .iter()
            .map(|card| (card.paper_id.as_str(), card))
            .collect();
        let span_by_id: HashMap<&str, &EvidenceSpan> = evidence_spans
            .iter()
            .map(|span| (span.span_id.as_str(), span))
            .collect();

        let theme_inputs: Vec<(&Cluster, Vec<&StudyCard>, Vec<&EvidenceSpan>)> = clusters
            .iter()
            .filter_map(|cluster| {
                let cards: Vec<&StudyCard> = cluster
                    .paper_ids
                    .iter()
                    .filter_map(|paper_id| card_by_paper.get(paper_id.as_str()).copied())
                    .collect();
                if cards.is_empty() {
                    return None;
                }
                let mut span_ids: HashSet<&str> = HashSet::new();
                for card in &cards {
                    span_ids.extend(card.evidence_span_ids.iter().map(String::as_str));
                }
                let spans: Vec<&EvidenceSpan> = span_ids
                    .iter()
                    .filter_map(|id| span_by_id.get(id).copied())
                    .collect();
                Some((cluster, cards, spans))
            })
            .collect();

        let per_theme: Vec<Vec<Claim>> = stream::iter(theme_inputs)
            .map(|(cluster, cards, spans)| async move {
                self.generate_theme_claims(cluster, &cards, &spans).await
            })
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let all_claims: Vec<Claim> = per_theme.into_iter().flatten().collect();
        info!(claims = all_claims.len(), themes = clusters.len(), "claim generation complete");
        all_claims
    }

    async fn generate_theme_claims(
        &self,
        cluster: &Cluster,
        cards: &[&StudyCard],
        spans: &[&EvidenceSpan],
    ) -> Vec<Claim> {
        let cards_json = serde_json::to_string(
            &cards
                .iter()
                .map(|card| {
                    json!({
                        "paper_id": card.paper_id,
                        "problem": card.problem,
                        "method": card.method,
                        "datasets": card.datasets,
                        "results": card.results,
                        "limitations": card.limitations,
                        "evidence_span_ids": card.evidence_span_ids,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        let spans_json = serde_json::to_string(
            &spans
                .iter()
                .map(|span| {
                    json!({
                        "span_id": span.span_id,
                        "paper_id": span.paper_id,
                        "field": span.field.as_str(),
                        "snippet": span.snippet.chars().take(200).collect::<String>(),
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        let prompt = prompts::claim_generation_prompt(&cluster.name, &cards_json, &spans_json);
        let response = match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => response,
            Err(error) => {
                warn!(theme = %cluster.name, %error, "claim generation failed");
                return Vec::new();
            }
        };

        let valid_span_ids: HashSet<&str> = spans.iter().map(|span| span.span_id.as_str()).collect();
        let mut claims = Vec::new();
        for item in extract_json_array(&response) {
            let Some(object) = item.as_object() else {
                continue;
            };
            let Some(claim_text) = object
                .get("claim_text")
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
            else {
                continue;
            };

            let cited: Vec<String> = object
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

            if cited.is_empty() {
                warn!(claim = %claim_text.chars().take(80).collect::<String>(), "claim has no valid evidence spans, skipping");
                continue;
            }

            claims.push(Claim {
                claim_id: Uuid::new_v4().to_string(),
                claim_text: claim_text.to_string(),
                evidence_span_ids: cited,
                theme_id: cluster.id.clone(),
                salience_score: object
                    .get("salience_score")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
                uncertainty_flag: object
                    .get("uncertainty_flag")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }

        info!(theme = %cluster.name, claims = claims.len(), "theme claims generated");
        claims
    }
}
