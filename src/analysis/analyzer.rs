//! Relevance analysis for quick runs.
//!
//! Scores papers 0-10 against the topic in batches of 10, abstract-only.
//! Unlike screening this assigns `relevance_score` without producing
//! screening records; quick runs stop after this phase.

use serde_json::Value;
use tracing::{error, info};

use crate::core::{Paper, PaperStatus};
use crate::llm::{extract_json_array, GenerateRequest, LlmClient};
use crate::prompts;

const BATCH_SIZE: usize = 10;
pub const RELEVANCE_THRESHOLD: f64 = 7.0;

pub struct Analyzer<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> Analyzer<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Analyzer { llm }
    }

    /// Score all papers in place. Returns the count meeting the relevance
    /// threshold.
    pub async fn score_papers(&self, papers: &mut [Paper], topic: &str) -> usize {
        info!(count = papers.len(), topic, "scoring relevance");

        let mut start = 0;
        while start < papers.len() {
            let end = (start + BATCH_SIZE).min(papers.len());
            self.score_batch(&mut papers[start..end], topic).await;
            start = end;
        }

        let relevant = papers
            .iter()
            .filter(|paper| {
                paper
                    .relevance_score
                    .is_some_and(|score| score >= RELEVANCE_THRESHOLD)
            })
            .count();
        info!(relevant, total = papers.len(), "relevance scoring complete");
        relevant
    }

    async fn score_batch(&self, papers: &mut [Paper], topic: &str) {
        let papers_text = papers
            .iter()
            .enumerate()
            .map(|(index, paper)| {
                let abstract_text: String = paper.abstract_text.chars().take(500).collect();
                format!(
                    "Paper {index}:\nTitle: {}\nAbstract: {}",
                    paper.title,
                    if abstract_text.is_empty() {
                        "No abstract".to_string()
                    } else {
                        abstract_text
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::relevance_batch_prompt(topic, &papers_text);
        let results = match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => extract_json_array(&response),
            Err(err) => {
                error!(%err, "batch analysis failed, assigning neutral scores");
                Vec::new()
            }
        };

        let mut scored = vec![false; papers.len()];
        for result in results {
            let Some(object) = result.as_object() else {
                continue;
            };
            let Some(index) = object
                .get("paper_index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .filter(|i| *i < papers.len())
            else {
                continue;
            };
            let score = object
                .get("score")
                .and_then(Value::as_f64)
                .unwrap_or(5.0)
                .clamp(0.0, 10.0);
            papers[index].relevance_score = Some(score);
            papers[index].status = PaperStatus::Scored;
            scored[index] = true;
        }

        // Neutral score for anything the model skipped.
        for (index, was_scored) in scored.iter().enumerate() {
            if !was_scored {
                papers[index].relevance_score = Some(5.0);
                papers[index].status = PaperStatus::Scored;
            }
        }
    }
}
