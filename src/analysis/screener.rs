//! Title/abstract screening with include/exclude tiers and reason codes.
//!
//! Papers are screened in batches of 15 with a single LLM call per batch.
//! Papers the model does not answer for default to background/include, and a
//! wholly failed batch falls back to including everything as background so
//! the pipeline keeps moving.

use serde_json::Value;
use tracing::{error, info};

use crate::core::{Paper, PaperStatus, ScreeningRecord, ScreeningTier};
use crate::llm::{extract_json_array, GenerateRequest, LlmClient};
use crate::prompts;

pub struct Screener<'a> {
    llm: &'a dyn LlmClient,
    batch_size: usize,
}

impl<'a> Screener<'a> {
    pub fn new(llm: &'a dyn LlmClient, batch_size: usize) -> Self {
        Screener { llm, batch_size }
    }

    /// Screen every paper; included papers transition to `screened` and pick
    /// up their scored relevance. Returns (included_count, records).
    pub async fn screen_papers(
        &self,
        papers: &mut [Paper],
        topic: &str,
    ) -> (usize, Vec<ScreeningRecord>) {
        info!(count = papers.len(), topic, "screening papers");

        let mut all_records: Vec<ScreeningRecord> = Vec::new();
        // Batches run one at a time: screening is LLM-call-serial per plan.
        let mut start = 0;
        while start < papers.len() {
            let end = (start + self.batch_size).min(papers.len());
            let records = self.screen_batch(&papers[start..end], topic).await;
            all_records.extend(records);
            info!(from = start + 1, to = end, "screened batch");
            start = end;
        }

        let mut included = 0;
        for paper in papers.iter_mut() {
            let identity = paper.identity();
            let Some(record) = all_records.iter().find(|r| r.paper_id == identity) else {
                continue;
            };
            if record.include {
                paper.status = PaperStatus::Screened;
                if record.scored_relevance.is_some() {
                    paper.relevance_score = record.scored_relevance;
                }
                included += 1;
            }
        }

        info!(
            included,
            excluded = papers.len() - included,
            "screening complete"
        );
        (included, all_records)
    }

    async fn screen_batch(&self, papers: &[Paper], topic: &str) -> Vec<ScreeningRecord> {
        let papers_list = papers
            .iter()
            .enumerate()
            .map(|(index, paper)| {
                let abstract_text = if paper.abstract_text.is_empty() {
                    "No abstract".to_string()
                } else {
                    paper.abstract_text.chars().take(600).collect::<String>()
                };
                format!(
                    "Paper {index} (paper_id: {}):\nTitle: {}\nAbstract: {}",
                    paper.identity(),
                    paper.title,
                    abstract_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::screening_batch_prompt(topic, &papers_list);
        let response = match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => response,
            Err(err) => {
                error!(%err, "batch screening failed");
                return error_fallback_records(papers, &err.to_string());
            }
        };

        let results = extract_json_array(&response);
        if results.is_empty() && crate::llm::extract_json_value(&response).is_none() {
            // Unparseable output: conservative include for the whole batch.
            return error_fallback_records(papers, "unparseable screening response");
        }
        let mut records = Vec::new();
        let mut screened_indices = Vec::new();

        for result in &results {
            let Some(object) = result.as_object() else {
                continue;
            };
            let index = object
                .get("paper_index")
                .and_then(Value::as_u64)
                .map(|i| i as usize);
            let Some(index) = index.filter(|i| *i < papers.len()) else {
                continue;
            };
            screened_indices.push(index);
            let paper = &papers[index];

            let tier = match object.get("tier").and_then(Value::as_str) {
                Some("core") => ScreeningTier::Core,
                Some("background") => ScreeningTier::Background,
                Some("exclude") => ScreeningTier::Exclude,
                // Tolerate an include boolean instead of a tier.
                _ => {
                    if object.get("include").and_then(Value::as_bool).unwrap_or(false) {
                        ScreeningTier::Core
                    } else {
                        ScreeningTier::Exclude
                    }
                }
            };

            let mut record = ScreeningRecord::new(paper.identity(), tier);
            record.reason_code = object
                .get("reason_code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            record.rationale_short = object
                .get("rationale_short")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect();
            record.scored_relevance = Some(safe_score(object.get("scored_relevance")));
            records.push(record);
        }

        // Unanswered papers come along as background.
        for (index, paper) in papers.iter().enumerate() {
            if !screened_indices.contains(&index) {
                let mut record = ScreeningRecord::new(paper.identity(), ScreeningTier::Background);
                record.reason_code = "unscreened".into();
                record.rationale_short =
                    "Not evaluated in batch, included as background by default".into();
                record.scored_relevance = Some(5.0);
                records.push(record);
            }
        }

        records
    }
}

fn error_fallback_records(papers: &[Paper], error: &str) -> Vec<ScreeningRecord> {
    papers
        .iter()
        .map(|paper| {
            let mut record = ScreeningRecord::new(paper.identity(), ScreeningTier::Background);
            record.reason_code = "error_fallback".into();
            let brief: String = error.chars().take(100).collect();
            record.rationale_short = format!("Screening failed: {brief}");
            record.scored_relevance = Some(5.0);
            record
        })
        .collect()
}

fn safe_score(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(5.0)
}
