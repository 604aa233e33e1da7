//! Schema-driven extraction of study cards and evidence spans.
//!
//! For each paper, the model returns per-field snippets which become
//! [`EvidenceSpan`]s with deterministic ids. A card field is populated only
//! when at least one span backs it. When full text is available, snippets
//! that do not occur verbatim in the text are dropped, and surviving spans
//! get locators resolved against the page map.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{info, warn};

use super::pdf::PdfLoader;
use crate::core::{EvidenceField, EvidenceSpan, Paper, PaperStatus, StudyCard};
use crate::llm::{extract_json_value, GenerateRequest, LlmClient};
use crate::prompts;

/// Concurrent extractions in flight.
const MAX_IN_FLIGHT: usize = 3;
/// Character budget of paper content per extraction call.
const CONTENT_LIMIT: usize = 8000;

pub struct EvidenceExtractor<'a> {
    llm: &'a dyn LlmClient,
    pdf_loader: &'a PdfLoader,
}

impl<'a> EvidenceExtractor<'a> {
    pub fn new(llm: &'a dyn LlmClient, pdf_loader: &'a PdfLoader) -> Self {
        EvidenceExtractor { llm, pdf_loader }
    }

    /// Extract study cards for all papers, at most three in flight.
    pub async fn extract_batch(
        &self,
        papers: &mut [Paper],
    ) -> (Vec<StudyCard>, Vec<EvidenceSpan>) {
        let inputs: Vec<(usize, Paper)> = papers
            .iter()
            .enumerate()
            .map(|(index, paper)| (index, paper.clone()))
            .collect();

        let extracted: Vec<(usize, StudyCard, Vec<EvidenceSpan>)> = stream::iter(inputs)
            .map(|(index, paper)| async move {
                self.extract_study_card(&paper)
                    .await
                    .map(|(card, spans)| (index, card, spans))
            })
            .buffer_unordered(MAX_IN_FLIGHT)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let mut cards = Vec::new();
        let mut all_spans = Vec::new();
        for (index, card, spans) in extracted {
            papers[index].status = PaperStatus::Extracted;
            cards.push(card);
            all_spans.extend(spans);
        }

        info!(
            cards = cards.len(),
            spans = all_spans.len(),
            "evidence extraction complete"
        );
        (cards, all_spans)
    }

    /// Extract one study card. Full text when present, abstract otherwise;
    /// papers with neither are skipped.
    pub async fn extract_study_card(
        &self,
        paper: &Paper,
    ) -> Option<(StudyCard, Vec<EvidenceSpan>)> {
        let (content, used_full_text): (String, bool) = match &paper.full_text {
            Some(full_text) => (full_text.chars().take(CONTENT_LIMIT).collect(), true),
            None if !paper.abstract_text.is_empty() => (paper.abstract_text.clone(), false),
            None => {
                warn!(title = %paper.title, "no content for extraction");
                return None;
            }
        };

        let prompt = prompts::evidence_extraction_prompt(&paper.title, &content);
        let response = match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => response,
            Err(error) => {
                warn!(title = %paper.title, %error, "evidence extraction failed");
                return None;
            }
        };
        let raw = extract_json_value(&response)?;
        let raw = raw.as_object()?;

        let paper_id = paper.identity();
        let source_url = paper
            .url
            .clone()
            .or_else(|| paper.pdf_url.clone())
            .unwrap_or_default();

        let mut card = StudyCard {
            paper_id: paper_id.clone(),
            content_source: if used_full_text {
                "full_text".into()
            } else {
                "abstract".into()
            },
            ..Default::default()
        };
        let mut spans: Vec<EvidenceSpan> = Vec::new();

        let build_span = |item: &Value, field: EvidenceField| -> Option<EvidenceSpan> {
            let object = item.as_object()?;
            let snippet = object.get("snippet")?.as_str()?.trim();
            if snippet.is_empty() {
                return None;
            }
            // A span from full text must quote it verbatim.
            if used_full_text
                && !paper
                    .full_text
                    .as_deref()
                    .is_some_and(|text| text.contains(snippet))
            {
                warn!(title = %paper.title, field = field.as_str(), "snippet not verbatim, dropped");
                return None;
            }
            let confidence = object
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.7);
            let mut span = EvidenceSpan::new(paper_id.clone(), field, snippet, confidence);
            span.source_url = source_url.clone();
            if used_full_text {
                span.locator = self.pdf_loader.resolve_locator(paper, &span.snippet);
            }
            Some(span)
        };

        // Singular fields.
        if let Some(span) = raw.get("problem").and_then(|item| build_span(item, EvidenceField::Problem)) {
            card.problem = field_text(raw.get("problem"));
            card.evidence_span_ids.push(span.span_id.clone());
            spans.push(span);
        }
        if let Some(span) = raw.get("method").and_then(|item| build_span(item, EvidenceField::Method)) {
            card.method = field_text(raw.get("method"));
            card.evidence_span_ids.push(span.span_id.clone());
            spans.push(span);
        }

        // List fields: the label lands on the card only when its span
        // survived, keeping every populated field span-backed.
        let list_fields = [
            ("datasets", EvidenceField::Dataset, "name"),
            ("metrics", EvidenceField::Metric, "name"),
            ("results", EvidenceField::Result, "text"),
            ("limitations", EvidenceField::Limitation, "text"),
        ];
        for (key, field, label_key) in list_fields {
            for item in ensure_list(raw.get(key)) {
                let Some(span) = build_span(&item, field) else {
                    continue;
                };
                let label = item
                    .get(label_key)
                    .and_then(Value::as_str)
                    .unwrap_or(&span.snippet)
                    .to_string();
                match field {
                    EvidenceField::Dataset => card.datasets.push(label),
                    EvidenceField::Metric => card.metrics.push(label),
                    EvidenceField::Result => card.results.push(label),
                    EvidenceField::Limitation => card.limitations.push(label),
                    _ => {}
                }
                card.evidence_span_ids.push(span.span_id.clone());
                spans.push(span);
            }
        }

        if spans.is_empty() {
            warn!(title = %paper.title, "extraction produced no usable spans");
            return None;
        }
        Some((card, spans))
    }
}

fn field_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Object(object)) => object
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::String(text)) => Some(text.clone()),
        _ => None,
    }
}

fn ensure_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn loader() -> PdfLoader {
        PdfLoader::new(None, 8.0, Duration::from_secs(5))
    }

    const RESPONSE: &str = r#"{
        "problem": {"text": "slow attention", "snippet": "attention is quadratic", "confidence": 0.9},
        "method": {"text": "linear kernel", "snippet": "we use a kernel trick", "confidence": 0.8},
        "datasets": [{"name": "ImageNet", "snippet": "evaluated on ImageNet", "confidence": 0.8}],
        "metrics": [{"name": "top-1 accuracy", "snippet": "top-1 accuracy of 81%", "confidence": 0.8}],
        "results": [{"text": "matches softmax", "snippet": "matches softmax attention quality", "confidence": 0.7}],
        "limitations": [{"text": "long context untested", "snippet": "we did not test long contexts", "confidence": 0.6}]
    }"#;

    #[tokio::test]
    async fn card_fields_are_span_backed() {
        let llm = ScriptedLlm(RESPONSE.into());
        let pdf = loader();
        let extractor = EvidenceExtractor::new(&llm, &pdf);

        let mut paper = Paper::new("Linear Attention");
        paper.arxiv_id = Some("2301.00001".into());
        paper.abstract_text = "irrelevant".into();

        let (card, spans) = extractor.extract_study_card(&paper).await.unwrap();
        assert_eq!(card.content_source, "abstract");
        assert_eq!(card.problem.as_deref(), Some("slow attention"));
        assert_eq!(card.datasets, vec!["ImageNet"]);
        assert_eq!(card.limitations.len(), 1);
        assert_eq!(spans.len(), 6);
        assert_eq!(card.evidence_span_ids.len(), 6);
        for span in &spans {
            assert_eq!(
                span.span_id,
                EvidenceSpan::span_id_for("2301.00001", &span.snippet)
            );
            assert!(card.evidence_span_ids.contains(&span.span_id));
        }
    }

    #[tokio::test]
    async fn full_text_snippets_must_be_verbatim() {
        let llm = ScriptedLlm(RESPONSE.into());
        let pdf = loader();
        let extractor = EvidenceExtractor::new(&llm, &pdf);

        let mut paper = Paper::new("Linear Attention");
        paper.arxiv_id = Some("2301.00001".into());
        // Only two snippets occur in the full text.
        paper.full_text =
            Some("Background. attention is quadratic in length. we use a kernel trick here.".into());
        paper.page_map = vec![crate::core::PageInfo {
            page: 1,
            section: None,
            char_start: 0,
            char_end: 80,
        }];

        let (card, spans) = extractor.extract_study_card(&paper).await.unwrap();
        assert_eq!(spans.len(), 2);
        assert!(card.datasets.is_empty());
        assert!(card.problem.is_some());
        // Locators resolve inside the known text.
        for span in &spans {
            let start = span.locator.char_start.unwrap();
            assert!(start < paper.full_text.as_ref().unwrap().len());
            assert_eq!(span.locator.page, Some(1));
        }
    }

    #[tokio::test]
    async fn paper_without_content_is_skipped() {
        let llm = ScriptedLlm(RESPONSE.into());
        let pdf = loader();
        let extractor = EvidenceExtractor::new(&llm, &pdf);
        let paper = Paper::new("Empty");
        assert!(extractor.extract_study_card(&paper).await.is_none());
    }
}
