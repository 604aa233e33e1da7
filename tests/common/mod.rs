//! Shared fixtures for integration tests: a marker-dispatching LLM stand-in
//! and a scripted tool registry.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use surveyor::llm::{GenerateRequest, LlmClient, LlmError};
use surveyor::tools::{ToolDefinition, ToolFuture, ToolRegistry};

/// LLM stand-in that answers each prompt family with a canned, deterministic
/// response. Intent prompts return an error so the classifier exercises its
/// keyword fallback.
pub struct StubLlm;

#[async_trait]
impl LlmClient for StubLlm {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let prompt = &request.prompt;

        if prompt.contains("Reply with just the intent word") {
            // Behave like a competent classifier for the messages the tests
            // send; anything else falls back to keyword matching.
            let message = extract_quoted_message(prompt).unwrap_or_default();
            let lower = message.to_lowercase();
            if lower == "ok" || lower == "yes" {
                return Ok("confirm".into());
            }
            if lower.starts_with("add ") || lower.starts_with("remove ") {
                return Ok("edit".into());
            }
            if lower.contains("nghiên cứu") || lower.contains("research") || lower.contains("paper")
            {
                return Ok("new_topic".into());
            }
            return Err(LlmError::Api("intent handled by keywords".into()));
        }

        if prompt.contains("UNDERSTANDING:") {
            return Ok("UNDERSTANDING: Bạn muốn tìm các nghiên cứu gần đây về vision transformers\n\
                       SUBQUERIES: none\n\
                       QUESTIONS: Bạn quan tâm đến ứng dụng cụ thể nào không? | Bạn muốn so sánh với CNN không?"
                .into());
        }

        if prompt.contains("research planning assistant") {
            return Ok(json!({
                "topic": "vision transformers",
                "summary": "Search and synthesize recent work.",
                "steps": [
                    {
                        "id": 1,
                        "action": "research",
                        "title": "Initial Search",
                        "description": "Collect candidate papers",
                        "queries": ["vision transformers"],
                        "tool": "search",
                        "tool_args": {"query": "vision transformers", "max_results": 20}
                    },
                    {
                        "id": 2,
                        "action": "synthesize",
                        "title": "Write Report",
                        "description": "Synthesize findings",
                        "queries": []
                    }
                ]
            })
            .to_string());
        }

        if prompt.contains("Analyze the relevance of these papers") {
            return Ok(json!([
                {"paper_index": 0, "score": 8.5, "reasoning": "core"},
                {"paper_index": 1, "score": 6.0, "reasoning": "related"}
            ])
            .to_string());
        }

        if prompt.contains("You are screening papers") {
            // Every paper the batch shows gets screened in as core.
            let count = prompt.matches("paper_id:").count();
            let records: Vec<Value> = (0..count)
                .map(|index| {
                    json!({
                        "paper_index": index,
                        "tier": "core",
                        "reason_code": "on_topic",
                        "rationale_short": "central to the topic",
                        "scored_relevance": 9.0
                    })
                })
                .collect();
            return Ok(Value::Array(records).to_string());
        }

        if prompt.contains("Extract a structured study card") {
            return Ok(json!({
                "problem": {"text": "quadratic attention cost", "snippet": "attention scales quadratically", "confidence": 0.9},
                "method": {"text": "linear approximation", "snippet": "we approximate attention linearly", "confidence": 0.8},
                "datasets": [{"name": "ImageNet", "snippet": "evaluated on ImageNet", "confidence": 0.8}],
                "metrics": [{"name": "top-1 accuracy", "snippet": "top-1 accuracy of 80%", "confidence": 0.8}],
                "results": [{"text": "matches baseline", "snippet": "matches the softmax baseline", "confidence": 0.7}],
                "limitations": [{"text": "short contexts only", "snippet": "untested on long contexts", "confidence": 0.6}]
            })
            .to_string());
        }

        if prompt.contains("Group the following research papers") {
            return Ok(json!({"name": "Efficient Transformers", "description": "attention cost reduction"}).to_string());
        }

        if prompt.contains("atomic, citable claims") {
            // Cite the first span id the prompt shows us.
            let span_id = extract_first_span_id(prompt).unwrap_or_default();
            return Ok(json!([
                {
                    "claim_text": "Linear approximations match softmax attention on ImageNet.",
                    "evidence_span_ids": [span_id],
                    "salience_score": 0.9,
                    "uncertainty_flag": false
                }
            ])
            .to_string());
        }

        if prompt.contains("Does the evidence semantically support the claim?") {
            return Ok(json!({"supported": true}).to_string());
        }

        if prompt.contains("identifying research gaps") {
            return Ok(json!([
                {
                    "direction_type": "next_experiment",
                    "title": "Long-context evaluation",
                    "description": "Evaluate linear attention beyond short contexts.",
                    "evidence_span_ids": [],
                    "gap_source": "limitation_cluster"
                }
            ])
            .to_string());
        }

        if prompt.contains("Write a coherent synthesis paragraph") {
            return Ok("Linear attention methods match softmax quality at lower cost.".into());
        }

        if prompt.contains("academic search query optimizer") {
            return Ok(json!(["efficient attention survey"]).to_string());
        }

        if prompt.contains("chatting casually") {
            return Ok("Hello! What topic should we research?".into());
        }

        Ok(String::new())
    }
}

fn extract_quoted_message(prompt: &str) -> Option<String> {
    let start = prompt.find("Message: \"")? + "Message: \"".len();
    let rest = &prompt[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn extract_first_span_id(prompt: &str) -> Option<String> {
    let start = prompt.find("\"span_id\":\"")? + "\"span_id\":\"".len();
    let rest = &prompt[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Registry whose `search` tool returns a fixed corpus.
pub fn scripted_registry(papers: Vec<Value>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(ToolDefinition::new(
        "search",
        "scripted search over a fixed corpus",
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}, "max_results": {"type": "integer"}},
            "required": ["query"],
        }),
        &["search", "ingestion"],
        Arc::new(move |_args| -> ToolFuture {
            let papers = papers.clone();
            Box::pin(async move { Ok(Value::Array(papers)) })
        }),
    ));
    registry.register(ToolDefinition::new(
        "collect_urls",
        "scripted collector",
        json!({
            "type": "object",
            "properties": {"urls": {"type": "array", "items": {"type": "string"}}},
            "required": ["urls"],
        }),
        &["collect", "ingestion"],
        Arc::new(|_args| -> ToolFuture { Box::pin(async { Ok(Value::Array(Vec::new())) }) }),
    ));
    Arc::new(registry)
}

/// A small fixed corpus in the tool-boundary record shape.
pub fn sample_corpus(n: usize) -> Vec<Value> {
    (0..n)
        .map(|index| {
            json!({
                "title": format!("Efficient Attention Variant {index}"),
                "abstract": "attention scales quadratically; we approximate attention linearly.",
                "authors": [format!("Author {index}")],
                "arxiv_id": format!("2301.{:05}", index + 1),
                "url": format!("https://arxiv.org/abs/2301.{:05}", index + 1),
                "source_type": "arxiv_api",
            })
        })
        .collect()
}
