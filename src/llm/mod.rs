//! LLM adapter boundary.
//!
//! Callers depend on the [`LlmClient`] trait only; the shipped implementation
//! talks to the Gemini REST API. Responses requested with `json_mode` come
//! back as JSON documents; without it, [`extract_json_value`] tolerates JSON
//! embedded in prose.

mod error;
mod gemini;

pub use error::LlmError;
pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde_json::Value;

/// A single generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub json_mode: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        GenerateRequest {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        GenerateRequest {
            prompt: prompt.into(),
            json_mode: true,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;
}

/// Extract a JSON value from an LLM response that may wrap it in prose or
/// a fenced code block. Tries a direct parse first, then the first `[`..`]`
/// span, then the first `{`..`}` span.
pub fn extract_json_value(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(stripped) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str(stripped) {
            return Some(value);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(span) = bracket_span(trimmed, open, close) {
            if let Ok(value) = serde_json::from_str(span) {
                return Some(value);
            }
        }
    }
    None
}

/// Extract a JSON array, unwrapping common `{"results": [...]}` envelopes
/// the model sometimes produces despite instructions.
pub fn extract_json_array(response: &str) -> Vec<Value> {
    match extract_json_value(response) {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => {
            for key in ["results", "papers", "claims", "directions", "screenings", "data"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.clone();
                }
            }
            // Any array-valued field as a last resort.
            for value in map.values() {
                if let Value::Array(items) = value {
                    return items.clone();
                }
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let body = text.strip_prefix("```json").or_else(|| text.strip_prefix("```"))?;
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}

fn bracket_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let value = extract_json_value(r#"{"score": 8.5}"#).unwrap();
        assert_eq!(value["score"], json!(8.5));
    }

    #[test]
    fn parses_json_in_prose() {
        let value = extract_json_value("Here is the result:\n[1, 2, 3]\nHope it helps.").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn parses_fenced_json() {
        let value = extract_json_value("```json\n{\"name\": \"x\"}\n```").unwrap();
        assert_eq!(value["name"], "x");
    }

    #[test]
    fn unwraps_result_envelope() {
        let items = extract_json_array(r#"{"results": [{"a": 1}, {"a": 2}]}"#);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn empty_on_garbage() {
        assert!(extract_json_value("no json here").is_none());
        assert!(extract_json_array("no json here").is_empty());
    }
}
