//! Tool registry: named, typed, cacheable operations.
//!
//! Every tool is a value `(name, description, schema, handler)` held in a
//! single ordered map; callers dispatch by string name. The registry is the
//! only path by which the core reaches the outside world for ingestion.

mod arxiv;
mod collect;
mod error;
mod hf;
mod openalex;
mod refine;
mod search;

pub use arxiv::ArxivClient;
pub use collect::UrlCollector;
pub use error::ToolError;
pub use hf::HfTrending;
pub use openalex::OpenAlexClient;
pub use refine::QueryRefiner;
pub use search::{SearchQuality, UnifiedSearch};

use indexmap::IndexMap;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Definition of a registered tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema shaped parameter descriptor.
    pub parameters: Value,
    pub tags: Vec<String>,
    handler: ToolHandler,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        tags: &[&str],
        handler: ToolHandler,
    ) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            handler,
        }
    }
}

/// Process-wide tool mapping. Safe under concurrent reads; built once at
/// startup and shared behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        info!(tool = %definition.name, "registered tool");
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn list_tools(&self, tag: Option<&str>) -> Vec<&ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| tag.map_or(true, |t| tool.tags.iter().any(|have| have == t)))
            .collect()
    }

    /// Execute a registered tool by name with JSON-shaped arguments.
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = name, "executing tool");
        let handler = Arc::clone(&tool.handler);
        let result = handler(args).await?;
        debug!(tool = name, "tool completed");
        Ok(result)
    }

    /// Export tools in OpenAI function-calling shape.
    pub fn tools_for_llm(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    /// Human-readable tool listing for inclusion in prompts.
    pub fn tools_description(&self) -> String {
        let mut lines = vec!["Available tools:".to_string()];
        for tool in self.tools.values() {
            let params = tool
                .parameters
                .get("required")
                .and_then(Value::as_array)
                .map(|required| {
                    required
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            lines.push(format!("  - {}({}): {}", tool.name, params, tool.description));
        }
        lines.join("\n")
    }
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

/// Build the registry with the built-in ingestion tools.
pub fn builtin_registry(
    search: Arc<UnifiedSearch>,
    collector: Arc<UrlCollector>,
    hf: Arc<HfTrending>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let search_tool = Arc::clone(&search);
    registry.register(ToolDefinition::new(
        "search",
        "Search academic papers across multiple sources (ArXiv + OpenAlex) in parallel. \
         Returns paper metadata including title, abstract, authors, DOI, PDF URLs. \
         Automatically refines queries if initial results are poor.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query (keywords, topic, title)"},
                "max_results": {"type": "integer", "description": "Maximum papers to return"},
                "categories": {"type": "array", "items": {"type": "string"}, "description": "Optional ArXiv category filter"},
            },
            "required": ["query"],
        }),
        &["search", "ingestion"],
        Arc::new(move |args: Value| -> ToolFuture {
            let search = Arc::clone(&search_tool);
            Box::pin(async move {
                let query = string_arg(&args, "query")
                    .ok_or_else(|| ToolError::bad_arguments("search", "missing 'query'"))?;
                let max_results = usize_arg(&args, "max_results", 20);
                let categories: Vec<String> = args
                    .get("categories")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let papers = search.search(&query, max_results, &categories).await;
                Ok(Value::Array(papers))
            })
        }),
    ));

    let collect_one = Arc::clone(&collector);
    registry.register(ToolDefinition::new(
        "collect_url",
        "Collect paper metadata from a direct URL. Supports ArXiv URLs and PDF links.",
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to collect from"},
            },
            "required": ["url"],
        }),
        &["collect", "ingestion", "url"],
        Arc::new(move |args: Value| -> ToolFuture {
            let collector = Arc::clone(&collect_one);
            Box::pin(async move {
                let url = string_arg(&args, "url")
                    .ok_or_else(|| ToolError::bad_arguments("collect_url", "missing 'url'"))?;
                let papers = collector.collect(&url).await;
                Ok(Value::Array(papers))
            })
        }),
    ));

    let collect_many = Arc::clone(&collector);
    registry.register(ToolDefinition::new(
        "collect_urls",
        "Collect papers from multiple URLs. Automatically routes each URL to the appropriate collector.",
        json!({
            "type": "object",
            "properties": {
                "urls": {"type": "array", "items": {"type": "string"}, "description": "URLs to collect from"},
            },
            "required": ["urls"],
        }),
        &["collect", "ingestion", "url"],
        Arc::new(move |args: Value| -> ToolFuture {
            let collector = Arc::clone(&collect_many);
            Box::pin(async move {
                let urls: Vec<String> = args
                    .get("urls")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .ok_or_else(|| ToolError::bad_arguments("collect_urls", "missing 'urls'"))?;
                let mut all = Vec::new();
                for url in urls {
                    all.extend(collector.collect(&url).await);
                }
                Ok(Value::Array(all))
            })
        }),
    ));

    registry.register(ToolDefinition::new(
        "hf_trending",
        "Get trending ML/AI papers from HuggingFace Papers. Good for discovering recent popular research.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Optional search query filter"},
                "max_results": {"type": "integer", "description": "Maximum papers to return"},
            },
            "required": [],
        }),
        &["search", "ingestion", "huggingface"],
        Arc::new(move |args: Value| -> ToolFuture {
            let hf = Arc::clone(&hf);
            Box::pin(async move {
                let query = string_arg(&args, "query").unwrap_or_default();
                let max_results = usize_arg(&args, "max_results", 10);
                let papers = hf.trending(&query, max_results).await;
                Ok(Value::Array(papers))
            })
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool(name: &str, tags: &[&str]) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "echoes its arguments",
            json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}),
            tags,
            Arc::new(|args: Value| -> ToolFuture { Box::pin(async move { Ok(args) }) }),
        )
    }

    #[tokio::test]
    async fn execute_routes_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo", &["test"]));

        let result = registry
            .execute_tool("echo", json!({"q": "hello"}))
            .await
            .unwrap();
        assert_eq!(result["q"], "hello");

        let missing = registry.execute_tool("nope", json!({})).await;
        assert!(matches!(missing, Err(ToolError::NotFound(name)) if name == "nope"));
    }

    #[test]
    fn list_filters_by_tag() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("a", &["search"]));
        registry.register(echo_tool("b", &["collect"]));
        assert_eq!(registry.list_tools(None).len(), 2);
        assert_eq!(registry.list_tools(Some("search")).len(), 1);
    }

    #[test]
    fn llm_export_uses_function_calling_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo", &[]));
        let exported = registry.tools_for_llm();
        assert_eq!(exported[0]["type"], "function");
        assert_eq!(exported[0]["function"]["name"], "echo");
        assert!(exported[0]["function"]["parameters"]["properties"].is_object());
    }

    #[test]
    fn description_lists_required_params() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo", &[]));
        let description = registry.tools_description();
        assert!(description.contains("echo(q)"));
    }
}
