//! Planning: turn a research request into an ordered, editable, tool-bound
//! plan.

pub mod adaptive;
pub mod executor;
pub mod query_parser;

pub use adaptive::AdaptivePlanner;
pub use executor::{ExecutionProgress, PaperDeduplicator, PlanExecutor, StepResult, StepStatus};
pub use query_parser::QueryParser;

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{ResearchPlan, ResearchRequest, ResearchStep, StepAction};
use crate::llm::{extract_json_value, GenerateRequest, LlmClient};
use crate::prompts;
use crate::tools::ToolRegistry;

/// Creates editable research plans from user input.
///
/// The LLM proposes 5-7 tool-bound steps; user-provided keywords, URLs and
/// questions are then injected, and step ids renumbered contiguously. On LLM
/// failure a deterministic fallback plan is produced.
pub struct Planner {
    llm: Option<Arc<dyn LlmClient>>,
    registry: Arc<ToolRegistry>,
}

impl Planner {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, registry: Arc<ToolRegistry>) -> Self {
        Planner { llm, registry }
    }

    pub async fn generate_research_plan(&self, request: &ResearchRequest) -> ResearchPlan {
        let Some(llm) = &self.llm else {
            warn!("no LLM configured, using fallback plan");
            return self.fallback_plan(request);
        };

        let hints = build_prompt_context(request);
        let prompt = prompts::plan_prompt(
            &request.topic,
            &self.registry.tools_description(),
            &hints,
        );

        match llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => match self.parse_plan(&response, request) {
                Some(plan) => plan,
                None => {
                    warn!("could not parse plan from LLM response, using fallback");
                    self.fallback_plan(request)
                }
            },
            Err(error) => {
                warn!(%error, "plan generation failed, using fallback");
                self.fallback_plan(request)
            }
        }
    }

    fn parse_plan(&self, response: &str, request: &ResearchRequest) -> Option<ResearchPlan> {
        let data = extract_json_value(response)?;
        let raw_steps = data.get("steps")?.as_array()?;

        let mut steps = Vec::new();
        for raw in raw_steps {
            let action = raw
                .get("action")
                .and_then(Value::as_str)
                .map(StepAction::from_tag)
                .unwrap_or(StepAction::Research);
            let title = raw
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Step {}", steps.len() + 1));

            let mut step = ResearchStep::new(action, title);
            step.description = raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            step.queries = string_list(raw.get("queries"));
            step.sources = string_list(raw.get("sources"));

            // Bind the tool only when it exists in the registry.
            if let Some(tool) = raw.get("tool").and_then(Value::as_str) {
                if self.registry.get_tool(tool).is_some() {
                    step.tool = Some(tool.to_string());
                    step.tool_args = raw
                        .get("tool_args")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                } else {
                    warn!(tool, "plan referenced unknown tool, dropping binding");
                }
            }
            steps.push(step);
        }

        if steps.is_empty() {
            return None;
        }

        let mut plan = ResearchPlan {
            topic: data
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or(&request.topic)
                .to_string(),
            summary: data
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            steps,
            language: request.output.language.clone(),
        };
        inject_user_data(&mut plan, request);
        info!(steps = plan.steps.len(), topic = %plan.topic, "plan generated");
        Some(plan)
    }

    /// Deterministic plan when the LLM is unavailable: collect -> research ->
    /// (questions) -> analyze -> synthesize.
    pub fn fallback_plan(&self, request: &ResearchRequest) -> ResearchPlan {
        let topic = &request.topic;
        let mut steps = Vec::new();

        if !request.sources.is_empty() {
            let mut args = Map::new();
            args.insert("urls".into(), json!(request.sources));
            steps.push(
                ResearchStep::new(StepAction::Collect, "Collect from User Sources")
                    .with_tool("collect_urls", args),
            );
            if let Some(step) = steps.last_mut() {
                step.description = "Fetch papers from user-provided URLs".into();
                step.sources = request.sources.clone();
            }
        }

        let mut initial_queries = request.keywords.clone();
        for query in [
            topic.clone(),
            format!("{topic} survey"),
            format!("{topic} methods"),
        ] {
            if !initial_queries.contains(&query) {
                initial_queries.push(query);
            }
        }
        let mut args = Map::new();
        args.insert("query".into(), json!(topic));
        args.insert("max_results".into(), json!(request.output.max_papers.min(20)));
        let mut research = ResearchStep::new(StepAction::Research, "Initial Research")
            .with_tool("search", args);
        research.description = format!("Search for papers and resources about {topic}");
        research.queries = initial_queries;
        steps.push(research);

        if !request.research_questions.is_empty() {
            let mut args = Map::new();
            args.insert(
                "query".into(),
                json!(request.research_questions.join(" ")),
            );
            let mut questions = ResearchStep::new(StepAction::Research, "Answer Research Questions")
                .with_tool("search", args);
            questions.description = "Find specific answers to user's questions".into();
            questions.queries = request.research_questions.clone();
            steps.push(questions);
        }

        let mut analyze = ResearchStep::new(StepAction::Analyze, "Analyze Findings");
        analyze.description = "Review and analyze collected papers".into();
        steps.push(analyze);

        let mut synthesize = ResearchStep::new(StepAction::Synthesize, "Create Report");
        synthesize.description = "Synthesize findings into comprehensive report".into();
        steps.push(synthesize);

        let mut plan = ResearchPlan {
            topic: topic.clone(),
            summary: format!("Research plan for: {topic}"),
            steps,
            language: request.output.language.clone(),
        };
        plan.renumber();
        plan
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn build_prompt_context(request: &ResearchRequest) -> String {
    let mut parts = Vec::new();
    if !request.keywords.is_empty() {
        parts.push(format!("- Seed keywords: {}", request.keywords.join(", ")));
    }
    if !request.research_questions.is_empty() {
        parts.push("- Specific questions to answer:".to_string());
        for question in &request.research_questions {
            parts.push(format!("  * {question}"));
        }
    }
    if !request.sources.is_empty() {
        parts.push(format!(
            "- Specific sources to include: {}",
            request.sources.join(", ")
        ));
    }
    if let Some(window) = &request.time_window {
        parts.push(format!(
            "- Time window: {} to {}",
            window.start_date, window.end_date
        ));
    }
    parts.join("\n")
}

/// Inject user-provided keywords, URL sources, and questions into the plan,
/// then renumber.
fn inject_user_data(plan: &mut ResearchPlan, request: &ResearchRequest) {
    // 1. User keywords prepend into the first research step's queries.
    if !request.keywords.is_empty() {
        if let Some(step) = plan.first_step_mut(StepAction::Research) {
            for keyword in request.keywords.iter().rev() {
                if !step.queries.contains(keyword) {
                    step.queries.insert(0, keyword.clone());
                }
            }
        }
    }

    // 2. A dedicated collect step for user URLs goes first.
    if !request.sources.is_empty() {
        let mut args = Map::new();
        args.insert("urls".into(), json!(request.sources));
        let mut step = ResearchStep::new(StepAction::Collect, "Collect from User-Specified Sources")
            .with_tool("collect_urls", args);
        step.description = "Fetch papers from URLs provided by user".into();
        step.sources = request.sources.clone();
        plan.steps.insert(0, step);
    }

    // 3. Research questions append as queries when not already covered.
    if !request.research_questions.is_empty() {
        let covered = plan.steps.iter().any(|step| {
            request
                .research_questions
                .iter()
                .all(|question| step.queries.contains(question))
        });
        if !covered {
            let deep = plan.steps.iter_mut().find(|step| {
                let title = step.title.to_lowercase();
                title.contains("deep") || title.contains("specific")
            });
            match deep {
                Some(step) => {
                    for question in &request.research_questions {
                        if !step.queries.contains(question) {
                            step.queries.push(question.clone());
                        }
                    }
                }
                None => {
                    let mut args = Map::new();
                    args.insert("query".into(), json!(request.research_questions.join(" ")));
                    let mut step =
                        ResearchStep::new(StepAction::Research, "Answer User's Research Questions")
                            .with_tool("search", args);
                    step.description =
                        "Find information to answer specific questions provided by user".into();
                    step.queries = request.research_questions.clone();
                    let index = plan.steps.len().min(2);
                    plan.steps.insert(index, step);
                }
            }
        }
    }

    plan.renumber();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{builtin_registry, HfTrending, QueryRefiner, UnifiedSearch, UrlCollector};
    use std::time::Duration;

    fn registry() -> Arc<ToolRegistry> {
        let timeout = Duration::from_secs(5);
        Arc::new(builtin_registry(
            Arc::new(UnifiedSearch::new(timeout, QueryRefiner::new(None), 2)),
            Arc::new(UrlCollector::new(timeout)),
            Arc::new(HfTrending::new(timeout)),
        ))
    }

    #[test]
    fn fallback_plan_covers_collect_research_synthesize() {
        let planner = Planner::new(None, registry());
        let mut request = ResearchRequest::new("linear attention");
        request.sources = vec!["https://arxiv.org/abs/2301.00001".into()];
        request.research_questions = vec!["how does it scale?".into()];

        let plan = planner.fallback_plan(&request);
        let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=plan.steps.len() as u32).collect::<Vec<_>>());
        assert_eq!(plan.steps[0].action, StepAction::Collect);
        assert!(plan.steps.iter().any(|s| s.action == StepAction::Research));
        assert!(plan.steps.iter().any(|s| s.action == StepAction::Synthesize));
        // Research/collect steps carry tool bindings.
        for step in &plan.steps {
            if matches!(step.action, StepAction::Research | StepAction::Collect) {
                assert!(step.tool.is_some(), "step {} missing tool", step.title);
            }
        }
    }

    #[test]
    fn user_data_injection_prepends_and_renumbers() {
        let mut plan = ResearchPlan {
            topic: "t".into(),
            summary: String::new(),
            steps: vec![{
                let mut step = ResearchStep::new(StepAction::Research, "Initial");
                step.queries = vec!["t".into()];
                step
            }],
            language: "en".into(),
        };
        let mut request = ResearchRequest::new("t");
        request.keywords = vec!["kw1".into(), "kw2".into()];
        request.sources = vec!["https://example.org/x.pdf".into()];
        request.research_questions = vec!["q1".into()];

        inject_user_data(&mut plan, &request);

        assert_eq!(plan.steps[0].action, StepAction::Collect);
        let research = plan
            .steps
            .iter()
            .find(|s| s.title == "Initial")
            .unwrap();
        assert_eq!(research.queries[0], "kw1");
        assert_eq!(research.queries[1], "kw2");
        assert!(plan
            .steps
            .iter()
            .any(|s| s.queries.contains(&"q1".to_string())));
        let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=plan.steps.len() as u32).collect::<Vec<_>>());
    }
}
