use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// What a user asked the system to research. Append-only planner input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// User-supplied source URLs.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub research_questions: Vec<String>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        ResearchRequest {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub language: String,
    pub max_papers: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            language: "en".to_string(),
            max_papers: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Research,
    Collect,
    Analyze,
    Synthesize,
}

impl StepAction {
    pub fn from_tag(tag: &str) -> StepAction {
        match tag {
            "collect" => StepAction::Collect,
            "analyze" => StepAction::Analyze,
            "synthesize" => StepAction::Synthesize,
            _ => StepAction::Research,
        }
    }
}

/// One executable step of a research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStep {
    pub id: u32,
    pub action: StepAction,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub tool_args: Map<String, Value>,
    #[serde(default)]
    pub completed: bool,
}

impl ResearchStep {
    pub fn new(action: StepAction, title: impl Into<String>) -> Self {
        ResearchStep {
            id: 0,
            action,
            title: title.into(),
            description: String::new(),
            queries: Vec::new(),
            sources: Vec::new(),
            tool: None,
            tool_args: Map::new(),
            completed: false,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        self.tool = Some(tool.into());
        self.tool_args = args;
        self
    }
}

/// An ordered, editable research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    pub steps: Vec<ResearchStep>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl ResearchPlan {
    /// Renumber step ids contiguously starting at 1.
    pub fn renumber(&mut self) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.id = index as u32 + 1;
        }
    }

    pub fn first_step_mut(&mut self, action: StepAction) -> Option<&mut ResearchStep> {
        self.steps.iter_mut().find(|step| step.action == action)
    }

    pub fn to_display(&self) -> String {
        let mut lines = Vec::new();
        for step in &self.steps {
            lines.push(format!("  {}. {}", step.id, step.title));
            let queries = if step.queries.is_empty() {
                "N/A".to_string()
            } else {
                step.queries
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            lines.push(format!("     Queries: {queries}"));
        }
        lines.join("\n")
    }
}

/// QUICK answers fast with metadata only; FULL runs the synthesis phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Quick,
    Full,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Quick => write!(f, "QUICK"),
            QueryType::Full => write!(f, "FULL"),
        }
    }
}

/// Parsed shape of the user's query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryInfo {
    pub original_query: String,
    pub query_type: QueryType,
    pub main_topic: String,
    #[serde(default)]
    pub urls: Vec<String>,
    pub skip_synthesis: bool,
}

/// Pipeline phases, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Execution,
    Persistence,
    Analysis,
    Screening,
    PdfLoading,
    EvidenceExtraction,
    Clustering,
    ClaimGeneration,
    GapMining,
    Writing,
    CitationAudit,
    Publish,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Execution => "execution",
            Phase::Persistence => "persistence",
            Phase::Analysis => "analysis",
            Phase::Screening => "screening",
            Phase::PdfLoading => "pdf_loading",
            Phase::EvidenceExtraction => "evidence_extraction",
            Phase::Clustering => "clustering",
            Phase::ClaimGeneration => "claim_generation",
            Phase::GapMining => "gap_mining",
            Phase::Writing => "writing",
            Phase::CitationAudit => "citation_audit",
            Phase::Publish => "publish",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phases a given run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub active_phases: Vec<Phase>,
    pub skip_synthesis: bool,
}

impl PhaseConfig {
    pub fn quick() -> Self {
        PhaseConfig {
            active_phases: vec![
                Phase::Planning,
                Phase::Execution,
                Phase::Persistence,
                Phase::Analysis,
            ],
            skip_synthesis: true,
        }
    }

    pub fn full() -> Self {
        PhaseConfig {
            active_phases: vec![
                Phase::Planning,
                Phase::Execution,
                Phase::Persistence,
                Phase::Screening,
                Phase::PdfLoading,
                Phase::EvidenceExtraction,
                Phase::Clustering,
                Phase::ClaimGeneration,
                Phase::GapMining,
                Phase::Writing,
                Phase::CitationAudit,
                Phase::Publish,
            ],
            skip_synthesis: false,
        }
    }

    pub fn for_query_type(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Quick => PhaseConfig::quick(),
            QueryType::Full => PhaseConfig::full(),
        }
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        self.active_phases.contains(&phase)
    }
}

/// A research plan plus the query analysis and phase configuration that
/// determine how it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptivePlan {
    pub plan: ResearchPlan,
    pub query_info: QueryInfo,
    pub phase_config: PhaseConfig,
}

impl AdaptivePlan {
    pub fn topic(&self) -> &str {
        &self.plan.topic
    }

    pub fn to_display(&self) -> String {
        let phases = self
            .phase_config
            .active_phases
            .iter()
            .map(|phase| phase.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "**Mode:** {}\n**Phases:** {}\n\n**Steps:**\n{}",
            self.query_info.query_type,
            phases,
            self.plan.to_display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renumber_makes_ids_contiguous() {
        let mut plan = ResearchPlan {
            topic: "t".into(),
            summary: String::new(),
            steps: vec![
                ResearchStep::new(StepAction::Collect, "a"),
                ResearchStep::new(StepAction::Research, "b"),
                ResearchStep::new(StepAction::Synthesize, "c"),
            ],
            language: "en".into(),
        };
        plan.renumber();
        let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn quick_config_skips_synthesis() {
        let config = PhaseConfig::for_query_type(QueryType::Quick);
        assert!(config.skip_synthesis);
        assert!(config.is_active(Phase::Analysis));
        assert!(!config.is_active(Phase::Screening));

        let full = PhaseConfig::for_query_type(QueryType::Full);
        assert!(full.is_active(Phase::CitationAudit));
        assert!(!full.is_active(Phase::Analysis));
    }
}
