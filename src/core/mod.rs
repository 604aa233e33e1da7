//! Canonical data model shared by the orchestrator and the pipeline.

mod evidence;
mod paper;
mod plan;

pub use evidence::{
    Claim, Cluster, DirectionType, EvidenceField, EvidenceSpan, FutureDirection, GapSource,
    Locator, ScreeningRecord, ScreeningTier, StudyCard, TaxonomyMatrix,
};
pub use paper::{PageInfo, Paper, PaperStatus, PaperSummary};
pub use plan::{
    AdaptivePlan, OutputConfig, Phase, PhaseConfig, QueryInfo, QueryType, ResearchPlan,
    ResearchRequest, ResearchStep, StepAction, TimeWindow,
};
