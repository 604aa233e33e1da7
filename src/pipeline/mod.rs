//! Adaptive research pipeline.
//!
//! Drives the phases selected by the plan's [`PhaseConfig`], sequentially,
//! each phase parallelizing its own unit of work. Every phase checkpoints
//! its outputs to the session store, so a re-run resumes from the last
//! completed phase. High-cost phases sit behind approval gates; a rejected
//! gate skips the guarded phase and the pipeline continues with fewer
//! inputs.

pub mod gates;
pub mod session;

pub use gates::{ApprovalCallback, ApprovalGate, GateKind, GateManager, GateStatus};
pub use session::{ResearchSession, SessionStore};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{
    Analyzer, Clusterer, EvidenceExtractor, PdfLoader, Screener, TaxonomyBuilder,
};
use crate::cache::ToolCache;
use crate::config::Settings;
use crate::core::{
    AdaptivePlan, Claim, Cluster, EvidenceSpan, FutureDirection, Paper, PaperStatus, Phase,
    ResearchRequest, ScreeningRecord, StudyCard, TaxonomyMatrix,
};
use crate::embedding::Embedder;
use crate::llm::LlmClient;
use crate::planner::{AdaptivePlanner, PlanExecutor, Planner};
use crate::store::KvStore;
use crate::synthesis::{AuditResult, CitationAuditor, ClaimGenerator, GapMiner, GroundedWriter};
use crate::tools::ToolRegistry;

/// Rough per-paper token estimate for the synthesis budget gate.
const TOKENS_PER_PAPER: u64 = 3000;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Planning failed: {0}")]
    Planning(String),
    #[error("Failed to persist paper registry: {0}")]
    Persist(String),
}

/// One progress emission: phase, human message, structured payload.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: String,
    pub message: String,
    pub data: Value,
}

pub type ProgressHook = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Result of running the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub plan_id: String,
    pub topic: String,
    pub session_id: String,

    pub steps_completed: usize,
    pub steps_failed: usize,

    pub total_collected: usize,
    pub unique_papers: usize,
    pub relevant_papers: usize,
    pub high_relevance_papers: usize,
    pub duplicates_removed: usize,

    pub papers_with_full_text: usize,
    pub clusters_created: usize,
    pub claims_generated: usize,

    pub cache_hit_rate: f64,
    pub sources_used: Vec<String>,

    pub papers: Vec<Paper>,
    pub clusters: Vec<Cluster>,
    pub audit: Option<AuditResult>,

    pub report_markdown: String,
    pub report_id: Option<String>,

    /// True when the run was cancelled cooperatively; partial results are
    /// still populated.
    pub cancelled: bool,
}

impl PipelineResult {
    pub fn to_display(&self) -> String {
        let mut lines = vec![
            format!("**Topic:** {}", self.topic),
            format!("**Papers found:** {}", self.unique_papers),
            format!("**Relevant:** {}", self.relevant_papers),
            format!("**High relevance:** {}", self.high_relevance_papers),
        ];
        if !self.clusters.is_empty() {
            lines.push(format!("**Clusters:** {}", self.clusters.len()));
        }
        if !self.report_markdown.is_empty() {
            lines.push("**Report:** Generated".to_string());
        }
        lines.join("\n")
    }
}

/// Everything a phase may produce, snapshotted at each checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PipelineState {
    papers: Vec<Paper>,
    screening_records: Vec<ScreeningRecord>,
    study_cards: Vec<StudyCard>,
    evidence_spans: Vec<EvidenceSpan>,
    clusters: Vec<Cluster>,
    claims: Vec<Claim>,
    taxonomy: TaxonomyMatrix,
    future_directions: Vec<FutureDirection>,
    report_markdown: String,
    report_id: Option<String>,

    steps_completed: usize,
    steps_failed: usize,
    total_collected: usize,
    duplicates_removed: usize,
    relevant_papers: usize,
    cache_hit_rate: f64,

    audit_passed: usize,
    audit_failed_major: usize,
    audit_failed_minor: usize,
    audit_repaired: usize,
    audit_total: usize,
    audit_audited: usize,
    audited: bool,
}

pub struct ResearchPipeline {
    llm: Option<Arc<dyn LlmClient>>,
    registry: Arc<ToolRegistry>,
    cache: Arc<ToolCache>,
    sessions: SessionStore,
    embedder: Arc<dyn Embedder>,
    settings: Settings,
}

impl ResearchPipeline {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        registry: Arc<ToolRegistry>,
        cache: Arc<ToolCache>,
        store: Arc<dyn KvStore>,
        embedder: Arc<dyn Embedder>,
        settings: Settings,
    ) -> Self {
        ResearchPipeline {
            llm,
            registry,
            cache,
            sessions: SessionStore::new(store),
            embedder,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn generate_adaptive_plan(&self, request: &mut ResearchRequest) -> AdaptivePlan {
        let planner = Planner::new(self.llm.clone(), Arc::clone(&self.registry));
        AdaptivePlanner::new(planner).create_adaptive_plan(request).await
    }

    /// Run the plan's active phases in order.
    ///
    /// Fatal errors are planning failure and failure to persist the initial
    /// paper registry; anything else degrades to a phase-local failure.
    /// Cancellation ends the run early with partial results.
    pub async fn execute_plan(
        &self,
        request: &ResearchRequest,
        mut adaptive: AdaptivePlan,
        progress: Option<ProgressHook>,
        approval: Option<ApprovalCallback>,
        cancel: CancellationToken,
        resume_session_id: Option<String>,
    ) -> Result<PipelineResult, PipelineError> {
        if adaptive.plan.steps.is_empty() {
            return Err(PipelineError::Planning("plan has no steps".into()));
        }

        let plan_id = Uuid::new_v4().to_string();
        let session_id = resume_session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut session = match self.sessions.load(&session_id).await {
            Some(existing) => existing,
            None => {
                let session =
                    ResearchSession::new(&session_id, &adaptive.plan.topic, &plan_id);
                self.sessions.save(&session).await;
                session
            }
        };

        let mut gate_manager = GateManager::new(
            self.settings.pdf_gate_threshold,
            self.settings.token_gate_threshold,
        );
        if let Some(callback) = approval {
            gate_manager.set_approval_callback(callback);
        }

        let emit = |phase: Phase, message: &str, data: Value| {
            if let Some(hook) = &progress {
                hook(ProgressEvent {
                    phase: phase.as_str().to_string(),
                    message: message.to_string(),
                    data,
                });
            }
        };

        let mut state = PipelineState::default();
        let mut cancelled = false;

        let phases = adaptive.phase_config.active_phases.clone();
        for phase in phases {
            // Cancellation is cooperative: stop before the next phase,
            // keep what was collected so far.
            if cancel.is_cancelled() {
                info!(phase = %phase, "pipeline cancelled");
                cancelled = true;
                break;
            }

            // A checkpointed phase restores its outputs and is skipped.
            if let Some(restored) = self
                .sessions
                .load_checkpoint::<PipelineState>(&session.session_id, phase)
                .await
            {
                info!(phase = %phase, "phase restored from checkpoint");
                state = restored;
                continue;
            }

            self.sessions.transition_phase(&mut session, phase).await;
            emit(phase, &format!("{phase} started"), json!({}));

            let phase_outcome = match phase {
                Phase::Planning => {
                    // The plan is already built by this point; the phase
                    // exists so resumes and progress see it.
                    info!(steps = adaptive.plan.steps.len(), "plan ready");
                    Ok(())
                }
                Phase::Execution => {
                    self.run_execution(
                        &mut adaptive,
                        &mut state,
                        &plan_id,
                        &mut gate_manager,
                        &progress,
                        &cancel,
                    )
                    .await
                }
                Phase::Persistence => self.run_persistence(&mut state),
                Phase::Analysis => self.run_analysis(&mut state, request).await,
                Phase::Screening => self.run_screening(&mut state, request).await,
                Phase::PdfLoading => {
                    self.run_pdf_loading(&mut state, &mut gate_manager).await
                }
                Phase::EvidenceExtraction => {
                    self.run_evidence_extraction(&mut state, &mut gate_manager).await
                }
                Phase::Clustering => self.run_clustering(&mut state, &plan_id).await,
                Phase::ClaimGeneration => self.run_claim_generation(&mut state).await,
                Phase::GapMining => self.run_gap_mining(&mut state, request).await,
                Phase::Writing => self.run_writing(&mut state, request).await,
                Phase::CitationAudit => self.run_citation_audit(&mut state).await,
                Phase::Publish => self.run_publish(&mut state, &mut session).await,
            };

            match phase_outcome {
                Ok(()) => {
                    self.sessions
                        .checkpoint(&session.session_id, phase, &state)
                        .await;
                    emit(
                        phase,
                        &format!("{phase} complete"),
                        json!({
                            "papers": state.papers.len(),
                            "claims": state.claims.len(),
                        }),
                    );
                }
                Err(error) => match phase {
                    // Only planning and the initial persist are fatal.
                    Phase::Planning => return Err(PipelineError::Planning(error)),
                    Phase::Persistence => return Err(PipelineError::Persist(error)),
                    _ => {
                        warn!(phase = %phase, error = %error, "phase failed, continuing");
                        emit(phase, &format!("{phase} failed: {error}"), json!({}));
                    }
                },
            }
        }

        session.total_papers = state.total_collected;
        session.unique_papers = state.papers.len();
        session.high_relevance_papers = state
            .papers
            .iter()
            .filter(|paper| paper.relevance_score.is_some_and(|score| score >= 8.0))
            .count();
        self.sessions.save(&session).await;

        let metrics = self.cache.metrics();
        let sources_used: BTreeSet<String> =
            state.papers.iter().map(|paper| paper.source.clone()).collect();

        Ok(PipelineResult {
            plan_id,
            topic: adaptive.plan.topic.clone(),
            session_id: session.session_id.clone(),
            steps_completed: state.steps_completed,
            steps_failed: state.steps_failed,
            total_collected: state.total_collected,
            unique_papers: state.papers.len(),
            relevant_papers: state.relevant_papers,
            high_relevance_papers: session.high_relevance_papers,
            duplicates_removed: state.duplicates_removed,
            papers_with_full_text: state
                .papers
                .iter()
                .filter(|paper| paper.full_text.is_some())
                .count(),
            clusters_created: state.clusters.len(),
            claims_generated: state.claims.len(),
            cache_hit_rate: if state.cache_hit_rate > 0.0 {
                state.cache_hit_rate
            } else {
                metrics.hit_rate
            },
            sources_used: sources_used.into_iter().collect(),
            audit: state.audited.then(|| AuditResult {
                total_claims: state.audit_total,
                audited_claims: state.audit_audited,
                passed: state.audit_passed,
                failed: (state.audit_failed_major + state.audit_failed_minor)
                    .saturating_sub(state.audit_repaired),
                failed_major: state.audit_failed_major,
                failed_minor: state.audit_failed_minor,
                repaired: state.audit_repaired,
            }),
            papers: state.papers,
            clusters: state.clusters,
            report_markdown: state.report_markdown,
            report_id: state.report_id,
            cancelled,
        })
    }

    async fn run_execution(
        &self,
        adaptive: &mut AdaptivePlan,
        state: &mut PipelineState,
        plan_id: &str,
        gate_manager: &mut GateManager,
        progress: &Option<ProgressHook>,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        // External URLs need approval before any collect step runs.
        let plan_urls: Vec<String> = adaptive
            .plan
            .steps
            .iter()
            .flat_map(|step| step.sources.iter().cloned())
            .collect();
        if let Some(gate) = gate_manager.check_url_gate(&plan_urls) {
            if !gate_manager.request_approval(gate).await {
                info!("external crawl rejected, dropping external urls from plan");
                for step in &mut adaptive.plan.steps {
                    step.sources.retain(|url| gates::is_standard(url));
                    if let Some(urls) = step.tool_args.get_mut("urls") {
                        if let Some(list) = urls.as_array() {
                            let kept: Vec<Value> = list
                                .iter()
                                .filter(|value| {
                                    value.as_str().map(gates::is_standard).unwrap_or(false)
                                })
                                .cloned()
                                .collect();
                            *urls = Value::Array(kept);
                        }
                    }
                }
            }
        }

        let mut executor = PlanExecutor::new(
            plan_id,
            Arc::clone(&self.registry),
            Some(Arc::clone(&self.cache)),
            self.settings.tool_timeout,
        );
        if let Some(hook) = progress.clone() {
            executor.set_step_callback(Arc::new(move |step, result| {
                hook(ProgressEvent {
                    phase: "execution".to_string(),
                    message: format!("step {} {}", step.id, step.title),
                    data: json!({
                        "step_id": step.id,
                        "papers": result.unique_count + result.duplicates_removed,
                        "unique": result.unique_count,
                        "duplicates": result.duplicates_removed,
                    }),
                });
            }));
        }

        executor.execute(&mut adaptive.plan, cancel).await;

        let exec_progress = executor.progress();
        state.steps_completed = exec_progress.completed_steps.len();
        state.steps_failed = exec_progress.failed_steps.len();
        state.total_collected = exec_progress.total_papers_collected;
        state.duplicates_removed = exec_progress.duplicates_removed;
        state.cache_hit_rate = exec_progress.cache_hit_rate();

        state.papers = executor
            .all_papers()
            .iter()
            .filter_map(Paper::from_tool_record)
            .collect();
        info!(papers = state.papers.len(), "execution collected papers");
        Ok(())
    }

    /// Assign a persistent id to each paper, idempotent by identity fields.
    fn run_persistence(&self, state: &mut PipelineState) -> Result<(), String> {
        if state.papers.is_empty() {
            // An empty corpus is not a persistence failure.
            return Ok(());
        }
        for paper in &mut state.papers {
            let id = paper
                .arxiv_id
                .clone()
                .or_else(|| paper.doi.clone())
                .unwrap_or_else(|| {
                    let mut hasher = Md5::new();
                    hasher.update(
                        format!(
                            "{}|{}",
                            paper.title.to_lowercase(),
                            paper.first_author().unwrap_or_default().to_lowercase()
                        )
                        .as_bytes(),
                    );
                    hex::encode(hasher.finalize())
                });
            paper.id = Some(id);
            paper.metadata_hash = {
                let mut hasher = Md5::new();
                hasher.update(
                    format!("{}|{}", paper.title, paper.authors.join(",")).as_bytes(),
                );
                Some(hex::encode(hasher.finalize()))
            };
        }
        info!(papers = state.papers.len(), "papers persisted");
        Ok(())
    }

    /// Quick-mode relevance scoring: assigns scores without screening
    /// records.
    async fn run_analysis(
        &self,
        state: &mut PipelineState,
        request: &ResearchRequest,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("analysis requires an LLM".into());
        };
        let analyzer = Analyzer::new(llm.as_ref());
        state.relevant_papers = analyzer.score_papers(&mut state.papers, &request.topic).await;
        Ok(())
    }

    async fn run_screening(
        &self,
        state: &mut PipelineState,
        request: &ResearchRequest,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("screening requires an LLM".into());
        };
        let screener = Screener::new(llm.as_ref(), self.settings.screening_batch_size);
        let (included, records) = screener
            .screen_papers(&mut state.papers, &request.topic)
            .await;
        state.screening_records = records;
        state.relevant_papers = included;
        // Downstream phases only see included papers.
        state
            .papers
            .retain(|paper| paper.status != PaperStatus::Raw);
        Ok(())
    }

    async fn run_pdf_loading(
        &self,
        state: &mut PipelineState,
        gate_manager: &mut GateManager,
    ) -> Result<(), String> {
        if let Some(gate) = gate_manager.check_pdf_gate(state.papers.len()) {
            if !gate_manager.request_approval(gate).await {
                info!("pdf download rejected, continuing with abstracts only");
                return Ok(());
            }
        }

        let loader = PdfLoader::new(
            Some(Arc::clone(&self.cache)),
            self.settings.pdf_relevance_threshold,
            self.settings.pdf_timeout,
        );
        loader.load_batch(&mut state.papers).await;
        Ok(())
    }

    async fn run_evidence_extraction(
        &self,
        state: &mut PipelineState,
        gate_manager: &mut GateManager,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("evidence extraction requires an LLM".into());
        };

        let estimated = state.papers.len() as u64 * TOKENS_PER_PAPER;
        if let Some(gate) = gate_manager.check_token_gate(estimated) {
            if !gate_manager.request_approval(gate).await {
                info!("token budget rejected, skipping evidence extraction");
                return Ok(());
            }
        }

        let loader = PdfLoader::new(
            Some(Arc::clone(&self.cache)),
            self.settings.pdf_relevance_threshold,
            self.settings.pdf_timeout,
        );
        let extractor = EvidenceExtractor::new(llm.as_ref(), &loader);
        let (cards, spans) = extractor.extract_batch(&mut state.papers).await;
        state.study_cards = cards;
        state.evidence_spans = spans;
        Ok(())
    }

    async fn run_clustering(
        &self,
        state: &mut PipelineState,
        plan_id: &str,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("clustering requires an LLM".into());
        };
        let clusterer = Clusterer::new(llm.as_ref(), self.embedder.as_ref());
        state.clusters = clusterer.cluster_papers(&mut state.papers, plan_id).await;
        Ok(())
    }

    async fn run_claim_generation(&self, state: &mut PipelineState) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("claim generation requires an LLM".into());
        };
        let generator = ClaimGenerator::new(llm.as_ref());
        state.claims = generator
            .generate_claims(&state.study_cards, &state.evidence_spans, &state.clusters)
            .await;
        Ok(())
    }

    async fn run_gap_mining(
        &self,
        state: &mut PipelineState,
        request: &ResearchRequest,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("gap mining requires an LLM".into());
        };
        state.taxonomy = TaxonomyBuilder::new().build(&state.study_cards, &state.clusters);
        let miner = GapMiner::new(llm.as_ref());
        state.future_directions = miner
            .mine_gaps(
                &state.study_cards,
                &state.evidence_spans,
                &state.taxonomy,
                &request.topic,
            )
            .await;
        Ok(())
    }

    async fn run_writing(
        &self,
        state: &mut PipelineState,
        request: &ResearchRequest,
    ) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("writing requires an LLM".into());
        };
        let writer = GroundedWriter::new(llm.as_ref());
        state.report_markdown = writer
            .generate_report(
                &request.topic,
                &state.claims,
                &state.clusters,
                &state.evidence_spans,
                &state.papers,
                &state.taxonomy,
                &state.future_directions,
                "",
            )
            .await;
        info!(chars = state.report_markdown.len(), "report generated");
        Ok(())
    }

    async fn run_citation_audit(&self, state: &mut PipelineState) -> Result<(), String> {
        let Some(llm) = &self.llm else {
            return Err("citation audit requires an LLM".into());
        };
        let auditor = CitationAuditor::new(llm.as_ref());
        let result = auditor
            .audit_claims(&mut state.claims, &state.evidence_spans)
            .await;
        state.audit_total = result.total_claims;
        state.audit_audited = result.audited_claims;
        state.audit_passed = result.passed;
        state.audit_failed_major = result.failed_major;
        state.audit_failed_minor = result.failed_minor;
        state.audit_repaired = result.repaired;
        state.audited = true;
        Ok(())
    }

    async fn run_publish(
        &self,
        state: &mut PipelineState,
        session: &mut ResearchSession,
    ) -> Result<(), String> {
        if state.report_markdown.is_empty() {
            info!("no report to publish");
            return Ok(());
        }
        let report_id = format!("report:{}", session.session_id);
        crate::store::put_json(
            self.sessions_store(),
            &report_id,
            &state.report_markdown,
            std::time::Duration::from_secs(86400 * 7),
        )
        .await
        .map_err(|error| error.to_string())?;
        state.report_id = Some(report_id.clone());
        session.report_id = Some(report_id);
        Ok(())
    }

    fn sessions_store(&self) -> &dyn KvStore {
        self.sessions.backing_store()
    }
}
