//! Full-pipeline integration: FULL mode through screening, extraction,
//! clustering, claims, audit, writing and publish, plus the PDF gate and
//! checkpoint resume behavior.

mod common;

use std::sync::{Arc, Mutex};

use common::{sample_corpus, scripted_registry, StubLlm};
use surveyor::cache::ToolCache;
use surveyor::config::Settings;
use surveyor::core::ResearchRequest;
use surveyor::embedding::HashEmbedder;
use surveyor::llm::LlmClient;
use surveyor::pipeline::{ApprovalGate, GateKind, ResearchPipeline};
use surveyor::store::{KvStore, MemoryKv};
use tokio_util::sync::CancellationToken;

fn pipeline_with_corpus(n: usize) -> (Arc<ResearchPipeline>, Arc<dyn KvStore>) {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let llm: Arc<dyn LlmClient> = Arc::new(StubLlm);
    let registry = scripted_registry(sample_corpus(n));
    let cache = Arc::new(ToolCache::new(Arc::clone(&kv)));
    let pipeline = Arc::new(ResearchPipeline::new(
        Some(llm),
        registry,
        cache,
        Arc::clone(&kv),
        Arc::new(HashEmbedder::default()),
        Settings::default(),
    ));
    (pipeline, kv)
}

#[tokio::test]
async fn full_pipeline_produces_grounded_report() {
    let (pipeline, _kv) = pipeline_with_corpus(4);
    let mut request = ResearchRequest::new("efficient attention survey");
    let plan = pipeline.generate_adaptive_plan(&mut request).await;
    assert!(!plan.phase_config.skip_synthesis);

    let result = pipeline
        .execute_plan(&request, plan, None, None, CancellationToken::new(), None)
        .await
        .expect("pipeline run");

    assert_eq!(result.unique_papers, 4);
    assert_eq!(result.relevant_papers, 4);
    // All scored 9.0 by the stub screener.
    assert_eq!(result.high_relevance_papers, 4);
    assert!(result.clusters_created >= 1);
    assert!(result.claims_generated >= 1);

    let audit = result.audit.expect("audit ran");
    assert_eq!(audit.failed, 0);
    assert!((audit.pass_rate() - 1.0).abs() < f64::EPSILON);

    // Fixed report outline with numbered references.
    let report = &result.report_markdown;
    assert!(report.contains("## 1. Scope & Search Strategy"));
    assert!(report.contains("## 2. Theme Map"));
    assert!(report.contains("## 3. Thematic Synthesis"));
    assert!(report.contains("## References"));
    assert!(report.contains("1. Author 0"));
    assert!(result.report_id.is_some());

    // Papers got persistent ids from their identity fields.
    for paper in &result.papers {
        assert_eq!(paper.id.as_deref(), paper.arxiv_id.as_deref());
    }
}

#[tokio::test]
async fn resumed_run_restores_checkpoints_and_matches() {
    let (pipeline, _kv) = pipeline_with_corpus(4);
    let mut request = ResearchRequest::new("efficient attention survey");
    let plan = pipeline.generate_adaptive_plan(&mut request).await;

    let first = pipeline
        .execute_plan(
            &request,
            plan.clone(),
            None,
            None,
            CancellationToken::new(),
            None,
        )
        .await
        .expect("first run");

    // Re-running under the same session restores every phase from its
    // checkpoint: same paper ids, same report bytes.
    let second = pipeline
        .execute_plan(
            &request,
            plan,
            None,
            None,
            CancellationToken::new(),
            Some(first.session_id.clone()),
        )
        .await
        .expect("resumed run");

    let first_ids: Vec<_> = first.papers.iter().map(|p| p.id.clone()).collect();
    let second_ids: Vec<_> = second.papers.iter().map(|p| p.id.clone()).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(first.report_markdown, second.report_markdown);
    assert_eq!(first.report_id, second.report_id);
}

#[tokio::test]
async fn rejected_pdf_gate_skips_download_and_falls_back_to_abstracts() {
    let (pipeline, _kv) = pipeline_with_corpus(40);
    let mut request = ResearchRequest::new("efficient attention survey");
    let plan = pipeline.generate_adaptive_plan(&mut request).await;

    let seen: Arc<Mutex<Vec<ApprovalGate>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_callback = Arc::clone(&seen);
    let approval: surveyor::pipeline::ApprovalCallback = Arc::new(move |gate: ApprovalGate| {
        let seen = Arc::clone(&seen_in_callback);
        Box::pin(async move {
            let approve = gate.kind != GateKind::PdfDownload;
            seen.lock().unwrap().push(gate);
            approve
        }) as futures::future::BoxFuture<'static, bool>
    });

    let result = pipeline
        .execute_plan(
            &request,
            plan,
            None,
            Some(approval),
            CancellationToken::new(),
            None,
        )
        .await
        .expect("pipeline run");

    // 40 included papers trip the PDF gate with the documented context.
    let gates = seen.lock().unwrap();
    let pdf_gate = gates
        .iter()
        .find(|gate| gate.kind == GateKind::PdfDownload)
        .expect("pdf gate raised");
    assert_eq!(pdf_gate.context["papers_to_download"], 40);
    assert_eq!(pdf_gate.context["estimated_bandwidth_mb"], 80);

    // Rejected: no full text anywhere, synthesis ran on abstracts.
    assert_eq!(result.papers_with_full_text, 0);
    assert!(result.claims_generated >= 1);
    assert!(!result.report_markdown.is_empty());
}

#[tokio::test]
async fn cancellation_returns_partial_results() {
    let (pipeline, _kv) = pipeline_with_corpus(4);
    let mut request = ResearchRequest::new("efficient attention survey");
    let plan = pipeline.generate_adaptive_plan(&mut request).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = pipeline
        .execute_plan(&request, plan, None, None, cancel, None)
        .await
        .expect("cancelled run still returns");
    assert!(result.cancelled);
    assert!(result.report_markdown.is_empty());
}

#[tokio::test]
async fn empty_plan_is_a_fatal_planning_error() {
    let (pipeline, _kv) = pipeline_with_corpus(4);
    let request = ResearchRequest::new("anything");
    let mut plan = {
        let mut request = request.clone();
        pipeline.generate_adaptive_plan(&mut request).await
    };
    plan.plan.steps.clear();

    let outcome = pipeline
        .execute_plan(&request, plan, None, None, CancellationToken::new(), None)
        .await;
    assert!(outcome.is_err());
}
