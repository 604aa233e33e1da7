//! End-to-end dialogue scenarios driving the orchestrator with a stubbed
//! LLM and a scripted search tool.

mod common;

use std::sync::Arc;

use common::{sample_corpus, scripted_registry, StubLlm};
use surveyor::cache::ToolCache;
use surveyor::config::Settings;
use surveyor::conversation::{DialogueManager, DialogueState};
use surveyor::core::{QueryType, StepAction};
use surveyor::embedding::HashEmbedder;
use surveyor::llm::LlmClient;
use surveyor::memory::MemoryManager;
use surveyor::pipeline::ResearchPipeline;
use surveyor::store::{KvStore, MemoryKv};

fn manager() -> DialogueManager {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let llm: Arc<dyn LlmClient> = Arc::new(StubLlm);
    let registry = scripted_registry(sample_corpus(2));
    let cache = Arc::new(ToolCache::new(Arc::clone(&kv)));
    let pipeline = Arc::new(ResearchPipeline::new(
        Some(Arc::clone(&llm)),
        registry,
        cache,
        Arc::clone(&kv),
        Arc::new(HashEmbedder::default()),
        Settings::default(),
    ));
    let memory = Arc::new(MemoryManager::new(Arc::clone(&kv)));
    DialogueManager::new(Some(llm), pipeline, memory, kv)
}

#[tokio::test]
async fn quick_paper_lookup_completes_without_report() {
    let mut manager = manager();
    let conversation = manager.start_conversation("tester").await;

    // A short paper lookup needs no clarification and routes QUICK.
    let response = manager.process_message(&conversation, "BERT paper").await;
    assert_eq!(response.state, DialogueState::Reviewing);
    let plan = response.plan.expect("plan shown for review");
    assert_eq!(plan.query_info.query_type, QueryType::Quick);
    assert!(plan.phase_config.skip_synthesis);
    assert!((1..=3).contains(&plan.plan.steps.len()));
    for step in &plan.plan.steps {
        if matches!(step.action, StepAction::Research | StepAction::Collect) {
            assert_eq!(step.tool.as_deref(), Some("search"));
        }
    }

    let response = manager.process_message(&conversation, "ok").await;
    assert_eq!(response.state, DialogueState::Complete);
    let result = response.result.expect("pipeline result");
    assert!(result.unique_papers >= 1);
    // QUICK: scored but never screened, and no report produced.
    assert!(result.relevant_papers >= 1);
    assert!(result.report_markdown.is_empty());
    assert!(response.message.contains("Papers found"));
}

#[tokio::test]
async fn vietnamese_compound_query_triggers_clarification() {
    let mut manager = manager();
    let conversation = manager.start_conversation("tester").await;

    let response = manager
        .process_message(
            &conversation,
            "chào, cho tôi một vài nghiên cứu về vision transformers",
        )
        .await;
    assert_eq!(response.state, DialogueState::Clarifying);
    // Clarification is rendered in Vietnamese with 1-2 questions.
    assert!(response.message.contains("Bạn"));
    assert!(response.message.contains('?'));
    assert!(response.message.contains("'ok'"));

    // "ok" proceeds with the assistant's understanding.
    let response = manager.process_message(&conversation, "ok").await;
    assert_eq!(response.state, DialogueState::Reviewing);
    let plan = response.plan.expect("plan shown for review");
    let research_steps: Vec<_> = plan
        .plan
        .steps
        .iter()
        .filter(|step| step.action == StepAction::Research)
        .collect();
    assert_eq!(research_steps.len(), 1);
    assert!(!research_steps[0].queries.is_empty());
}

#[tokio::test]
async fn plan_edits_are_applied_and_idempotent() {
    let mut manager = manager();
    let conversation = manager.start_conversation("tester").await;

    let response = manager
        .process_message(&conversation, "research efficient attention methods")
        .await;
    assert_eq!(response.state, DialogueState::Reviewing);

    let response = manager
        .process_message(&conversation, "add adapter tuning")
        .await;
    assert_eq!(response.state, DialogueState::Reviewing);
    let plan = response.plan.expect("updated plan");
    let research = plan
        .plan
        .steps
        .iter()
        .find(|step| step.action == StepAction::Research)
        .expect("research step");
    let occurrences = research
        .queries
        .iter()
        .filter(|query| query.as_str() == "adapter tuning")
        .count();
    assert_eq!(occurrences, 1);

    // Re-issuing the same edit changes nothing.
    let response = manager
        .process_message(&conversation, "add adapter tuning")
        .await;
    let plan = response.plan.expect("updated plan");
    let research = plan
        .plan
        .steps
        .iter()
        .find(|step| step.action == StepAction::Research)
        .expect("research step");
    let occurrences = research
        .queries
        .iter()
        .filter(|query| query.as_str() == "adapter tuning")
        .count();
    assert_eq!(occurrences, 1);

    // And a removal drops it again.
    let response = manager
        .process_message(&conversation, "remove adapter tuning")
        .await;
    let plan = response.plan.expect("updated plan");
    assert!(plan
        .plan
        .steps
        .iter()
        .all(|step| !step.queries.iter().any(|q| q.contains("adapter tuning"))));
}

#[tokio::test]
async fn cancel_during_review_returns_to_idle() {
    let mut manager = manager();
    let conversation = manager.start_conversation("tester").await;

    let response = manager
        .process_message(&conversation, "research efficient attention methods")
        .await;
    assert_eq!(response.state, DialogueState::Reviewing);

    let response = manager.process_message(&conversation, "cancel").await;
    assert_eq!(response.state, DialogueState::Idle);

    // The discarded plan is gone; confirming now has nothing to run.
    let context = manager.get_context(&conversation).await.unwrap();
    assert!(context.pending_plan.is_none());
}

#[tokio::test]
async fn greeting_is_chat_and_stays_idle() {
    let mut manager = manager();
    let conversation = manager.start_conversation("tester").await;

    let response = manager.process_message(&conversation, "hello").await;
    assert_eq!(response.state, DialogueState::Idle);
    assert!(!response.message.is_empty());
}
