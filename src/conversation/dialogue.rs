//! Dialogue orchestrator: the state machine over a long-lived conversation.
//!
//! Fuses user turns, memory, clarification, plan approval and execution
//! control. Owns the conversation contexts exclusively; per-conversation
//! work is serialized through `&mut self`, so readers never observe torn
//! state. [`DialogueManager::process_message`] takes the context out of the
//! in-process map and threads it by reference through the private handlers,
//! so an unknown conversation id is handled once, at the entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::clarifier::{detect_language, Language, QueryClarifier};
use super::context::{
    ConversationContext, ConversationStore, DialogueState, MessageRole, PendingClarification,
};
use super::intent::{IntentClassifier, IntentResult, UserIntent};
use crate::core::{AdaptivePlan, ResearchRequest};
use crate::llm::{GenerateRequest, LlmClient};
use crate::memory::{MemoryContext, MemoryManager, SessionOutcome, SessionRecord};
use crate::pipeline::{PipelineResult, ProgressHook, ResearchPipeline};
use crate::prompts;
use crate::store::KvStore;
use uuid::Uuid;

/// Response from the dialogue manager.
#[derive(Debug, Clone)]
pub struct DialogueResponse {
    pub message: String,
    pub state: DialogueState,
    pub plan: Option<AdaptivePlan>,
    pub result: Option<PipelineResult>,
    pub needs_input: bool,
}

impl DialogueResponse {
    fn text(message: impl Into<String>, state: DialogueState) -> Self {
        DialogueResponse {
            message: message.into(),
            state,
            plan: None,
            result: None,
            needs_input: true,
        }
    }
}

/// Localized user-visible message templates.
fn localized(key: &str, language: Language) -> &'static str {
    use Language::*;
    match (key, language) {
        ("cancel_research", English) => "No problem. What else would you like to research?",
        ("cancel_research", Vietnamese) => "Không sao cả. Bạn muốn tìm hiểu về gì nữa?",
        ("cancel_research", Spanish) => "No hay problema. ¿Qué más te gustaría investigar?",
        ("cancel_research", French) => "Pas de problème. Qu'aimeriez-vous rechercher d'autre?",
        ("cancel_research", German) => "Kein Problem. Was möchten Sie sonst noch recherchieren?",

        ("plan_cancelled", English) => "Cancelled. What else would you like to research?",
        ("plan_cancelled", Vietnamese) => "Đã hủy. Bạn muốn tìm hiểu về gì khác?",
        ("plan_cancelled", Spanish) => "Cancelado. ¿Qué más te gustaría investigar?",
        ("plan_cancelled", French) => "Annulé. Qu'aimeriez-vous rechercher d'autre?",
        ("plan_cancelled", German) => "Abgebrochen. Was möchten Sie sonst noch recherchieren?",

        ("proceed_or_edit", English) => "Say 'ok' to proceed, 'cancel' to stop, or describe changes.",
        ("proceed_or_edit", Vietnamese) => "Nói 'ok' để tiếp tục, 'hủy' để dừng, hoặc mô tả thay đổi.",
        ("proceed_or_edit", Spanish) => {
            "Di 'ok' para continuar, 'cancelar' para detener, o describe los cambios."
        }
        ("proceed_or_edit", French) => {
            "Dites 'ok' pour continuer, 'annuler' pour arrêter, ou décrivez les modifications."
        }
        ("proceed_or_edit", German) => {
            "Sagen Sie 'ok' zum Fortfahren, 'abbrechen' zum Stoppen oder beschreiben Sie Änderungen."
        }

        ("still_working", English) => "Still working on the research...",
        ("still_working", Vietnamese) => "Vẫn đang nghiên cứu...",
        ("still_working", Spanish) => "Todavía trabajando en la investigación...",
        ("still_working", French) => "Toujours en train de rechercher...",
        ("still_working", German) => "Arbeite noch an der Recherche...",

        ("ask_topic", English) => "What topic would you like to research?",
        ("ask_topic", Vietnamese) => "Bạn muốn tìm hiểu về chủ đề gì?",
        ("ask_topic", Spanish) => "¿Qué tema te gustaría investigar?",
        ("ask_topic", French) => "Quel sujet aimeriez-vous rechercher?",
        ("ask_topic", German) => "Welches Thema möchten Sie recherchieren?",

        ("try_again", English) => "Let's try again. What would you like to research?",
        ("try_again", Vietnamese) => "Thử lại nhé. Bạn muốn tìm hiểu về gì?",
        ("try_again", Spanish) => "Intentémoslo de nuevo. ¿Qué te gustaría investigar?",
        ("try_again", French) => "Essayons à nouveau. Qu'aimeriez-vous rechercher?",
        ("try_again", German) => "Versuchen wir es noch einmal. Was möchten Sie recherchieren?",

        ("no_plan", English) => "No plan to execute. What would you like to research?",
        ("no_plan", Vietnamese) => "Không có kế hoạch nào để thực hiện. Bạn muốn tìm hiểu về gì?",
        ("no_plan", Spanish) => "No hay plan para ejecutar. ¿Qué te gustaría investigar?",
        ("no_plan", French) => "Aucun plan à exécuter. Qu'aimeriez-vous rechercher?",
        ("no_plan", German) => "Kein Plan zum Ausführen. Was möchten Sie recherchieren?",

        ("proceed_with_understanding", English) => "(Or say 'ok' to proceed with my understanding)",
        ("proceed_with_understanding", Vietnamese) => {
            "(Hoặc nói 'ok' để tiếp tục với hiểu biết của tôi)"
        }
        ("proceed_with_understanding", Spanish) => "(O di 'ok' para continuar con mi comprensión)",
        ("proceed_with_understanding", French) => {
            "(Ou dites 'ok' pour continuer avec ma compréhension)"
        }
        ("proceed_with_understanding", German) => {
            "(Oder sagen Sie 'ok', um mit meinem Verständnis fortzufahren)"
        }

        ("from_history", English) => "From your history:",
        ("from_history", Vietnamese) => "Từ lịch sử của bạn:",
        ("from_history", Spanish) => "De tu historial:",
        ("from_history", French) => "De votre historique:",
        ("from_history", German) => "Aus Ihrer Historie:",

        ("chat_fallback", English) => {
            "Hi! I'm a research assistant. Tell me a topic and I'll help you find and analyze papers on it."
        }
        ("chat_fallback", Vietnamese) => {
            "Chào bạn! Tôi là trợ lý nghiên cứu. Hãy cho tôi biết chủ đề bạn muốn tìm hiểu, tôi sẽ giúp bạn tìm và phân tích các bài báo khoa học."
        }
        ("chat_fallback", Spanish) => {
            "¡Hola! Soy un asistente de investigación. Dime un tema y te ayudaré a encontrar y analizar artículos."
        }
        ("chat_fallback", French) => {
            "Bonjour! Je suis un assistant de recherche. Dites-moi un sujet et je vous aiderai à trouver des articles."
        }
        ("chat_fallback", German) => {
            "Hallo! Ich bin ein Forschungsassistent. Nennen Sie mir ein Thema und ich helfe Ihnen, Artikel zu finden."
        }

        _ => "What topic would you like to research?",
    }
}

pub struct DialogueManager {
    llm: Option<Arc<dyn LlmClient>>,
    pipeline: Arc<ResearchPipeline>,
    intents: IntentClassifier,
    clarifier: QueryClarifier,
    memory: Arc<MemoryManager>,
    store: ConversationStore,
    contexts: HashMap<String, ConversationContext>,
    cancel_tokens: HashMap<String, CancellationToken>,
    progress: Option<ProgressHook>,
}

impl DialogueManager {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        pipeline: Arc<ResearchPipeline>,
        memory: Arc<MemoryManager>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        DialogueManager {
            intents: IntentClassifier::new(llm.clone()),
            clarifier: QueryClarifier::new(llm.clone()),
            llm,
            pipeline,
            memory,
            store: ConversationStore::new(kv),
            contexts: HashMap::new(),
            cancel_tokens: HashMap::new(),
            progress: None,
        }
    }

    /// Attach a listener for execution progress (SSE/WebSocket/CLI).
    pub fn set_progress_hook(&mut self, hook: ProgressHook) {
        self.progress = Some(hook);
    }

    pub async fn start_conversation(&mut self, user_id: &str) -> String {
        let conversation_id = Uuid::new_v4().to_string();
        let context = ConversationContext::new(&conversation_id, user_id);
        self.store.save(&context).await;
        self.contexts.insert(conversation_id.clone(), context);
        info!(conversation = %conversation_id, user = user_id, "started conversation");
        conversation_id
    }

    pub async fn get_context(&mut self, conversation_id: &str) -> Option<&ConversationContext> {
        if !self.contexts.contains_key(conversation_id) {
            let loaded = self.store.load(conversation_id).await?;
            self.contexts.insert(conversation_id.to_string(), loaded);
        }
        self.contexts.get(conversation_id)
    }

    /// Cancel the running pipeline for a conversation, if any.
    pub fn cancel(&mut self, conversation_id: &str) {
        if let Some(token) = self.cancel_tokens.get(conversation_id) {
            token.cancel();
        }
    }

    /// Take a conversation out of the in-process map, falling back to the
    /// KV snapshot. The caller owns the context until it is reinserted.
    async fn take_context(&mut self, conversation_id: &str) -> Option<ConversationContext> {
        if let Some(context) = self.contexts.remove(conversation_id) {
            return Some(context);
        }
        self.store.load(conversation_id).await
    }

    /// Process one user turn. Messages within a conversation are handled
    /// strictly in arrival order. An unknown conversation id starts a fresh
    /// conversation rather than failing.
    pub async fn process_message(
        &mut self,
        conversation_id: &str,
        user_message: &str,
    ) -> DialogueResponse {
        let mut context = match self.take_context(conversation_id).await {
            Some(context) => context,
            None => {
                let context =
                    ConversationContext::new(Uuid::new_v4().to_string(), "default");
                info!(conversation = %context.conversation_id, "started conversation");
                context
            }
        };

        context.add_user_message(user_message);
        let state = context.state;
        let state_hint = state_context_hint(state);

        let intent = self.intents.classify_with_llm(user_message, state_hint).await;
        info!(intent = ?intent.intent, state = ?state, "classified turn");

        let response = match state {
            DialogueState::Idle => self.handle_idle(&mut context, &intent).await,
            DialogueState::Clarifying => self.handle_clarifying(&mut context, &intent).await,
            DialogueState::Planning | DialogueState::Reviewing | DialogueState::Editing => {
                self.handle_reviewing(&mut context, &intent).await
            }
            DialogueState::Executing => DialogueResponse {
                needs_input: false,
                ..DialogueResponse::text(
                    localized("still_working", context_language(&context)),
                    DialogueState::Executing,
                )
            },
            DialogueState::Complete => self.handle_complete(&mut context, &intent).await,
            DialogueState::Error => self.handle_error(&mut context, &intent).await,
        };

        context.add_assistant_message(&response.message);
        self.store.save(&context).await;
        self.contexts
            .insert(context.conversation_id.clone(), context);
        response
    }

    async fn handle_idle(
        &mut self,
        context: &mut ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        let language = context_language(context);
        stash_urls(context, intent);

        match intent.intent {
            UserIntent::NewTopic => {
                self.analyze_and_maybe_clarify(context, &intent.original_message)
                    .await
            }
            UserIntent::Chat => self.handle_chat(context, intent).await,
            UserIntent::Other if intent.original_message.split_whitespace().count() >= 3 => {
                self.analyze_and_maybe_clarify(context, &intent.original_message)
                    .await
            }
            UserIntent::Other => self.handle_chat(context, intent).await,
            _ => DialogueResponse::text(localized("ask_topic", language), DialogueState::Idle),
        }
    }

    async fn handle_clarifying(
        &mut self,
        context: &mut ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        let language = context_language(context);
        stash_urls(context, intent);

        match intent.intent {
            UserIntent::Cancel => {
                context.pending_clarification = None;
                context.transition_to(DialogueState::Idle);
                DialogueResponse::text(localized("cancel_research", language), DialogueState::Idle)
            }
            UserIntent::Confirm => self.proceed_to_planning(context).await,
            _ => {
                // Any other text is the clarification itself.
                match context.pending_clarification.take() {
                    Some(clarification) => {
                        let topic = format!(
                            "{} ({})",
                            clarification.original_query, intent.original_message
                        );
                        context.current_topic = Some(topic.clone());
                        self.create_plan(context, &topic).await
                    }
                    None => self.proceed_to_planning(context).await,
                }
            }
        }
    }

    async fn handle_reviewing(
        &mut self,
        context: &mut ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        let language = context_language(context);
        stash_urls(context, intent);

        match intent.intent {
            UserIntent::Confirm => self.execute_plan(context).await,
            UserIntent::Cancel => {
                context.clear_pending_plan();
                context.transition_to(DialogueState::Idle);
                DialogueResponse::text(localized("plan_cancelled", language), DialogueState::Idle)
            }
            UserIntent::Edit => self.edit_plan(context, &intent.edit_text),
            UserIntent::NewTopic => {
                // A fresh topic discards the pending plan.
                context.clear_pending_plan();
                self.analyze_and_maybe_clarify(context, &intent.original_message)
                    .await
            }
            _ => DialogueResponse {
                plan: context.pending_plan.clone(),
                ..DialogueResponse::text(
                    localized("proceed_or_edit", language),
                    DialogueState::Reviewing,
                )
            },
        }
    }

    async fn handle_complete(
        &mut self,
        context: &mut ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        match intent.intent {
            UserIntent::NewTopic => {
                self.analyze_and_maybe_clarify(context, &intent.original_message)
                    .await
            }
            UserIntent::Chat => self.handle_chat(context, intent).await,
            _ => {
                let message = context
                    .result_summary
                    .clone()
                    .unwrap_or_else(|| "Research complete. Start a new topic?".to_string());
                DialogueResponse::text(message, DialogueState::Complete)
            }
        }
    }

    async fn handle_error(
        &mut self,
        context: &mut ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        let language = context_language(context);
        match intent.intent {
            UserIntent::NewTopic => {
                self.analyze_and_maybe_clarify(context, &intent.original_message)
                    .await
            }
            UserIntent::Chat => self.handle_chat(context, intent).await,
            _ => {
                context.transition_to(DialogueState::Idle);
                DialogueResponse::text(localized("try_again", language), DialogueState::Idle)
            }
        }
    }

    async fn handle_chat(
        &self,
        context: &ConversationContext,
        intent: &IntentResult,
    ) -> DialogueResponse {
        let language = context_language(context);

        if let Some(llm) = &self.llm {
            let prompt = prompts::chat_prompt(&intent.original_message, &language.to_string());
            match llm.generate(GenerateRequest::new(prompt)).await {
                Ok(response) => {
                    return DialogueResponse::text(response.trim().to_string(), context.state);
                }
                Err(err) => warn!(%err, "chat llm failed"),
            }
        }
        DialogueResponse::text(localized("chat_fallback", language), context.state)
    }

    /// The think-before-plan step: consult memory, analyze the query, and
    /// either ask clarifying questions or go straight to planning.
    async fn analyze_and_maybe_clarify(
        &mut self,
        context: &mut ConversationContext,
        topic: &str,
    ) -> DialogueResponse {
        context.current_topic = Some(topic.to_string());
        let user_id = context.user_id.clone();

        let memory_context = self.memory.get_context(&user_id, topic).await;
        let should_skip = self.memory.should_skip_clarification(&user_id, topic).await;
        let clarification = self.clarifier.analyze(topic).await;

        if clarification.needs_clarification && !should_skip {
            let mut message = self.clarifier.format_message(&clarification);

            if !memory_context.similar_sessions.is_empty() {
                message.push_str("\n\n");
                message.push_str(localized("from_history", clarification.detected_language));
                for session in memory_context.similar_sessions.iter().take(2) {
                    message.push_str(&format!("\n  - {session}"));
                }
            }
            message.push_str("\n\n");
            message.push_str(localized(
                "proceed_with_understanding",
                clarification.detected_language,
            ));

            context.pending_clarification = Some(PendingClarification {
                original_query: clarification.original_query.clone(),
                understanding: clarification.understanding.clone(),
                sub_queries: clarification.sub_queries.clone(),
                questions: clarification.questions.clone(),
                memory_context: memory_context.to_prompt_context(),
            });
            context.transition_to(DialogueState::Clarifying);

            return DialogueResponse::text(message, DialogueState::Clarifying);
        }

        self.create_plan_with_memory(context, topic, Some(memory_context))
            .await
    }

    async fn proceed_to_planning(
        &mut self,
        context: &mut ConversationContext,
    ) -> DialogueResponse {
        let mut topic = context.current_topic.clone().unwrap_or_default();
        if let Some(clarification) = context.pending_clarification.take() {
            topic = if clarification.sub_queries.is_empty() {
                clarification.understanding
            } else {
                format!(
                    "{} (Focus: {})",
                    clarification.understanding,
                    clarification.sub_queries.join("; ")
                )
            };
        }
        self.create_plan(context, &topic).await
    }

    async fn create_plan(
        &mut self,
        context: &mut ConversationContext,
        topic: &str,
    ) -> DialogueResponse {
        let memory_context = self.memory.get_context(&context.user_id, topic).await;
        self.create_plan_with_memory(context, topic, Some(memory_context))
            .await
    }

    async fn create_plan_with_memory(
        &mut self,
        context: &mut ConversationContext,
        topic: &str,
        memory_context: Option<MemoryContext>,
    ) -> DialogueResponse {
        context.transition_to(DialogueState::Planning);

        let mut request = ResearchRequest::new(topic);

        // User-provided URLs extracted from messages.
        if !context.pending_urls.is_empty() {
            let mut urls = std::mem::take(&mut context.pending_urls);
            urls.sort();
            urls.dedup();
            request.sources = urls;
        }

        // Memory widens the paper budget; user URLs stay in place.
        if let Some(memory_context) = memory_context {
            if memory_context.max_papers > 0 {
                request.output.max_papers = memory_context.max_papers;
            }
        }

        let plan = self.pipeline.generate_adaptive_plan(&mut request).await;
        if plan.plan.steps.is_empty() {
            error!("planner produced an empty plan");
            context.transition_to(DialogueState::Error);
            return DialogueResponse::text(
                "Error creating plan: planner returned no steps".to_string(),
                DialogueState::Error,
            );
        }

        let display = plan.to_display();
        context.set_pending_plan(plan.clone(), request);

        DialogueResponse {
            plan: Some(plan),
            ..DialogueResponse::text(
                format!("**Research Plan:**\n\n{display}\n\nProceed?"),
                DialogueState::Reviewing,
            )
        }
    }

    async fn execute_plan(&mut self, context: &mut ConversationContext) -> DialogueResponse {
        let language = context_language(context);
        let Some(plan) = context.pending_plan.clone() else {
            return DialogueResponse::text(localized("no_plan", language), DialogueState::Idle);
        };
        let Some(request) = context.current_request.clone() else {
            return DialogueResponse::text(localized("no_plan", language), DialogueState::Idle);
        };
        context.transition_to(DialogueState::Executing);
        let user_id = context.user_id.clone();

        let cancel = CancellationToken::new();
        self.cancel_tokens
            .insert(context.conversation_id.clone(), cancel.clone());
        let started = Instant::now();
        let original_query = request.topic.clone();

        let outcome = self
            .pipeline
            .execute_plan(&request, plan, self.progress.clone(), None, cancel, None)
            .await;
        self.cancel_tokens.remove(&context.conversation_id);
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                let session_outcome = if result.cancelled {
                    SessionOutcome::Abandoned
                } else {
                    SessionOutcome::Success
                };
                self.memory
                    .record_session(
                        &user_id,
                        &result.session_id,
                        &original_query,
                        &original_query,
                        session_outcome,
                        SessionRecord {
                            papers_found: result.unique_papers,
                            relevant_papers: result.relevant_papers,
                            high_relevance_papers: result.high_relevance_papers,
                            clusters_created: result.clusters_created,
                            sources_used: result.sources_used.clone(),
                            duration_seconds: duration,
                            ..Default::default()
                        },
                    )
                    .await;
                let language_tag = language.to_string().to_lowercase();
                self.memory
                    .learn_from_interaction(
                        &user_id,
                        &original_query,
                        &language_tag,
                        &result.sources_used,
                    )
                    .await;

                let summary = result.to_display();
                context.research_session_id = Some(result.session_id.clone());
                context.result_summary = Some(summary.clone());
                context.clear_pending_plan();
                context.transition_to(DialogueState::Complete);

                DialogueResponse {
                    result: Some(result),
                    ..DialogueResponse::text(
                        format!("Done!\n\n{summary}"),
                        DialogueState::Complete,
                    )
                }
            }
            Err(err) => {
                error!(%err, "execution failed");
                self.memory
                    .record_session(
                        &user_id,
                        &context.conversation_id,
                        &original_query,
                        &original_query,
                        SessionOutcome::Failed,
                        SessionRecord {
                            duration_seconds: duration,
                            ..Default::default()
                        },
                    )
                    .await;

                // The pending plan stays around for inspection.
                context.transition_to(DialogueState::Error);
                DialogueResponse::text(format!("Research failed: {err}"), DialogueState::Error)
            }
        }
    }

    /// Parse an edit directive locally: `add X` appends X as a query to the
    /// first research step, `remove X` drops matching queries everywhere.
    /// Re-issuing the same edit is a no-op.
    fn edit_plan(
        &self,
        context: &mut ConversationContext,
        edit_text: &str,
    ) -> DialogueResponse {
        let Some(plan) = context.pending_plan.as_mut() else {
            return DialogueResponse::text("No plan to edit.", DialogueState::Idle);
        };

        let edit_lower = edit_text.to_lowercase();
        if let Some(to_add) = strip_directive(&edit_lower, &["add", "thêm"]) {
            if !to_add.is_empty() {
                if let Some(step) = plan
                    .plan
                    .first_step_mut(crate::core::StepAction::Research)
                {
                    if !step.queries.iter().any(|query| query == &to_add) {
                        step.queries.push(to_add);
                    }
                }
            }
        } else if let Some(to_remove) = strip_directive(&edit_lower, &["remove", "xóa"]) {
            if !to_remove.is_empty() {
                for step in &mut plan.plan.steps {
                    step.queries
                        .retain(|query| !query.to_lowercase().contains(&to_remove));
                }
            }
        }

        let display = plan.to_display();
        let plan = plan.clone();
        DialogueResponse {
            plan: Some(plan),
            ..DialogueResponse::text(
                format!("Updated:\n\n{display}\n\nProceed?"),
                DialogueState::Reviewing,
            )
        }
    }
}

/// Most recent user turn that shows a non-English language wins.
fn context_language(context: &ConversationContext) -> Language {
    for message in context.recent_messages(3).iter().rev() {
        if message.role == MessageRole::User {
            let detected = detect_language(&message.content);
            if detected != Language::English {
                return detected;
            }
        }
    }
    Language::English
}

/// URLs are merged into the conversation regardless of intent.
fn stash_urls(context: &mut ConversationContext, intent: &IntentResult) {
    for url in &intent.extracted_urls {
        if !context.pending_urls.contains(url) {
            context.pending_urls.push(url.clone());
        }
    }
}

fn state_context_hint(state: DialogueState) -> &'static str {
    match state {
        DialogueState::Reviewing | DialogueState::Editing => {
            "User was just shown a research plan and asked 'Proceed with this plan? (yes/no/edit)'"
        }
        DialogueState::Clarifying => "User was asked clarifying questions about their research topic",
        DialogueState::Executing => "Research is currently being executed",
        DialogueState::Complete => "Research just completed, user might want to start a new topic",
        _ => "",
    }
}
