//! Working memory for dialogue state: message ring, state machine position,
//! pending clarification/plan, and the KV-backed conversation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{AdaptivePlan, ResearchRequest};
use crate::store::{get_json, put_json, KvStore};

const CONVERSATION_TTL: Duration = Duration::from_secs(7200);
const MAX_MESSAGES: usize = 50;

/// States in the conversation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Idle,
    Clarifying,
    Planning,
    Reviewing,
    Editing,
    Executing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Clarification payload stored while the conversation is in CLARIFYING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClarification {
    pub original_query: String,
    pub understanding: String,
    #[serde(default)]
    pub sub_queries: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub memory_context: String,
}

/// Working memory for one conversation session.
///
/// The pending plan and current request are transient: they are not
/// serialized into the KV snapshot and come back as None after a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    pub state: DialogueState,
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(skip)]
    pub current_request: Option<ResearchRequest>,
    #[serde(default)]
    pub research_session_id: Option<String>,

    #[serde(skip)]
    pub pending_plan: Option<AdaptivePlan>,
    #[serde(default)]
    pub pending_clarification: Option<PendingClarification>,
    #[serde(default)]
    pub pending_urls: Vec<String>,

    #[serde(default)]
    pub result_summary: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_user() -> String {
    "default".to_string()
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        ConversationContext {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            state: DialogueState::Idle,
            messages: Vec::new(),
            current_topic: None,
            current_request: None,
            research_session_id: None,
            pending_plan: None,
            pending_clarification: None,
            pending_urls: Vec::new(),
            result_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        });
        self.updated_at = Utc::now();
        // Keep the last N turns only.
        if self.messages.len() > MAX_MESSAGES {
            let drop = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..drop);
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(MessageRole::User, content);
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(MessageRole::Assistant, content);
    }

    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn transition_to(&mut self, new_state: DialogueState) {
        info!(
            conversation = %self.conversation_id,
            from = ?self.state,
            to = ?new_state,
            "state transition"
        );
        self.state = new_state;
        self.updated_at = Utc::now();
    }

    pub fn set_pending_plan(&mut self, plan: AdaptivePlan, request: ResearchRequest) {
        self.current_topic = Some(request.topic.clone());
        self.pending_plan = Some(plan);
        self.current_request = Some(request);
        self.transition_to(DialogueState::Reviewing);
    }

    pub fn clear_pending_plan(&mut self) {
        self.pending_plan = None;
    }

    pub fn is_awaiting_approval(&self) -> bool {
        self.state == DialogueState::Reviewing && self.pending_plan.is_some()
    }
}

/// Summary row for conversation listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub user_id: String,
    pub state: DialogueState,
    pub current_topic: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// KV-backed storage for conversation contexts with a sliding TTL.
pub struct ConversationStore {
    store: Arc<dyn KvStore>,
}

impl ConversationStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        ConversationStore { store }
    }

    fn key(conversation_id: &str) -> String {
        format!("conversation:{conversation_id}")
    }

    pub async fn save(&self, context: &ConversationContext) {
        let key = Self::key(&context.conversation_id);
        if put_json(self.store.as_ref(), &key, context, CONVERSATION_TTL)
            .await
            .is_ok()
        {
            debug!(conversation = %context.conversation_id, "saved conversation");
        }
    }

    pub async fn load(&self, conversation_id: &str) -> Option<ConversationContext> {
        get_json(self.store.as_ref(), &Self::key(conversation_id))
            .await
            .ok()
            .flatten()
    }

    pub async fn delete(&self, conversation_id: &str) {
        let _ = self.store.del(&Self::key(conversation_id)).await;
    }

    pub async fn extend_ttl(&self, conversation_id: &str) {
        let _ = self
            .store
            .expire(&Self::key(conversation_id), CONVERSATION_TTL)
            .await;
    }

    pub async fn list_all(&self) -> Vec<ConversationSummary> {
        let keys = self
            .store
            .scan_prefix("conversation:")
            .await
            .unwrap_or_default();
        let mut summaries = Vec::new();
        for key in keys {
            let conversation_id = key.trim_start_matches("conversation:");
            if let Some(context) = self.load(conversation_id).await {
                summaries.push(ConversationSummary {
                    conversation_id: context.conversation_id.clone(),
                    user_id: context.user_id.clone(),
                    state: context.state,
                    current_topic: context.current_topic.clone(),
                    message_count: context.messages.len(),
                    created_at: context.created_at,
                });
            }
        }
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PhaseConfig, QueryInfo, QueryType, ResearchPlan};
    use crate::store::MemoryKv;

    fn plan() -> AdaptivePlan {
        AdaptivePlan {
            plan: ResearchPlan {
                topic: "t".into(),
                summary: String::new(),
                steps: vec![],
                language: "en".into(),
            },
            query_info: QueryInfo {
                original_query: "t".into(),
                query_type: QueryType::Full,
                main_topic: "t".into(),
                urls: vec![],
                skip_synthesis: false,
            },
            phase_config: PhaseConfig::full(),
        }
    }

    #[test]
    fn message_ring_is_bounded() {
        let mut context = ConversationContext::new("c1", "u");
        for i in 0..60 {
            context.add_user_message(format!("m{i}"));
        }
        assert_eq!(context.messages.len(), MAX_MESSAGES);
        assert_eq!(context.messages.last().unwrap().content, "m59");
        assert_eq!(context.messages.first().unwrap().content, "m10");
    }

    #[tokio::test]
    async fn transient_fields_do_not_survive_reload() {
        let store = ConversationStore::new(Arc::new(MemoryKv::new()));
        let mut context = ConversationContext::new("c1", "u");
        context.set_pending_plan(plan(), ResearchRequest::new("t"));
        assert!(context.is_awaiting_approval());
        store.save(&context).await;

        let loaded = store.load("c1").await.unwrap();
        assert_eq!(loaded.state, DialogueState::Reviewing);
        assert_eq!(loaded.current_topic.as_deref(), Some("t"));
        // Pending plan and request are transient.
        assert!(loaded.pending_plan.is_none());
        assert!(loaded.current_request.is_none());
    }

    #[tokio::test]
    async fn listing_shows_live_conversations() {
        let store = ConversationStore::new(Arc::new(MemoryKv::new()));
        let mut a = ConversationContext::new("a", "u1");
        a.add_user_message("hello");
        store.save(&a).await;
        store.save(&ConversationContext::new("b", "u2")).await;

        let mut summaries = store.list_all().await;
        summaries.sort_by(|x, y| x.conversation_id.cmp(&y.conversation_id));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].message_count, 1);
    }
}
