//! Research session state and phase checkpoints, persisted to the KV store.
//!
//! Checkpoints make every phase idempotent: a resumed pipeline restores a
//! phase's outputs from `checkpoint:{session}:{phase}` instead of re-running
//! it.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::Phase;
use crate::store::{get_json, put_json, KvStore};

const SESSION_TTL: Duration = Duration::from_secs(86400);

/// Research session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    pub session_id: String,
    pub topic: String,
    pub plan_id: String,
    pub current_phase: String,
    #[serde(default)]
    pub phases_completed: Vec<String>,
    #[serde(default)]
    pub total_papers: usize,
    #[serde(default)]
    pub unique_papers: usize,
    #[serde(default)]
    pub high_relevance_papers: usize,
    #[serde(default)]
    pub report_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>, plan_id: impl Into<String>) -> Self {
        let now = Utc::now();
        ResearchSession {
            session_id: session_id.into(),
            topic: topic.into(),
            plan_id: plan_id.into(),
            current_phase: "idle".into(),
            phases_completed: Vec::new(),
            total_papers: 0,
            unique_papers: 0,
            high_relevance_papers: 0,
            report_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub struct SessionStore {
    store: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        SessionStore { store }
    }

    pub fn backing_store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn checkpoint_key(session_id: &str, phase: Phase) -> String {
        format!("checkpoint:{session_id}:{phase}")
    }

    pub async fn save(&self, session: &ResearchSession) {
        let _ = put_json(
            self.store.as_ref(),
            &Self::session_key(&session.session_id),
            session,
            SESSION_TTL,
        )
        .await;
    }

    pub async fn load(&self, session_id: &str) -> Option<ResearchSession> {
        get_json(self.store.as_ref(), &Self::session_key(session_id))
            .await
            .ok()
            .flatten()
    }

    /// Mark a phase transition on the session snapshot.
    pub async fn transition_phase(&self, session: &mut ResearchSession, phase: Phase) {
        if session.current_phase != "idle" && !session.phases_completed.contains(&session.current_phase)
        {
            session.phases_completed.push(session.current_phase.clone());
        }
        session.current_phase = phase.as_str().to_string();
        session.updated_at = Utc::now();
        info!(session = %session.session_id, phase = %phase, "phase transition");
        self.save(session).await;
    }

    /// Persist a phase's outputs so a re-run can restore them.
    pub async fn checkpoint<T: Serialize>(&self, session_id: &str, phase: Phase, payload: &T) {
        let key = Self::checkpoint_key(session_id, phase);
        let _ = put_json(self.store.as_ref(), &key, payload, SESSION_TTL).await;
        debug!(session = session_id, phase = %phase, "checkpoint written");
    }

    /// Restore a phase's outputs; None when the phase has not completed.
    pub async fn load_checkpoint<T: DeserializeOwned>(
        &self,
        session_id: &str,
        phase: Phase,
    ) -> Option<T> {
        let key = Self::checkpoint_key(session_id, phase);
        get_json(self.store.as_ref(), &key).await.ok().flatten()
    }

    pub async fn clear_checkpoints(&self, session_id: &str) {
        let prefix = format!("checkpoint:{session_id}:");
        if let Ok(keys) = self.store.scan_prefix(&prefix).await {
            for key in keys {
                let _ = self.store.del(&key).await;
            }
        }
    }
}
