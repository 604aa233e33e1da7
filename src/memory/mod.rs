//! Memory fabric: episodic (past sessions) and procedural (preferences)
//! stores behind one manager. Working memory is the conversation context,
//! owned by the dialogue layer.

mod episodic;
mod preferences;

pub use episodic::{EpisodicMemory, ResearchEpisode, SessionOutcome};
pub use preferences::{PreferencesStore, UserPreferences};

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::store::KvStore;

/// Combined context from all memory types for a (user, topic) pair.
/// Injected into planning and clarification.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub similar_sessions: Vec<String>,
    pub recommended_sources: Vec<String>,
    pub keywords_effective: Vec<String>,
    pub keywords_to_avoid: Vec<String>,

    pub preferred_language: String,
    pub preferred_sources: Vec<String>,
    pub min_papers: usize,
    pub max_papers: usize,

    /// "new", "regular" or "expert" by interaction count.
    pub user_experience_level: ExperienceLevel,
    pub has_relevant_history: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExperienceLevel {
    #[default]
    New,
    Regular,
    Expert,
}

impl MemoryContext {
    /// Format as context lines for LLM prompts.
    pub fn to_prompt_context(&self) -> String {
        let mut lines = Vec::new();

        if self.has_relevant_history && !self.similar_sessions.is_empty() {
            lines.push("**Past relevant research:**".to_string());
            for session in self.similar_sessions.iter().take(3) {
                lines.push(format!("  - {session}"));
            }
        }
        if !self.keywords_effective.is_empty() {
            lines.push(format!(
                "**Keywords that worked before:** {}",
                self.keywords_effective
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !self.keywords_to_avoid.is_empty() {
            lines.push(format!(
                "**Keywords to avoid:** {}",
                self.keywords_to_avoid
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !self.recommended_sources.is_empty() {
            lines.push(format!(
                "**Recommended sources:** {}",
                self.recommended_sources.join(", ")
            ));
        }

        lines.join("\n")
    }
}

/// Session statistics handed to [`MemoryManager::record_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub papers_found: usize,
    pub relevant_papers: usize,
    pub high_relevance_papers: usize,
    pub clusters_created: usize,
    pub sources_used: Vec<String>,
    pub keywords_effective: Vec<String>,
    pub keywords_ineffective: Vec<String>,
    pub duration_seconds: f64,
}

pub struct MemoryManager {
    pub episodic: EpisodicMemory,
    pub preferences: PreferencesStore,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        MemoryManager {
            episodic: EpisodicMemory::new(Arc::clone(&store)),
            preferences: PreferencesStore::new(store),
        }
    }

    /// Main entry point for enriching planning and clarification.
    pub async fn get_context(&self, user_id: &str, topic: &str) -> MemoryContext {
        let prefs = self.preferences.get(user_id).await;

        let mut context = MemoryContext {
            preferred_language: prefs.preferred_language.clone(),
            preferred_sources: prefs.preferred_sources.clone(),
            min_papers: prefs.min_papers,
            max_papers: prefs.max_papers,
            user_experience_level: match prefs.interaction_count {
                0 => ExperienceLevel::New,
                count if count < 10 => ExperienceLevel::Regular,
                _ => ExperienceLevel::Expert,
            },
            ..Default::default()
        };

        let similar = self.episodic.find_similar_episodes(user_id, topic, 3).await;
        if !similar.is_empty() {
            context.has_relevant_history = true;
            context.similar_sessions = similar.iter().map(|e| e.summary()).collect();
            context.recommended_sources =
                self.episodic.get_effective_sources(user_id, topic).await;
            let (effective, ineffective) =
                self.episodic.get_effective_keywords(user_id, topic).await;
            context.keywords_effective = effective;
            context.keywords_to_avoid = ineffective;
        }

        context
    }

    /// Record a completed research session to episodic memory.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_session(
        &self,
        user_id: &str,
        session_id: &str,
        topic: &str,
        original_query: &str,
        outcome: SessionOutcome,
        record: SessionRecord,
    ) {
        let episode = ResearchEpisode {
            episode_id: session_id.to_string(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            original_query: original_query.to_string(),
            refined_query: String::new(),
            papers_found: record.papers_found,
            relevant_papers: record.relevant_papers,
            high_relevance_papers: record.high_relevance_papers,
            clusters_created: record.clusters_created,
            outcome,
            duration_seconds: record.duration_seconds,
            sources_used: record.sources_used,
            keywords_effective: record.keywords_effective,
            keywords_ineffective: record.keywords_ineffective,
            created_at: Utc::now(),
        };
        self.episodic.save_episode(&episode).await;
        info!(session = session_id, user = user_id, outcome = outcome.as_str(), "recorded session");
    }

    pub async fn learn_from_interaction(
        &self,
        user_id: &str,
        topic: &str,
        language: &str,
        sources: &[String],
    ) {
        self.preferences
            .update_from_interaction(user_id, topic, language, sources, None)
            .await;
    }

    pub async fn get_user_history_summary(&self, user_id: &str, limit: usize) -> Vec<String> {
        self.episodic
            .get_user_episodes(user_id, limit)
            .await
            .iter()
            .map(ResearchEpisode::summary)
            .collect()
    }

    /// Skip clarification iff the user set the flag, or is an expert with a
    /// similar successful session behind them.
    pub async fn should_skip_clarification(&self, user_id: &str, topic: &str) -> bool {
        let prefs = self.preferences.get(user_id).await;
        if prefs.skip_clarification {
            return true;
        }

        if prefs.interaction_count >= 10 {
            let similar = self.episodic.find_similar_episodes(user_id, topic, 1).await;
            if similar
                .first()
                .is_some_and(|episode| episode.outcome == SessionOutcome::Success)
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn manager() -> MemoryManager {
        MemoryManager::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn experience_level_tracks_interactions() {
        let memory = manager();
        let context = memory.get_context("u", "topic").await;
        assert_eq!(context.user_experience_level, ExperienceLevel::New);

        for _ in 0..10 {
            memory.learn_from_interaction("u", "topic", "en", &[]).await;
        }
        let context = memory.get_context("u", "topic").await;
        assert_eq!(context.user_experience_level, ExperienceLevel::Expert);
    }

    #[tokio::test]
    async fn skip_clarification_for_expert_with_success() {
        let memory = manager();
        assert!(!memory.should_skip_clarification("u", "vision transformers").await);

        for _ in 0..10 {
            memory.learn_from_interaction("u", "vision transformers", "en", &[]).await;
        }
        memory
            .record_session(
                "u",
                "s1",
                "vision transformers",
                "vision transformers",
                SessionOutcome::Success,
                SessionRecord::default(),
            )
            .await;
        assert!(memory.should_skip_clarification("u", "vision transformers").await);
        // Different topic, no similar history: still clarifies.
        assert!(!memory.should_skip_clarification("u", "protein folding").await);
    }

    #[tokio::test]
    async fn explicit_flag_always_skips() {
        let memory = manager();
        let mut prefs = memory.preferences.get("u").await;
        prefs.skip_clarification = true;
        memory.preferences.save(&prefs).await;
        assert!(memory.should_skip_clarification("u", "anything").await);
    }

    #[tokio::test]
    async fn context_surfaces_history() {
        let memory = manager();
        memory
            .record_session(
                "u",
                "s1",
                "graph neural networks",
                "graph neural networks",
                SessionOutcome::Success,
                SessionRecord {
                    relevant_papers: 7,
                    sources_used: vec!["arxiv".into()],
                    keywords_effective: vec!["GNN".into()],
                    ..Default::default()
                },
            )
            .await;

        let context = memory.get_context("u", "graph neural networks").await;
        assert!(context.has_relevant_history);
        assert_eq!(context.similar_sessions.len(), 1);
        assert_eq!(context.recommended_sources, vec!["arxiv"]);
        assert!(context.to_prompt_context().contains("GNN"));
    }
}
