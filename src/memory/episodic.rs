//! Episodic memory: past research sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::store::{get_json, put_json, KvStore};

const EPISODE_TTL: Duration = Duration::from_secs(86400 * 30);
const MAX_EPISODES_PER_USER: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    Partial,
    Failed,
    Abandoned,
}

impl SessionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Success => "success",
            SessionOutcome::Partial => "partial",
            SessionOutcome::Failed => "failed",
            SessionOutcome::Abandoned => "abandoned",
        }
    }

    pub fn is_useful(self) -> bool {
        matches!(self, SessionOutcome::Success | SessionOutcome::Partial)
    }
}

/// A completed research session, written once at session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchEpisode {
    pub episode_id: String,
    pub user_id: String,
    pub topic: String,
    pub original_query: String,
    #[serde(default)]
    pub refined_query: String,
    #[serde(default)]
    pub papers_found: usize,
    #[serde(default)]
    pub relevant_papers: usize,
    #[serde(default)]
    pub high_relevance_papers: usize,
    #[serde(default)]
    pub clusters_created: usize,
    pub outcome: SessionOutcome,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub sources_used: Vec<String>,
    #[serde(default)]
    pub keywords_effective: Vec<String>,
    #[serde(default)]
    pub keywords_ineffective: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ResearchEpisode {
    /// Brief summary for "from your history" hints.
    pub fn summary(&self) -> String {
        format!(
            "[{}] '{}' - {} relevant papers, outcome: {}",
            self.created_at.format("%Y-%m-%d"),
            self.topic,
            self.relevant_papers,
            self.outcome.as_str()
        )
    }
}

pub struct EpisodicMemory {
    store: Arc<dyn KvStore>,
}

impl EpisodicMemory {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        EpisodicMemory { store }
    }

    fn user_key(user_id: &str) -> String {
        format!("episodic:{user_id}")
    }

    fn episode_key(episode_id: &str) -> String {
        format!("episode:{episode_id}")
    }

    pub async fn save_episode(&self, episode: &ResearchEpisode) {
        let episode_key = Self::episode_key(&episode.episode_id);
        if put_json(self.store.as_ref(), &episode_key, episode, EPISODE_TTL)
            .await
            .is_err()
        {
            return;
        }

        let user_key = Self::user_key(&episode.user_id);
        let _ = self
            .store
            .lpush(&user_key, episode.episode_id.clone())
            .await;
        let _ = self
            .store
            .ltrim(&user_key, 0, MAX_EPISODES_PER_USER - 1)
            .await;
        let _ = self.store.expire(&user_key, EPISODE_TTL).await;
        debug!(episode = %episode.episode_id, user = %episode.user_id, "saved episode");
    }

    pub async fn get_episode(&self, episode_id: &str) -> Option<ResearchEpisode> {
        get_json(self.store.as_ref(), &Self::episode_key(episode_id))
            .await
            .ok()
            .flatten()
    }

    pub async fn get_user_episodes(&self, user_id: &str, limit: usize) -> Vec<ResearchEpisode> {
        let ids = self
            .store
            .lrange(&Self::user_key(user_id), 0, limit.saturating_sub(1))
            .await
            .unwrap_or_default();

        let mut episodes = Vec::new();
        for id in ids {
            if let Some(episode) = self.get_episode(&id).await {
                episodes.push(episode);
            }
        }
        episodes
    }

    /// Keyword-overlap ranking over topic words; top-K with overlap >= 1.
    pub async fn find_similar_episodes(
        &self,
        user_id: &str,
        topic: &str,
        limit: usize,
    ) -> Vec<ResearchEpisode> {
        let episodes = self.get_user_episodes(user_id, 20).await;
        let topic_words: std::collections::HashSet<String> =
            topic.to_lowercase().split_whitespace().map(String::from).collect();

        let mut scored: Vec<(usize, ResearchEpisode)> = episodes
            .into_iter()
            .filter_map(|episode| {
                let episode_words: std::collections::HashSet<String> = episode
                    .topic
                    .to_lowercase()
                    .split_whitespace()
                    .map(String::from)
                    .collect();
                let overlap = topic_words.intersection(&episode_words).count();
                (overlap > 0).then_some((overlap, episode))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, ep)| ep).collect()
    }

    /// Sources that worked for similar topics, frequency-ranked over
    /// successful/partial sessions.
    pub async fn get_effective_sources(&self, user_id: &str, topic: &str) -> Vec<String> {
        let similar = self.find_similar_episodes(user_id, topic, 5).await;

        let mut source_scores: HashMap<String, usize> = HashMap::new();
        for episode in similar {
            if episode.outcome.is_useful() {
                for source in episode.sources_used {
                    *source_scores.entry(source).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = source_scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(source, _)| source).collect()
    }

    /// Keywords that worked / failed for similar topics.
    pub async fn get_effective_keywords(
        &self,
        user_id: &str,
        topic: &str,
    ) -> (Vec<String>, Vec<String>) {
        let similar = self.find_similar_episodes(user_id, topic, 5).await;

        let mut effective = Vec::new();
        let mut ineffective = Vec::new();
        for episode in similar {
            for keyword in episode.keywords_effective {
                if !effective.contains(&keyword) {
                    effective.push(keyword);
                }
            }
            for keyword in episode.keywords_ineffective {
                if !ineffective.contains(&keyword) {
                    ineffective.push(keyword);
                }
            }
        }
        (effective, ineffective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn episode(id: &str, user: &str, topic: &str, outcome: SessionOutcome) -> ResearchEpisode {
        ResearchEpisode {
            episode_id: id.into(),
            user_id: user.into(),
            topic: topic.into(),
            original_query: topic.into(),
            refined_query: String::new(),
            papers_found: 10,
            relevant_papers: 5,
            high_relevance_papers: 2,
            clusters_created: 0,
            outcome,
            duration_seconds: 12.0,
            sources_used: vec!["arxiv".into()],
            keywords_effective: vec!["transformers".into()],
            keywords_ineffective: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn similar_episodes_rank_by_overlap() {
        let memory = EpisodicMemory::new(Arc::new(MemoryKv::new()));
        memory
            .save_episode(&episode("e1", "u", "vision transformers", SessionOutcome::Success))
            .await;
        memory
            .save_episode(&episode("e2", "u", "protein folding", SessionOutcome::Success))
            .await;
        memory
            .save_episode(&episode(
                "e3",
                "u",
                "vision transformers detection",
                SessionOutcome::Partial,
            ))
            .await;

        let similar = memory
            .find_similar_episodes("u", "vision transformers for video", 3)
            .await;
        assert_eq!(similar.len(), 2);
        assert!(similar.iter().all(|e| e.topic.contains("vision")));
    }

    #[tokio::test]
    async fn effective_sources_skip_failed_sessions() {
        let memory = EpisodicMemory::new(Arc::new(MemoryKv::new()));
        memory
            .save_episode(&episode("e1", "u", "graph networks", SessionOutcome::Failed))
            .await;
        assert!(memory.get_effective_sources("u", "graph networks").await.is_empty());

        memory
            .save_episode(&episode("e2", "u", "graph networks", SessionOutcome::Success))
            .await;
        assert_eq!(
            memory.get_effective_sources("u", "graph networks").await,
            vec!["arxiv"]
        );
    }

    #[tokio::test]
    async fn per_user_list_is_trimmed() {
        let memory = EpisodicMemory::new(Arc::new(MemoryKv::new()));
        for i in 0..55 {
            memory
                .save_episode(&episode(
                    &format!("e{i}"),
                    "u",
                    "topic",
                    SessionOutcome::Success,
                ))
                .await;
        }
        let episodes = memory.get_user_episodes("u", 100).await;
        assert_eq!(episodes.len(), MAX_EPISODES_PER_USER);
        // Most recent first.
        assert_eq!(episodes[0].episode_id, "e54");
    }
}
