//! Procedural memory: learned per-user preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::store::{get_json, put_json, KvStore};

const PREFERENCES_TTL: Duration = Duration::from_secs(86400 * 90);
const MAX_COMMON_TOPICS: usize = 20;
const MAX_PAPERS_CEILING: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,

    #[serde(default = "default_language")]
    pub preferred_language: String,
    #[serde(default)]
    pub input_languages: Vec<String>,

    #[serde(default = "default_sources")]
    pub preferred_sources: Vec<String>,
    #[serde(default = "default_min_papers")]
    pub min_papers: usize,
    #[serde(default = "default_max_papers")]
    pub max_papers: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,

    #[serde(default = "default_report_style")]
    pub report_style: String,

    #[serde(default)]
    pub skip_clarification: bool,
    #[serde(default)]
    pub auto_approve_simple: bool,

    #[serde(default)]
    pub common_topics: Vec<String>,
    #[serde(default)]
    pub favorite_keywords: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub interaction_count: usize,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_sources() -> Vec<String> {
    vec!["arxiv".to_string()]
}
fn default_min_papers() -> usize {
    10
}
fn default_max_papers() -> usize {
    50
}
fn default_relevance_threshold() -> f64 {
    7.0
}
fn default_report_style() -> String {
    "detailed".to_string()
}

impl UserPreferences {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserPreferences {
            user_id: user_id.into(),
            preferred_language: default_language(),
            input_languages: vec![default_language()],
            preferred_sources: default_sources(),
            min_papers: default_min_papers(),
            max_papers: default_max_papers(),
            relevance_threshold: default_relevance_threshold(),
            report_style: default_report_style(),
            skip_clarification: false,
            auto_approve_simple: false,
            common_topics: Vec::new(),
            favorite_keywords: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            interaction_count: 0,
        }
    }

    /// Learn from one interaction: topic triple, input language, sources,
    /// and a monotonically widening max-papers bound.
    pub fn update_from_behavior(
        &mut self,
        topic: &str,
        language_used: &str,
        sources_used: &[String],
        papers_requested: Option<usize>,
    ) {
        self.interaction_count += 1;
        self.updated_at = Utc::now();

        let topic_key = topic
            .to_lowercase()
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join(" ");
        if !topic_key.is_empty() && !self.common_topics.contains(&topic_key) {
            self.common_topics.push(topic_key);
            if self.common_topics.len() > MAX_COMMON_TOPICS {
                let drop = self.common_topics.len() - MAX_COMMON_TOPICS;
                self.common_topics.drain(..drop);
            }
        }

        if !language_used.is_empty()
            && !self.input_languages.iter().any(|l| l == language_used)
        {
            self.input_languages.push(language_used.to_string());
        }

        for source in sources_used {
            if !self.preferred_sources.contains(source) {
                self.preferred_sources.push(source.clone());
            }
        }

        if let Some(requested) = papers_requested {
            if requested > self.max_papers {
                self.max_papers = requested.min(MAX_PAPERS_CEILING);
            }
        }
    }
}

pub struct PreferencesStore {
    store: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, UserPreferences>>,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        PreferencesStore {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn key(user_id: &str) -> String {
        format!("preferences:{user_id}")
    }

    /// Get preferences, creating defaults for a new user.
    pub async fn get(&self, user_id: &str) -> UserPreferences {
        if let Some(prefs) = self.cache.read().await.get(user_id) {
            return prefs.clone();
        }

        let prefs = get_json::<UserPreferences>(self.store.as_ref(), &Self::key(user_id))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| UserPreferences::new(user_id));

        self.cache
            .write()
            .await
            .insert(user_id.to_string(), prefs.clone());
        prefs
    }

    pub async fn save(&self, prefs: &UserPreferences) {
        self.cache
            .write()
            .await
            .insert(prefs.user_id.clone(), prefs.clone());
        let _ = put_json(
            self.store.as_ref(),
            &Self::key(&prefs.user_id),
            prefs,
            PREFERENCES_TTL,
        )
        .await;
    }

    pub async fn update_from_interaction(
        &self,
        user_id: &str,
        topic: &str,
        language: &str,
        sources: &[String],
        papers_count: Option<usize>,
    ) {
        let mut prefs = self.get(user_id).await;
        prefs.update_from_behavior(topic, language, sources, papers_count);
        self.save(&prefs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    #[test]
    fn behavior_updates_accumulate() {
        let mut prefs = UserPreferences::new("u");
        prefs.update_from_behavior(
            "vision transformers for video",
            "vi",
            &["arxiv".into(), "openalex".into()],
            Some(80),
        );
        assert_eq!(prefs.interaction_count, 1);
        assert_eq!(prefs.common_topics, vec!["vision transformers for"]);
        assert!(prefs.input_languages.contains(&"vi".to_string()));
        assert!(prefs.preferred_sources.contains(&"openalex".to_string()));
        assert_eq!(prefs.max_papers, 80);

        // max_papers only widens, capped at 100
        prefs.update_from_behavior("t", "en", &[], Some(20));
        assert_eq!(prefs.max_papers, 80);
        prefs.update_from_behavior("t", "en", &[], Some(500));
        assert_eq!(prefs.max_papers, 100);
    }

    #[test]
    fn common_topics_roll_over() {
        let mut prefs = UserPreferences::new("u");
        for i in 0..25 {
            prefs.update_from_behavior(&format!("topic number {i}"), "en", &[], None);
        }
        assert_eq!(prefs.common_topics.len(), MAX_COMMON_TOPICS);
        assert!(prefs.common_topics.contains(&"topic number 24".to_string()));
        assert!(!prefs.common_topics.contains(&"topic number 0".to_string()));
    }

    #[tokio::test]
    async fn store_roundtrip_and_cache() {
        let store = PreferencesStore::new(Arc::new(MemoryKv::new()));
        let mut prefs = store.get("u").await;
        assert_eq!(prefs.interaction_count, 0);

        prefs.skip_clarification = true;
        store.save(&prefs).await;

        let loaded = store.get("u").await;
        assert!(loaded.skip_clarification);
    }
}
