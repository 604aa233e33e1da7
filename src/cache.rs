//! TTL'd memoization over tool outputs and PDF bodies.
//!
//! Keys encode the tool name and an MD5 of the canonical (sorted-key) JSON
//! arguments, so concurrent writes for the same call are idempotent.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::PageInfo;
use crate::store::KvStore;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const PDF_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Per-tool TTLs; anything unlisted gets the default hour.
fn ttl_for(tool: &str) -> Duration {
    match tool {
        "search" => Duration::from_secs(3600),
        "hf_trending" => Duration::from_secs(1800),
        "collect_url" | "collect_urls" => Duration::from_secs(86400),
        _ => DEFAULT_TTL,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Cached PDF text with its page map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPdfPages {
    pub full_text: String,
    pub page_infos: Vec<PageInfo>,
    pub pdf_hash: String,
}

pub struct ToolCache {
    store: Arc<dyn KvStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ToolCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        ToolCache {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn cache_key(tool: &str, args: &Value) -> String {
        // Sort object keys so logically-equal argument maps share a key.
        let canonical = match args {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, &Value> = map.iter().collect();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
            other => other.to_string(),
        };
        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        format!("tool_cache:{}:{}", tool, hex::encode(hasher.finalize()))
    }

    pub async fn get(&self, tool: &str, args: &Value) -> Option<Value> {
        let key = Self::cache_key(tool, args);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(tool, "cache hit");
                    Some(value)
                }
                Err(error) => {
                    warn!(tool, %error, "cache entry undecodable");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(tool, "cache miss");
                None
            }
            Err(error) => {
                warn!(tool, %error, "cache read failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, tool: &str, args: &Value, result: &Value) {
        let key = Self::cache_key(tool, args);
        let serialized = match serde_json::to_string(result) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(tool, %error, "cache serialization failed");
                return;
            }
        };
        if let Err(error) = self.store.set_ex(&key, serialized, ttl_for(tool)).await {
            warn!(tool, %error, "cache write failed");
        }
    }

    pub async fn invalidate(&self, tool: &str, args: &Value) {
        let key = Self::cache_key(tool, args);
        let _ = self.store.del(&key).await;
    }

    pub async fn clear_all(&self) -> usize {
        let keys = self
            .store
            .scan_prefix("tool_cache:")
            .await
            .unwrap_or_default();
        for key in &keys {
            let _ = self.store.del(key).await;
        }
        keys.len()
    }

    // --- PDF caches ---

    pub async fn get_pdf_text(&self, pdf_url: &str) -> Option<String> {
        self.store
            .get(&format!("pdf_cache:{pdf_url}"))
            .await
            .ok()
            .flatten()
    }

    pub async fn set_pdf_text(&self, pdf_url: &str, text: &str) {
        let _ = self
            .store
            .set_ex(&format!("pdf_cache:{pdf_url}"), text.to_string(), PDF_TTL)
            .await;
    }

    pub async fn get_pdf_pages(&self, pdf_url: &str) -> Option<CachedPdfPages> {
        let raw = self
            .store
            .get(&format!("pdf_pages_cache:{pdf_url}"))
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_pdf_pages(&self, pdf_url: &str, pages: &CachedPdfPages) {
        if let Ok(serialized) = serde_json::to_string(pages) {
            let _ = self
                .store
                .set_ex(&format!("pdf_pages_cache:{pdf_url}"), serialized, PDF_TTL)
                .await;
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    pub fn reset_metrics(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use serde_json::json;

    fn cache() -> ToolCache {
        ToolCache::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn key_is_insensitive_to_argument_order() {
        let a = ToolCache::cache_key("search", &json!({"query": "x", "max_results": 20}));
        let b = ToolCache::cache_key("search", &json!({"max_results": 20, "query": "x"}));
        assert_eq!(a, b);
        assert!(a.starts_with("tool_cache:search:"));
    }

    #[tokio::test]
    async fn miss_then_hit_updates_metrics() {
        let cache = cache();
        let args = json!({"query": "bert"});

        assert!(cache.get("search", &args).await.is_none());
        cache.set("search", &args, &json!([{"title": "BERT"}])).await;
        let value = cache.get("search", &args).await.unwrap();
        assert_eq!(value[0]["title"], "BERT");

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert!((metrics.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn pdf_pages_roundtrip() {
        let cache = cache();
        let pages = CachedPdfPages {
            full_text: "page one text".into(),
            page_infos: vec![PageInfo {
                page: 1,
                section: None,
                char_start: 0,
                char_end: 13,
            }],
            pdf_hash: "abc".into(),
        };
        cache.set_pdf_pages("https://arxiv.org/pdf/1.pdf", &pages).await;
        let loaded = cache.get_pdf_pages("https://arxiv.org/pdf/1.pdf").await.unwrap();
        assert_eq!(loaded.full_text, "page one text");
        assert_eq!(loaded.page_infos.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_removes_tool_entries() {
        let cache = cache();
        cache.set("search", &json!({"q": 1}), &json!([])).await;
        cache.set("hf_trending", &json!({}), &json!([])).await;
        assert_eq!(cache.clear_all().await, 2);
        cache.reset_metrics();
        assert!(cache.get("search", &json!({"q": 1})).await.is_none());
    }
}
