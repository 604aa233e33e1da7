use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{KvStore, Result};

enum Entry {
    Value(String),
    List(VecDeque<String>),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process KV store with TTL bookkeeping.
///
/// Expired slots are dropped lazily on access and swept on writes. A single
/// RwLock serializes mutations, which makes list push/trim atomic.
#[derive(Default)]
pub struct MemoryKv {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        MemoryKv::default()
    }

    /// Number of live keys. Test and status-display helper.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.read().await;
        slots.values().filter(|slot| !slot.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        slots.retain(|_, slot| !slot.is_expired(now));
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.sweep().await;
        let mut slots = self.slots.write().await;
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Value(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        let value = slots.get(key).and_then(|slot| {
            if slot.is_expired(now) {
                return None;
            }
            match &slot.entry {
                Entry::Value(value) => Some(value.clone()),
                Entry::List(_) => None,
            }
        });
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut slots = self.slots.write().await;
        slots.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: String) -> Result<()> {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        let slot = slots
            .entry(key.to_string())
            .and_modify(|slot| {
                if slot.is_expired(now) {
                    slot.entry = Entry::List(VecDeque::new());
                    slot.expires_at = None;
                }
            })
            .or_insert_with(|| Slot {
                entry: Entry::List(VecDeque::new()),
                expires_at: None,
            });
        match &mut slot.entry {
            Entry::List(list) => list.push_front(value),
            Entry::Value(_) => {
                slot.entry = Entry::List(VecDeque::from([value]));
            }
        }
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: usize, stop: usize) -> Result<()> {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            if let Entry::List(list) = &mut slot.entry {
                let kept: VecDeque<String> = list
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i >= start && *i <= stop)
                    .map(|(_, v)| v.clone())
                    .collect();
                *list = kept;
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        let values = slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| match &slot.entry {
                Entry::List(list) => list
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i >= start && *i <= stop)
                    .map(|(_, v)| v.clone())
                    .collect(),
                Entry::Value(_) => Vec::new(),
            })
            .unwrap_or_default();
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        let keys = slots
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && !slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        kv.del("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_value_is_gone() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn list_push_trim_range() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            kv.lpush("list", format!("e{i}")).await.unwrap();
        }
        // Most recent first.
        let all = kv.lrange("list", 0, 9).await.unwrap();
        assert_eq!(all.first().map(String::as_str), Some("e4"));

        kv.ltrim("list", 0, 2).await.unwrap();
        let kept = kv.lrange("list", 0, 9).await.unwrap();
        assert_eq!(kept, vec!["e4", "e3", "e2"]);
    }

    #[tokio::test]
    async fn scan_matches_prefix_only() {
        let kv = MemoryKv::new();
        kv.set_ex("conversation:1", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_ex("episode:1", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        let keys = kv.scan_prefix("conversation:").await.unwrap();
        assert_eq!(keys, vec!["conversation:1"]);
    }
}
