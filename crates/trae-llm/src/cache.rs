//! Response cache for model calls
//!
//! A bounded map from a content hash of the request to the model's reply.
//! Entries expire after a TTL and are removed lazily on lookup or by a
//! periodic sweep. When full, the entry inserted first is evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::gateway::{ModelGateway, ModelSettings};
use crate::message::{Message, ToolDefinition};
use crate::metrics::{MetricsSink, NoopMetrics};

/// Cache sizing and expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

#[derive(Debug)]
struct CacheEntry {
    message: Message,
    created_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
    hit_count: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    messages: &'a [Message],
    tools: &'a [ToolDefinition],
    model: &'a str,
    provider: &'a str,
}

/// SHA-256 hex digest of the canonical JSON of a request.
///
/// Object keys serialize in sorted order, so equal requests always hash
/// equally; message and tool order is significant.
pub fn cache_key(
    messages: &[Message],
    tools: &[ToolDefinition],
    model: &str,
    provider: &str,
) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&KeyMaterial {
        messages,
        tools,
        model,
        provider,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Thread-safe, bounded, expiring memo of model replies
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    stop: CancellationToken,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            stop: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry. Expired entries are removed and count as both
    /// a miss and an eviction.
    pub fn get(&self, key: &str) -> Option<Message> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    entry.hit_count.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.message.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have refreshed the key between the two locks
        if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace an entry, evicting the oldest one when full
    pub fn set(&self, key: impl Into<String>, message: Message) {
        if self.config.max_size == 0 {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                message,
                created_at: now,
                expires_at: now.checked_add(self.config.ttl),
                hit_count: AtomicU64::new(0),
            },
        );
    }

    /// Remove an entry, returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every entry and reset the statistics
    pub fn clear(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of lookups served by `key` so far
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries
            .read()
            .get(key)
            .map(|e| e.hit_count.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.config.max_size,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// The task ends on [`stop`](Self::stop) or once the cache is dropped.
    /// Returns `None` when the cleanup interval is zero.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.config.cleanup_interval;
        if interval.is_zero() {
            return None;
        }

        let weak = Arc::downgrade(self);
        let stop = self.stop.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = weak.upgrade() else { break };
                        let removed = cache.cleanup();
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries");
                        }
                    }
                }
            }
        }))
    }

    /// Stop the background sweep
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Gateway decorator serving repeated requests from a [`ResponseCache`].
///
/// Only successful replies are stored.
pub struct CachedGateway<G> {
    inner: G,
    cache: Arc<ResponseCache>,
    metrics: Arc<dyn MetricsSink>,
}

impl<G: ModelGateway> CachedGateway<G> {
    pub fn new(inner: G, cache: Arc<ResponseCache>) -> Self {
        Self {
            inner,
            cache,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl<G: ModelGateway> ModelGateway for CachedGateway<G> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn supports_tool_calling(&self) -> bool {
        self.inner.supports_tool_calling()
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        let key = match cache_key(messages, tools, settings.model(), self.inner.provider()) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Failed to compute cache key, bypassing cache");
                return self.inner.chat(messages, tools, settings, cancel).await;
            }
        };

        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %&key[..12], "Response cache hit");
            self.metrics.increment("cache.hits", 1);
            return Ok(hit);
        }
        self.metrics.increment("cache.misses", 1);

        let reply = self.inner.chat(messages, tools, settings, cancel).await?;
        self.cache.set(key, reply.clone());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::error::{ModelError, ModelErrorKind};
    use crate::gateway::testing::ScriptedGateway;
    use serde_json::json;

    fn small(max_size: usize, ttl: Duration) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_size,
            ttl,
            cleanup_interval: Duration::from_millis(10),
        })
    }

    fn conversation(text: &str) -> Vec<Message> {
        vec![Message::system("sys"), Message::user(text)]
    }

    #[test]
    fn test_key_equal_for_equal_requests() {
        let tools = vec![ToolDefinition::new("bash", "run", json!({"type": "object"}))];
        let a = cache_key(&conversation("hi"), &tools, "gpt-4o", "openai").unwrap();
        let b = cache_key(&conversation("hi"), &tools, "gpt-4o", "openai").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_key_differs_on_any_component() {
        let base = cache_key(&conversation("hi"), &[], "gpt-4o", "openai").unwrap();
        assert_ne!(base, cache_key(&conversation("hi!"), &[], "gpt-4o", "openai").unwrap());
        assert_ne!(base, cache_key(&conversation("hi"), &[], "gpt-4o-mini", "openai").unwrap());
        assert_ne!(base, cache_key(&conversation("hi"), &[], "gpt-4o", "doubao").unwrap());

        let mut reordered = conversation("hi");
        reordered.reverse();
        assert_ne!(base, cache_key(&reordered, &[], "gpt-4o", "openai").unwrap());
    }

    #[test]
    fn test_set_then_get_counts_hit() {
        let cache = small(10, Duration::from_secs(60));
        cache.set("k", Message::assistant("v"));

        assert_eq!(cache.get("k").unwrap().content, "v");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 1.0);
        assert_eq!(cache.hit_count("k"), Some(1));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let cache = small(10, Duration::from_secs(i64::MAX as u64));
        cache.set("k", Message::assistant("v"));

        assert_eq!(cache.get("k").unwrap().content, "v");
        assert_eq!(cache.cleanup(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_absent_key_counts_miss() {
        let cache = small(10, Duration::from_secs(60));
        assert!(cache.get("nope").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = small(3, Duration::from_secs(60));
        for i in 0..4 {
            cache.set(format!("k{i}"), Message::assistant(i.to_string()));
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn test_reset_existing_key_does_not_evict() {
        let cache = small(2, Duration::from_secs(60));
        cache.set("a", Message::assistant("1"));
        cache.set("b", Message::assistant("2"));
        cache.set("a", Message::assistant("3"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a").unwrap().content, "3");
    }

    #[test]
    fn test_expired_entry_is_miss_and_eviction() {
        let cache = small(10, Duration::from_millis(30));
        cache.set("k", Message::assistant("v"));
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(60));

        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_delete_clear_and_cleanup() {
        let cache = small(10, Duration::from_millis(20));
        cache.set("a", Message::assistant("1"));
        cache.set("b", Message::assistant("2"));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.cleanup(), 1);
        assert!(cache.is_empty());

        cache.get("x");
        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.evictions), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Arc::new(small(10, Duration::from_millis(5)));
        cache.set("k", Message::assistant("v"));
        let handle = cache.spawn_sweeper().unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len(), 0);

        cache.stop();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cached_gateway_replays_without_second_call() {
        let inner = Arc::new(ScriptedGateway::new(vec![
            Ok(Message::assistant("first")),
            Ok(Message::assistant("second")),
        ]));
        let gateway = CachedGateway::new(inner.clone(), Arc::new(ResponseCache::new(CacheConfig::default())));
        let settings = ModelConfig::default();
        let cancel = CancellationToken::new();
        let messages = conversation("hello");

        let a = gateway.chat(&messages, &[], &settings, &cancel).await.unwrap();
        let b = gateway.chat(&messages, &[], &settings, &cancel).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(b.content, "first");
        assert_eq!(inner.calls(), 1);
        assert_eq!(gateway.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_cached_gateway_does_not_store_errors() {
        let inner = Arc::new(ScriptedGateway::new(vec![
            Err(ModelError::new(ModelErrorKind::RateLimited, "busy").into()),
            Ok(Message::assistant("ok")),
        ]));
        let gateway = CachedGateway::new(inner.clone(), Arc::new(ResponseCache::new(CacheConfig::default())));
        let settings = ModelConfig::default();
        let cancel = CancellationToken::new();
        let messages = conversation("hello");

        assert!(gateway.chat(&messages, &[], &settings, &cancel).await.is_err());
        assert!(gateway.cache().is_empty());
        assert_eq!(gateway.chat(&messages, &[], &settings, &cancel).await.unwrap().content, "ok");
        assert_eq!(inner.calls(), 2);
    }
}
