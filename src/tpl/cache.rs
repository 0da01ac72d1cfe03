use crate::error::TemplateError;
use crate::tpl::ast::Block;
use crate::tpl::inherit::Dependency;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// 已完成继承解析与 mixin 展开的模板
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub path: String,
    pub ast: Block,
    pub dependencies: Vec<Dependency>,
}

/// Result of one load attempt, as handed to the cache.
pub(crate) struct Loaded {
    pub result: Result<Arc<Template>, TemplateError>,
    pub dependencies: Vec<Dependency>,
}

struct CacheEntry {
    result: Result<Arc<Template>, TemplateError>,
    dependencies: Vec<Dependency>,
    loaded_at: Instant,
    last_used: AtomicU64,
    weight: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// 缓存中所有语法树的节点总数
    pub weight: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// 每个引擎实例独有的模板缓存
///
/// Entries expire after `ttl` (zero disables expiry) or when the caller's
/// freshness check rejects their dependency list. When more than `capacity`
/// entries are held the least recently used one is evicted; a capacity of
/// zero disables caching. Loads are single-flight per key: concurrent
/// misses for the same key wait on a per-key lock and then find the entry
/// the first caller stored.
pub(crate) struct TemplateCache {
    entries: DashMap<String, CacheEntry>,
    loading: DashMap<String, Arc<Mutex<()>>>,
    capacity: usize,
    ttl: Duration,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            loading: DashMap::new(),
            capacity,
            ttl,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup<C>(&self, key: &str, is_fresh: &C) -> Option<Result<Arc<Template>, TemplateError>>
    where
        C: Fn(&[Dependency]) -> bool,
    {
        let (result, dependencies, loaded_at) = {
            let entry = self.entries.get(key)?;
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            (
                entry.result.clone(),
                entry.dependencies.clone(),
                entry.loaded_at,
            )
        };
        if !self.ttl.is_zero() && loaded_at.elapsed() >= self.ttl {
            tracing::debug!("template cache: {} expired", key);
            return None;
        }
        if !is_fresh(&dependencies) {
            tracing::debug!("template cache: {} changed on disk", key);
            return None;
        }
        Some(result)
    }

    pub fn get_or_load<C, F>(
        &self,
        key: &str,
        is_fresh: C,
        load: F,
    ) -> Result<Arc<Template>, TemplateError>
    where
        C: Fn(&[Dependency]) -> bool,
        F: FnOnce() -> Loaded,
    {
        if self.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return load().result;
        }
        if let Some(result) = self.lookup(key, &is_fresh) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("template cache hit: {}", key);
            return result;
        }

        let lock = self.loading.entry(key.to_string()).or_default().clone();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // 等锁期间可能已被其他线程加载
        if let Some(result) = self.lookup(key, &is_fresh) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return result;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("template cache miss: {}", key);
        let loaded = load();
        let weight = match &loaded.result {
            Ok(template) => template.ast.weight(),
            Err(_) => 1,
        };
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                result: loaded.result.clone(),
                dependencies: loaded.dependencies,
                loaded_at: Instant::now(),
                last_used: AtomicU64::new(self.tick()),
                weight,
            },
        );
        self.evict();
        loaded.result
    }

    fn evict(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().last_used.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            let Some(key) = oldest else {
                break;
            };
            if self.entries.remove(&key).is_some() {
                self.loading.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("template cache evicted: {}", key);
            }
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.loading.remove(key);
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.loading.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            weight: self.entries.iter().map(|e| e.value().weight).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
