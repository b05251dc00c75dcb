//! Caller-partitioned cache (ScopedModelCache, component C11), grounded on
//! `knhk-workflow-engine`'s `cache.rs` (`DashMap`-backed `ReflexCache`),
//! generalized to key by caller so distinct tenants can never observe
//! each other's cached values.

pub mod resilient_factory;

use std::sync::Arc;

use dashmap::DashMap;

use crate::context::CallerContext;
use resilient_factory::ResilientFactory;

/// A cache key scoped to a caller, a logical key, and an optional variant
/// (e.g. model name or prompt version) so the same logical key can hold
/// distinct values per variant without caller-level cross-talk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    caller_id: String,
    logical_key: String,
    variant: Option<String>,
}

impl CacheKey {
    pub fn new(caller_id: impl Into<String>, logical_key: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            logical_key: logical_key.into(),
            variant: None,
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    fn as_wire_string(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}:{}:{}", self.caller_id, self.logical_key, variant),
            None => format!("{}:{}", self.caller_id, self.logical_key),
        }
    }
}

/// A concurrent cache of arbitrary values, partitioned by `CacheKey` so
/// that no lookup by one caller can ever resolve to a value inserted by a
/// different caller, even if their logical keys collide.
#[derive(Clone)]
pub struct ScopedCache<V> {
    entries: Arc<DashMap<String, V>>,
}

impl<V> Default for ScopedCache<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<V: Clone> ScopedCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.entries.get(&key.as_wire_string()).map(|v| v.clone())
    }

    pub fn insert(&self, key: &CacheKey, value: V) {
        self.entries.insert(key.as_wire_string(), value);
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.remove(&key.as_wire_string());
    }

    /// Remove every entry belonging to `caller_id`. Used when a tenant's
    /// session ends or its cached state must be invalidated in bulk.
    pub fn clear_caller(&self, caller_id: &str) {
        let prefix = format!("{caller_id}:");
        self.entries.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a manager bound to `context`, fronting this cache's storage
    /// and `factory`. This is the `create_manager(context)` factory
    /// function component C11 requires: every manager it returns shares
    /// the same underlying `DashMap` but can only ever read or write
    /// entries keyed under its own bound `caller_id`, so two managers
    /// built from the same cache never cross-contaminate each other's
    /// entries (I5).
    pub fn create_manager(
        &self,
        context: CallerContext,
        factory: Arc<ResilientFactory>,
    ) -> CacheManager<V> {
        CacheManager {
            context,
            cache: self.clone(),
            factory,
        }
    }
}

/// A per-caller cache manager bound to a single [`CallerContext`] for its
/// entire lifetime. Unlike [`ScopedCache`], whose `get`/`insert` take a
/// caller-supplied [`CacheKey`], every operation here derives the key's
/// `caller_id` from the bound context itself — a manager built for one
/// caller has no way to name another caller's entries, so the isolation
/// guarantee (I5) holds even if calling code constructs a `logical_key`
/// an attacker controls.
///
/// Obtained via [`ScopedCache::create_manager`]; never constructed
/// directly, mirroring the Python original's per-request
/// `create_manager(context)` factory function.
pub struct CacheManager<V> {
    context: CallerContext,
    cache: ScopedCache<V>,
    factory: Arc<ResilientFactory>,
}

impl<V: Clone> CacheManager<V> {
    pub fn caller_id(&self) -> &str {
        self.context.caller_id()
    }

    pub fn context(&self) -> &CallerContext {
        &self.context
    }

    fn key(&self, logical_key: &str) -> CacheKey {
        CacheKey::new(self.context.caller_id(), logical_key)
    }

    pub fn get(&self, logical_key: &str) -> Option<V> {
        self.cache.get(&self.key(logical_key))
    }

    pub fn has(&self, logical_key: &str) -> bool {
        self.get(logical_key).is_some()
    }

    pub fn put(&self, logical_key: &str, value: V) {
        self.cache.insert(&self.key(logical_key), value);
    }

    pub fn remove(&self, logical_key: &str) {
        self.cache.remove(&self.key(logical_key));
    }

    /// The resilient factory this manager fronts, for wrapping the
    /// actual model call with the degrading-mode fallback behavior of
    /// component C11.
    pub fn factory(&self) -> &ResilientFactory {
        &self.factory
    }
}
