use crate::dispatch::controller::Controller;
use dashmap::DashMap;
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

type ControllerRef = Arc<dyn Controller + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub registered: u64,
    pub cached_entries: u64,
}

/// Maps an event namespace (`foo-bar`) to a registered controller.
///
/// Controllers are registered under Pascal-case names, optionally with
/// folder segments (`Chat/MessageController`). Resolution tries the direct
/// kebab-to-Pascal name first, then every folder split of a multi-part
/// prefix; the user namespace always shadows the library default
/// namespace. Results, including negative ones, are cached per prefix.
pub struct HandlerResolver {
    user_namespace: DashMap<String, ControllerRef, ahash::RandomState>,
    default_namespace: DashMap<String, ControllerRef, ahash::RandomState>,
    cache: Cache<String, Option<ControllerRef>>,
    /// Hot-reload mode turns the cache off entirely.
    caching_enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HandlerResolver {
    pub fn new() -> Self {
        Self {
            user_namespace: DashMap::with_hasher(ahash::RandomState::new()),
            default_namespace: DashMap::with_hasher(ahash::RandomState::new()),
            cache: Cache::builder().max_capacity(10_000).build(),
            caching_enabled: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn register(&self, name: &str, controller: ControllerRef) {
        self.user_namespace.insert(name.to_string(), controller);
        // Registrations shift what a prefix can resolve to, including
        // previously negative lookups.
        self.cache.invalidate_all();
    }

    pub fn register_default(&self, name: &str, controller: ControllerRef) {
        self.default_namespace.insert(name.to_string(), controller);
        self.cache.invalidate_all();
    }

    pub fn set_caching_enabled(&self, enabled: bool) {
        self.caching_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.cache.invalidate_all();
        }
    }

    pub fn resolve(&self, event_prefix: &str) -> Option<ControllerRef> {
        if self.caching_enabled.load(Ordering::SeqCst)
            && let Some(cached) = self.cache.get(event_prefix)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = self.lookup(event_prefix);

        if self.caching_enabled.load(Ordering::SeqCst) {
            self.cache
                .insert(event_prefix.to_string(), resolved.clone());
        }

        resolved
    }

    fn lookup(&self, event_prefix: &str) -> Option<ControllerRef> {
        for candidate in Self::candidates(event_prefix) {
            if let Some(controller) = self.user_namespace.get(&candidate) {
                debug!("Resolved `{}` to `{}`", event_prefix, candidate);
                return Some(controller.value().clone());
            }
            if let Some(controller) = self.default_namespace.get(&candidate) {
                debug!("Resolved `{}` to default `{}`", event_prefix, candidate);
                return Some(controller.value().clone());
            }
        }
        None
    }

    /// Candidate controller names for a prefix, in resolution order:
    /// the direct name, then every folder split (`a-b-c` tries
    /// `ABCController`, `A/BCController`, `A/B/CController`,
    /// `AB/CController`).
    pub fn candidates(event_prefix: &str) -> Vec<String> {
        let segments: Vec<&str> = event_prefix.split('-').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Vec::new();
        }

        Self::group_partitions(&segments)
            .into_iter()
            .map(|groups| format!("{}Controller", groups.join("/")))
            .collect()
    }

    /// All orderings of segment groups, the whole-prefix group first, then
    /// splits by ascending head length.
    fn group_partitions(segments: &[&str]) -> Vec<Vec<String>> {
        let mut out = vec![vec![Self::pascal(segments)]];
        for split in 1..segments.len() {
            let head = Self::pascal(&segments[..split]);
            for mut tail in Self::group_partitions(&segments[split..]) {
                let mut groups = Vec::with_capacity(tail.len() + 1);
                groups.push(head.clone());
                groups.append(&mut tail);
                out.push(groups);
            }
        }
        out
    }

    fn pascal(segments: &[&str]) -> String {
        let mut result = String::new();
        for segment in segments {
            let mut chars = segment.chars();
            if let Some(first) = chars.next() {
                result.extend(first.to_uppercase());
                result.push_str(chars.as_str());
            }
        }
        result
    }

    /// Warms the cache with the direct reverse mapping of every registered
    /// controller name.
    pub fn preload(&self) {
        if !self.caching_enabled.load(Ordering::SeqCst) {
            return;
        }
        let names: Vec<String> = self
            .user_namespace
            .iter()
            .map(|e| e.key().clone())
            .chain(self.default_namespace.iter().map(|e| e.key().clone()))
            .collect();
        for name in names {
            let prefix = Self::name_to_prefix(&name);
            if !prefix.is_empty() {
                let resolved = self.lookup(&prefix);
                self.cache.insert(prefix, resolved);
            }
        }
    }

    /// `Chat/MessageController` -> `chat-message`.
    fn name_to_prefix(name: &str) -> String {
        let name = name.strip_suffix("Controller").unwrap_or(name);
        let mut prefix = String::new();
        for ch in name.chars() {
            if ch == '/' {
                if !prefix.ends_with('-') && !prefix.is_empty() {
                    prefix.push('-');
                }
            } else if ch.is_uppercase() {
                if !prefix.is_empty() && !prefix.ends_with('-') {
                    prefix.push('-');
                }
                prefix.extend(ch.to_lowercase());
            } else {
                prefix.push(ch);
            }
        }
        prefix
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ResolverStats {
        self.cache.run_pending_tasks();
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            registered: (self.user_namespace.len() + self.default_namespace.len()) as u64,
            cached_entries: self.cache.entry_count(),
        }
    }
}

impl Default for HandlerResolver {
    fn default() -> Self {
        Self::new()
    }
}
