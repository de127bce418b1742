// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Semantic response cache.
//!
//! Entries are keyed by the model a client asked for plus a prompt
//! embedding; lookup is a cosine scan over completed entries of that model.
//! An entry is created in `Pending` state when the request goes upstream and
//! promoted to `Complete` when the response body arrives, so a slot is
//! reserved (and counted against capacity) for the whole round trip.
//!
//! Embeddings are computed strictly outside the index lock; model inference
//! can take hundreds of milliseconds and must not serialize unrelated
//! streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::embedding::{cosine, Embedder};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no pending cache entry with id {0}")]
    NotFound(u64),
    #[error("semantic cache is disabled")]
    Disabled,
}

#[derive(Debug, Clone)]
pub struct SemanticCacheOptions {
    pub enabled: bool,
    pub similarity_threshold: f32,
    /// Bound on total entries in either state; 0 disables the bound.
    pub max_entries: usize,
    /// `None` disables expiry.
    pub ttl: Option<Duration>,
}

impl Default for SemanticCacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: 0.9,
            max_entries: 0,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Complete,
}

struct CacheEntry {
    model: String,
    query: String,
    embedding: Vec<f32>,
    /// Verbatim originating request, kept for debugging and future warm-up.
    #[allow(dead_code)]
    request_body: Vec<u8>,
    response_body: Option<Vec<u8>>,
    created_at: Instant,
    state: EntryState,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.created_at) > ttl)
    }
}

pub struct SemanticCache {
    options: SemanticCacheOptions,
    embedder: Arc<dyn Embedder>,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, CacheEntry>>,
}

impl SemanticCache {
    pub fn new(options: SemanticCacheOptions, embedder: Arc<dyn Embedder>) -> Self {
        if options.enabled {
            tracing::info!(
                threshold = options.similarity_threshold,
                max_entries = options.max_entries,
                ttl = ?options.ttl,
                "semantic cache enabled"
            );
        } else {
            tracing::info!("semantic cache disabled");
        }
        Self {
            options,
            embedder,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Total entries in either state.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a completed response for `query` under `model`. Returns
    /// `Ok(None)` when disabled, the query is empty, or nothing clears the
    /// similarity threshold. Ties go to the most recently created entry.
    pub fn find_similar(&self, model: &str, query: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if !self.options.enabled || query.is_empty() {
            return Ok(None);
        }

        // Embed before taking the lock; inference may block.
        let query_embedding = self.embedder.embed(query)?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune_expired(&mut entries, self.options.ttl, now);

        let mut best: Option<&CacheEntry> = None;
        let mut best_score = f32::MIN;
        for entry in entries.values() {
            if entry.state != EntryState::Complete || entry.model != model {
                continue;
            }
            let score = cosine(&query_embedding, &entry.embedding);
            let better = match best {
                None => true,
                Some(current) => {
                    score > best_score
                        || (score == best_score && entry.created_at > current.created_at)
                }
            };
            if better {
                best = Some(entry);
                best_score = score;
            }
        }

        match best {
            Some(entry) if best_score >= self.options.similarity_threshold => {
                tracing::debug!(model, score = best_score, query = %entry.query, "cache hit");
                Ok(entry.response_body.clone())
            }
            _ => Ok(None),
        }
    }

    /// Reserve a pending slot for an in-flight request and return its id.
    /// Enforces the capacity bound by evicting expired entries first, then
    /// the oldest completed entries; pending slots go only as a last resort.
    pub fn add_pending(
        &self,
        model: &str,
        query: &str,
        request_body: Vec<u8>,
    ) -> anyhow::Result<u64> {
        if !self.options.enabled {
            return Err(CacheError::Disabled.into());
        }

        let embedding = self.embedder.embed(query)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune_expired(&mut entries, self.options.ttl, now);

        if self.options.max_entries > 0 {
            while entries.len() + 1 > self.options.max_entries {
                if !Self::evict_one(&mut entries) {
                    break;
                }
            }
        }

        entries.insert(
            id,
            CacheEntry {
                model: model.to_string(),
                query: query.to_string(),
                embedding,
                request_body,
                response_body: None,
                created_at: now,
                state: EntryState::Pending,
            },
        );
        Ok(id)
    }

    /// Promote the pending entry `id` with the upstream response. The entry
    /// keeps its original `created_at`; it ages from the moment of the
    /// originating request.
    pub fn update_with_response(&self, id: u64, response_body: Vec<u8>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&id)
            .filter(|e| e.state == EntryState::Pending)
            .ok_or(CacheError::NotFound(id))?;
        entry.response_body = Some(response_body);
        entry.state = EntryState::Complete;
        Ok(())
    }

    fn prune_expired(entries: &mut HashMap<u64, CacheEntry>, ttl: Option<Duration>, now: Instant) {
        if ttl.is_some() {
            entries.retain(|_, entry| !entry.is_expired(ttl, now));
        }
    }

    /// Evict a single entry: the oldest completed one, or failing that the
    /// oldest pending one. Returns false when the index is empty.
    fn evict_one(entries: &mut HashMap<u64, CacheEntry>) -> bool {
        let victim = entries
            .iter()
            .filter(|(_, e)| e.state == EntryState::Complete)
            .min_by_key(|(_, e)| e.created_at)
            .or_else(|| entries.iter().min_by_key(|(_, e)| e.created_at))
            .map(|(id, _)| *id);
        match victim {
            Some(id) => {
                entries.remove(&id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockEmbedder;

    fn cache(options: SemanticCacheOptions) -> SemanticCache {
        SemanticCache::new(options, Arc::new(MockEmbedder::new()))
    }

    fn enabled_options() -> SemanticCacheOptions {
        SemanticCacheOptions {
            enabled: true,
            similarity_threshold: 0.9,
            max_entries: 0,
            ttl: None,
        }
    }

    fn insert_complete(cache: &SemanticCache, model: &str, query: &str, response: &[u8]) -> u64 {
        let id = cache.add_pending(model, query, b"req".to_vec()).unwrap();
        cache.update_with_response(id, response.to_vec()).unwrap();
        id
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = cache(SemanticCacheOptions::default());
        assert!(cache.find_similar("m", "query").unwrap().is_none());
        assert!(cache.add_pending("m", "query", vec![]).is_err());
    }

    #[test]
    fn empty_query_is_a_miss() {
        let cache = cache(enabled_options());
        insert_complete(&cache, "m", "something", b"resp");
        assert!(cache.find_similar("m", "").unwrap().is_none());
    }

    #[test]
    fn pending_then_complete_then_hit() {
        let cache = cache(enabled_options());
        let id = cache
            .add_pending("m", "what is rust", b"req".to_vec())
            .unwrap();

        // A pending entry never matches.
        assert!(cache.find_similar("m", "what is rust").unwrap().is_none());

        cache.update_with_response(id, b"a language".to_vec()).unwrap();
        assert_eq!(
            cache.find_similar("m", "what is rust").unwrap().unwrap(),
            b"a language"
        );
    }

    #[test]
    fn lookups_are_partitioned_by_model() {
        let cache = cache(enabled_options());
        insert_complete(&cache, "model-a", "the question", b"answer-a");
        assert!(cache
            .find_similar("model-b", "the question")
            .unwrap()
            .is_none());
        assert_eq!(
            cache.find_similar("model-a", "the question").unwrap().unwrap(),
            b"answer-a"
        );
    }

    #[test]
    fn below_threshold_is_a_miss() {
        let cache = cache(enabled_options());
        insert_complete(&cache, "m", "completely different words here", b"resp");
        assert!(cache
            .find_similar("m", "unrelated query about cooking")
            .unwrap()
            .is_none());
    }

    #[test]
    fn ties_go_to_the_most_recently_created_entry() {
        let cache = cache(enabled_options());
        insert_complete(&cache, "m", "same exact query", b"older");
        std::thread::sleep(Duration::from_millis(2));
        insert_complete(&cache, "m", "same exact query", b"newer");
        assert_eq!(
            cache.find_similar("m", "same exact query").unwrap().unwrap(),
            b"newer"
        );
    }

    #[test]
    fn update_of_unknown_or_completed_entry_fails() {
        let cache = cache(enabled_options());
        assert!(matches!(
            cache.update_with_response(999, vec![]),
            Err(CacheError::NotFound(999))
        ));

        let id = insert_complete(&cache, "m", "q", b"resp");
        assert!(matches!(
            cache.update_with_response(id, b"again".to_vec()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn capacity_evicts_oldest_completed_entries_first() {
        let options = SemanticCacheOptions {
            max_entries: 2,
            ..enabled_options()
        };
        let cache = cache(options);
        insert_complete(&cache, "m", "query alpha", b"A");
        std::thread::sleep(Duration::from_millis(2));
        insert_complete(&cache, "m", "query bravo", b"B");
        std::thread::sleep(Duration::from_millis(2));
        insert_complete(&cache, "m", "query charlie", b"C");

        assert_eq!(cache.len(), 2);
        assert!(cache.find_similar("m", "query alpha").unwrap().is_none());
        assert_eq!(cache.find_similar("m", "query bravo").unwrap().unwrap(), b"B");
        assert_eq!(
            cache.find_similar("m", "query charlie").unwrap().unwrap(),
            b"C"
        );
    }

    #[test]
    fn pending_entries_are_evicted_only_as_a_last_resort() {
        let options = SemanticCacheOptions {
            max_entries: 2,
            ..enabled_options()
        };
        let cache = cache(options);
        let pending = cache.add_pending("m", "still in flight", b"req".to_vec()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        insert_complete(&cache, "m", "done already", b"done");
        std::thread::sleep(Duration::from_millis(2));
        // The completed entry is newer than the pending one, yet it is the
        // one that must go.
        cache.add_pending("m", "another in flight", b"req".to_vec()).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.find_similar("m", "done already").unwrap().is_none());
        assert!(cache.update_with_response(pending, b"late".to_vec()).is_ok());
    }

    #[test]
    fn expired_entries_are_ignored_and_pruned() {
        let options = SemanticCacheOptions {
            ttl: Some(Duration::from_millis(10)),
            ..enabled_options()
        };
        let cache = cache(options);
        insert_complete(&cache, "m", "short lived", b"resp");
        assert!(cache.find_similar("m", "short lived").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.find_similar("m", "short lived").unwrap().is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_bound_holds_after_every_mutation() {
        let options = SemanticCacheOptions {
            max_entries: 3,
            ..enabled_options()
        };
        let cache = cache(options);
        for i in 0..10 {
            insert_complete(&cache, "m", &format!("query number {i}"), b"resp");
            assert!(cache.len() <= 3);
        }
    }
}
