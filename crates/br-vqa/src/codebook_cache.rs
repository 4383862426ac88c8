//! Codebook Cache
//!
//! LRU cache of decoded codebooks keyed by their `CIND` slot, so seeking
//! back into an earlier codebook span does not re-read and re-inflate it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::decoder::Codebook;

// ============ Cache Entry ============

struct CacheEntry {
    codebook: Arc<Codebook>,
    last_access: u64,
}

// ============ Codebook Cache ============

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cached: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Decoded bytes held (approximate)
    pub memory_used: usize,
}

/// LRU codebook cache
pub struct CodebookCache {
    entries: HashMap<usize, CacheEntry>,
    capacity: usize,
    /// Access counter for LRU
    access_counter: u64,
    hits: u64,
    misses: u64,
    memory_used: usize,
}

impl CodebookCache {
    /// A capacity of 0 is treated as 1; the active codebook must stay resident
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            access_counter: 0,
            hits: 0,
            misses: 0,
            memory_used: 0,
        }
    }

    pub fn get(&mut self, slot: usize) -> Option<Arc<Codebook>> {
        self.access_counter += 1;
        let access = self.access_counter;

        match self.entries.get_mut(&slot) {
            Some(entry) => {
                entry.last_access = access;
                self.hits += 1;
                Some(Arc::clone(&entry.codebook))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, slot: usize, codebook: Arc<Codebook>) {
        if let Some(old) = self.entries.remove(&slot) {
            self.memory_used -= old.codebook.byte_size();
        }

        // Evict if at capacity
        while self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        self.access_counter += 1;
        self.memory_used += codebook.byte_size();
        self.entries.insert(
            slot,
            CacheEntry {
                codebook,
                last_access: self.access_counter,
            },
        );
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.memory_used = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            memory_used: self.memory_used,
        }
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(&slot, _)| slot);

        if let Some(entry) = oldest.and_then(|slot| self.entries.remove(&slot)) {
            self.memory_used -= entry.codebook.byte_size();
        }
    }
}
