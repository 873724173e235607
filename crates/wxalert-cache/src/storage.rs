//! Cache generations and the storage that holds them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use wxalert_net::Response;

use crate::persist::{self, GenerationMeta, LoadedGeneration};
use crate::{CacheEntry, CacheError, RequestKey, SharedCacheStorage};

// ==================== Cache ====================

#[derive(Debug, Clone)]
struct Stored {
    /// File slot within the generation's directory.
    slot: u64,
    entry: CacheEntry,
}

/// One named cache generation.
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,

    /// Creation order within the storage.
    created_seq: u64,

    /// Entries keyed by the rendered request key.
    entries: HashMap<String, Stored>,

    next_slot: u64,
    size_bytes: usize,
}

impl Cache {
    fn new(name: &str, created_seq: u64) -> Self {
        Self {
            name: name.to_string(),
            created_seq,
            entries: HashMap::new(),
            next_slot: 0,
            size_bytes: 0,
        }
    }

    fn restore(loaded: LoadedGeneration) -> Self {
        let mut cache = Self::new(&loaded.meta.name, loaded.meta.created_seq);
        for (slot, entry) in loaded.entries {
            cache.insert(slot, entry);
        }
        cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request key.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(&key.to_string()).map(|stored| &stored.entry)
    }

    /// All stored request keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.values().map(|stored| &stored.entry.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate size of all entries in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn slot_of(&self, key: &RequestKey) -> Option<u64> {
        self.entries.get(&key.to_string()).map(|stored| stored.slot)
    }

    fn insert(&mut self, slot: u64, entry: CacheEntry) {
        self.size_bytes += entry.size();
        self.next_slot = self.next_slot.max(slot + 1);
        if let Some(old) = self.entries.insert(entry.key.to_string(), Stored { slot, entry }) {
            self.size_bytes -= old.entry.size();
        }
    }

    fn meta(&self) -> GenerationMeta {
        GenerationMeta {
            name: self.name.clone(),
            created_seq: self.created_seq,
        }
    }
}

// ==================== Cache Storage ====================

/// All cache generations of one origin.
///
/// A persistent storage writes to disk before touching memory, so a failed write leaves
/// it unchanged. Writes go through `tokio::fs` and cover only the entries being stored.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    next_seq: u64,
    dir: Option<PathBuf>,
    quota_bytes: Option<usize>,
}

impl CacheStorage {
    /// Storage that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Storage mirrored to `dir`, loading any generations already stored there.
    pub async fn persistent(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut storage = Self {
            dir: Some(dir.clone()),
            ..Self::default()
        };
        for loaded in persist::load_all(&dir).await? {
            let cache = Cache::restore(loaded);
            storage.next_seq = storage.next_seq.max(cache.created_seq + 1);
            storage.caches.insert(cache.name.clone(), cache);
        }

        info!(dir = %dir.display(), caches = storage.caches.len(), "Cache storage loaded");
        Ok(storage)
    }

    /// Limit the total stored size. Writes that would exceed it fail.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Wrap for sharing between handlers.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    /// Directory the storage is mirrored to, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&mut self, name: &str) -> Result<&Cache, CacheError> {
        if !self.caches.contains_key(name) {
            let cache = Cache::new(name, self.next_seq);
            if let Some(ref dir) = self.dir {
                persist::write_entries(dir, &cache.meta(), true, &[]).await?;
            }
            self.caches.insert(name.to_string(), cache);
            self.next_seq += 1;
            debug!(cache = %name, "Cache created");
        }
        self.caches
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Look up a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Delete a cache. Returns whether it existed.
    pub async fn delete(&mut self, name: &str) -> Result<bool, CacheError> {
        if !self.caches.contains_key(name) {
            return Ok(false);
        }
        if let Some(ref dir) = self.dir {
            persist::remove_generation(dir, name).await?;
        }
        self.caches.remove(name);
        debug!(cache = %name, "Cache deleted");
        Ok(true)
    }

    /// All cache names, oldest first.
    pub fn keys(&self) -> Vec<&str> {
        self.ordered().map(|c| c.name.as_str()).collect()
    }

    /// Store `response` under `key` in cache `name`, creating the cache if needed.
    pub async fn put(
        &mut self,
        name: &str,
        key: RequestKey,
        response: &Response,
    ) -> Result<(), CacheError> {
        self.put_all(name, vec![(key, response.clone())])
            .await
            .map(|_| ())
    }

    /// Store every pair, or none of them. Returns the number of distinct keys stored.
    ///
    /// A key repeated within the batch keeps its last response. The cache is created
    /// only if the whole batch is accepted.
    pub async fn put_all(
        &mut self,
        name: &str,
        batch: Vec<(RequestKey, Response)>,
    ) -> Result<usize, CacheError> {
        let mut staged: Vec<CacheEntry> = Vec::with_capacity(batch.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (key, response) in batch {
            let entry = CacheEntry::snapshot(key, &response)?;
            match positions.entry(entry.key.to_string()) {
                Entry::Occupied(seen) => staged[*seen.get()] = entry,
                Entry::Vacant(seen) => {
                    seen.insert(staged.len());
                    staged.push(entry);
                }
            }
        }

        let existing = self.caches.get(name);
        if let Some(quota) = self.quota_bytes {
            let replaced: usize = existing.map_or(0, |cache| {
                staged
                    .iter()
                    .filter_map(|entry| cache.match_request(&entry.key))
                    .map(CacheEntry::size)
                    .sum()
            });
            let added: usize = staged.iter().map(CacheEntry::size).sum();
            let needed = self.size_bytes() - replaced + added;
            if needed > quota {
                return Err(CacheError::QuotaExceeded { needed, quota });
            }
        }

        let mut next_slot = existing.map_or(0, |cache| cache.next_slot);
        let slots: Vec<u64> = staged
            .iter()
            .map(|entry| {
                existing
                    .and_then(|cache| cache.slot_of(&entry.key))
                    .unwrap_or_else(|| {
                        next_slot += 1;
                        next_slot - 1
                    })
            })
            .collect();
        let is_new = existing.is_none();
        let created_seq = existing.map_or(self.next_seq, |cache| cache.created_seq);

        if let Some(ref dir) = self.dir {
            let meta = GenerationMeta {
                name: name.to_string(),
                created_seq,
            };
            let writes: Vec<(u64, &CacheEntry)> = slots.iter().copied().zip(&staged).collect();
            persist::write_entries(dir, &meta, is_new, &writes).await?;
        }

        if is_new {
            self.next_seq += 1;
            debug!(cache = %name, "Cache created");
        }
        let cache = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name, created_seq));
        let count = staged.len();
        for (slot, entry) in slots.into_iter().zip(staged) {
            cache.insert(slot, entry);
        }
        Ok(count)
    }

    /// Match a request in one cache.
    pub fn match_in(&self, name: &str, key: &RequestKey) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(key)
    }

    /// Match across all caches, oldest generation first.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.ordered().find_map(|cache| cache.match_request(key))
    }

    /// Total stored size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    fn ordered(&self) -> impl Iterator<Item = &Cache> {
        let mut caches: Vec<&Cache> = self.caches.values().collect();
        caches.sort_by_key(|c| c.created_seq);
        caches.into_iter()
    }
}
