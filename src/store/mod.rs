use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

use crate::{Config, StreamError};

pub mod changelog;

pub use changelog::Changelogged;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub global: Config,
    pub name: String,
    pub partition: i32,
}

impl StoreConfig {
    pub fn changelog_topic(&self) -> String {
        changelog_topic(&self.name)
    }
}

pub fn changelog_topic(store: &str) -> String {
    format!("{}-changelog", store)
}

/// A record kept by a window store. `seq` disambiguates records of one key that share a
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry<K, V> {
    pub key: K,
    pub timestamp: i64,
    pub seq: u64,
    pub value: V,
}

/// Keyed store of timestamped records, owned by a single partition of a single task.
#[async_trait(? Send)]
pub trait WindowStore<K, V> {
    async fn open(cfg: StoreConfig) -> Result<Self, StreamError> where Self: Sized;

    /// Sequence number for the next entry put into this store.
    fn next_seq(&mut self) -> u64;

    async fn put(&mut self, entry: WindowEntry<K, V>) -> Result<(), StreamError>;

    /// All entries of `key` with `from <= timestamp <= to`, oldest first.
    fn fetch(&self, key: &K, from: i64, to: i64) -> Vec<WindowEntry<K, V>>;

    async fn remove(&mut self, key: &K, timestamp: i64, seq: u64) -> Result<Option<V>, StreamError>;

    /// Drops every entry older than `before` and returns what was dropped.
    async fn evict_expired(&mut self, before: i64) -> Result<Vec<WindowEntry<K, V>>, StreamError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


pub struct InMemory<K: Hash, V> {
    by_key: HashMap<K, BTreeMap<(i64, u64), V>>,
    by_time: BTreeMap<(i64, u64), K>,
    next_seq: u64,
}

impl<K: Hash + Eq, V> InMemory<K, V> {
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_time: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Hash + Eq, V> Default for InMemory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(? Send)]
impl<K: Hash + Eq + Clone, V: Clone> WindowStore<K, V> for InMemory<K, V> {
    async fn open(_cfg: StoreConfig) -> Result<Self, StreamError> where Self: Sized {
        Ok(Self::new())
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn put(&mut self, entry: WindowEntry<K, V>) -> Result<(), StreamError> {
        let id = (entry.timestamp, entry.seq);
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.by_time.insert(id, entry.key.clone());
        self.by_key.entry(entry.key).or_default().insert(id, entry.value);
        Ok(())
    }

    fn fetch(&self, key: &K, from: i64, to: i64) -> Vec<WindowEntry<K, V>> {
        if from > to {
            return vec![];
        }
        match self.by_key.get(key) {
            Some(entries) => entries
                .range((from, 0)..=(to, u64::MAX))
                .map(|(&(timestamp, seq), v)| WindowEntry {
                    key: key.clone(),
                    timestamp,
                    seq,
                    value: v.clone(),
                })
                .collect(),
            None => vec![],
        }
    }

    async fn remove(&mut self, key: &K, timestamp: i64, seq: u64) -> Result<Option<V>, StreamError> {
        let id = (timestamp, seq);
        let removed = match self.by_key.get_mut(key) {
            Some(entries) => {
                let v = entries.remove(&id);
                if entries.is_empty() {
                    self.by_key.remove(key);
                }
                v
            }
            None => None,
        };
        if removed.is_some() {
            self.by_time.remove(&id);
        }
        Ok(removed)
    }

    async fn evict_expired(&mut self, before: i64) -> Result<Vec<WindowEntry<K, V>>, StreamError> {
        let kept = self.by_time.split_off(&(before, 0));
        let expired = std::mem::replace(&mut self.by_time, kept);
        let mut evicted = Vec::with_capacity(expired.len());
        for ((timestamp, seq), key) in expired {
            if let Some(entries) = self.by_key.get_mut(&key) {
                if let Some(value) = entries.remove(&(timestamp, seq)) {
                    evicted.push(WindowEntry { key: key.clone(), timestamp, seq, value });
                }
                if entries.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
        Ok(evicted)
    }

    fn len(&self) -> usize {
        self.by_time.len()
    }
}

/// One store per assigned partition, opened lazily and dropped on revocation.
pub struct Partitioned<S, K, V> {
    name: String,
    global: Config,
    stores: HashMap<i32, S>,
    _mark: PhantomData<(K, V)>,
}

impl<S, K, V> Partitioned<S, K, V>
    where S: WindowStore<K, V>
{
    pub fn new(cfg: Config, name: String) -> Self {
        Partitioned {
            name,
            global: cfg,
            stores: HashMap::new(),
            _mark: PhantomData,
        }
    }

    pub fn partitions(&self) -> HashSet<i32> {
        self.stores.keys().copied().collect()
    }

    pub async fn ensure_partitions(&mut self, parts: HashSet<i32>) -> Result<(), StreamError> {
        let old = self.partitions();
        let added: Vec<i32> = parts.difference(&old).copied().collect();
        let removed: Vec<i32> = old.difference(&parts).copied().collect();
        self.repartition(added, removed).await
    }

    pub async fn repartition(&mut self, added: Vec<i32>, removed: Vec<i32>) -> Result<(), StreamError> {
        for old in removed {
            if self.stores.remove(&old).is_some() {
                debug!("Released store {} for partition {}", self.name, old);
            }
        }
        for new in added {
            self.store(new).await?;
        }
        Ok(())
    }

    pub fn get(&self, part: i32) -> Option<&S> {
        self.stores.get(&part)
    }

    pub async fn store(&mut self, part: i32) -> Result<&mut S, StreamError> {
        if !self.stores.contains_key(&part) {
            let store = S::open(StoreConfig {
                global: self.global.clone(),
                name: self.name.clone(),
                partition: part,
            }).await?;
            debug!("Opened store {} for partition {}", self.name, part);
            self.stores.insert(part, store);
        }
        self.stores
            .get_mut(&part)
            .ok_or_else(|| StreamError::store(&self.name, format!("no store for partition {}", part)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, timestamp: i64, seq: u64, value: &str) -> WindowEntry<String, String> {
        WindowEntry {
            key: key.to_string(),
            timestamp,
            seq,
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_is_bounded_by_key_and_time() {
        let mut store: InMemory<String, String> = InMemory::new();
        store.put(entry("a", 10, 0, "first")).await.unwrap();
        store.put(entry("a", 20, 1, "second")).await.unwrap();
        store.put(entry("a", 30, 2, "third")).await.unwrap();
        store.put(entry("b", 20, 3, "other")).await.unwrap();

        let found = store.fetch(&"a".to_string(), 10, 20);
        let values: Vec<_> = found.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["first", "second"]);
        assert!(store.fetch(&"c".to_string(), 0, 100).is_empty());
        assert!(store.fetch(&"a".to_string(), 40, 30).is_empty());
    }

    #[tokio::test]
    async fn same_timestamp_entries_are_kept_apart() {
        let mut store: InMemory<String, String> = InMemory::new();
        let s1 = store.next_seq();
        let s2 = store.next_seq();
        store.put(entry("a", 10, s1, "one")).await.unwrap();
        store.put(entry("a", 10, s2, "two")).await.unwrap();
        assert_eq!(store.fetch(&"a".to_string(), 10, 10).len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn eviction_drops_only_older_entries() {
        let mut store: InMemory<String, String> = InMemory::new();
        store.put(entry("a", 10, 0, "old")).await.unwrap();
        store.put(entry("b", 15, 1, "old")).await.unwrap();
        store.put(entry("a", 20, 2, "new")).await.unwrap();

        let evicted = store.evict_expired(20).await.unwrap();
        assert_eq!(evicted.len(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.fetch(&"b".to_string(), 0, 100).is_empty());
        assert_eq!(store.fetch(&"a".to_string(), 0, 100)[0].value, "new");
    }

    #[tokio::test]
    async fn put_advances_sequence_past_restored_entries() {
        let mut store: InMemory<String, String> = InMemory::new();
        store.put(entry("a", 10, 41, "restored")).await.unwrap();
        assert_eq!(store.next_seq(), 42);
    }

    #[tokio::test]
    async fn remove_deletes_single_entry() {
        let mut store: InMemory<String, String> = InMemory::new();
        store.put(entry("a", 10, 0, "x")).await.unwrap();
        store.put(entry("a", 10, 1, "y")).await.unwrap();
        let removed = store.remove(&"a".to_string(), 10, 0).await.unwrap();
        assert_eq!(removed.as_deref(), Some("x"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove(&"a".to_string(), 10, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn partitions_follow_assignment() {
        let mut stores: Partitioned<InMemory<String, String>, String, String> =
            Partitioned::new(Config::new(), "join-store".to_string());
        stores.ensure_partitions([0, 1, 2].into_iter().collect()).await.unwrap();
        stores.store(1).await.unwrap().put(entry("a", 1, 0, "v")).await.unwrap();
        stores.ensure_partitions([1, 3].into_iter().collect()).await.unwrap();

        assert_eq!(stores.partitions(), [1, 3].into_iter().collect());
        assert_eq!(stores.get(1).map(|s| s.len()), Some(1));
    }
}
