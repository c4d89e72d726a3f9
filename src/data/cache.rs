use dashmap::DashMap;
use std::hash::Hash;
use crate::data::types::{OtherMarket, OutcomeValue, PullRef, PullRequest, UserStats};

/// Read-through store for one kind of external read.
///
/// Entries never expire: a cache lives for exactly one evaluation pass and is
/// dropped with it.
pub struct ReadCache<K, V> {
    cache: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> ReadCache<K, V> {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).map(|entry| entry.value().clone())
    }

    /// Stored value for `key`, computing and storing it on first use
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        self.cache.entry(key).or_insert_with(make).value().clone()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for ReadCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every external read made while evaluating one market, keyed by what was read
#[derive(Default)]
pub struct PassCache {
    pub current_values: ReadCache<String, OutcomeValue>,
    pub other_markets: ReadCache<String, OtherMarket>,
    pub pull_requests: ReadCache<PullRef, PullRequest>,
    pub users: ReadCache<String, UserStats>,
    /// Generator seeds for unseeded random rules, keyed by rule node
    pub entropy_seeds: ReadCache<usize, u64>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of distinct reads served so far
    pub fn len(&self) -> usize {
        self.current_values.len() + self.other_markets.len() + self.pull_requests.len() + self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
