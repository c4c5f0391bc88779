//! Bookkeeping set of live sessions.
//!
//! Identities are spread over a fixed number of shards, each behind its own
//! `RwLock`, so concurrent sessions mostly contend on different locks.
//! Writers only ever hold one shard lock. A snapshot takes every shard's read
//! lock in index order before reading, which gives a consistent view.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};

use crate::connection::ConnectionId;

pub const DEFAULT_SHARDS: usize = 16;

pub struct Registry {
    shards: Box<[RwLock<HashSet<ConnectionId>>]>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashSet::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, id: ConnectionId) -> &RwLock<HashSet<ConnectionId>> {
        &self.shards[(id.as_u64() % self.shards.len() as u64) as usize]
    }

    /// Adds `id`. Returns false (and changes nothing) if it was already present.
    pub fn insert(&self, id: ConnectionId) -> bool {
        self.shard(id).write().insert(id)
    }

    /// Removes `id`. Returns false (and changes nothing) if it was absent.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.shard(id).write().remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.shard(id).read().contains(&id)
    }

    pub fn len(&self) -> usize {
        let guards: Vec<_> = self.shards.iter().map(|shard| shard.read()).collect();
        guards.iter().map(|ids| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeSet<ConnectionId> {
        let guards: Vec<_> = self.shards.iter().map(|shard| shard.read()).collect();
        guards.iter().flat_map(|ids| ids.iter().copied()).collect()
    }
}
