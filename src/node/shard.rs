//! Per-shard storage
//!
//! Each shard is a plain string map with an entry/byte counter so the
//! status endpoint can report sizes without walking the map.

use crate::common::types::ShardStats;
use std::collections::{BTreeMap, HashMap};

/// One shard's key-value data.
#[derive(Debug, Default, Clone)]
pub struct ShardData {
    entries: HashMap<String, String>,
    bytes: usize,
}

impl ShardData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: String, value: String) {
        if let Some(old) = self.entries.get(&key) {
            self.bytes -= key.len() + old.len();
        }
        self.bytes += key.len() + value.len();
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            entries: self.entries.len(),
            bytes: self.bytes,
        }
    }

    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }
}

/// The set of shards a node holds, live or staged.
#[derive(Debug, Default)]
pub struct ShardContainer {
    shards: HashMap<u32, ShardData>,
}

impl ShardContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(shard_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            shards: shard_ids.into_iter().map(|id| (id, ShardData::new())).collect(),
        }
    }

    pub fn shard(&self, shard_id: u32) -> Option<&ShardData> {
        self.shards.get(&shard_id)
    }

    pub fn shard_mut(&mut self, shard_id: u32) -> Option<&mut ShardData> {
        self.shards.get_mut(&shard_id)
    }

    pub fn ensure_shard(&mut self, shard_id: u32) -> &mut ShardData {
        self.shards.entry(shard_id).or_default()
    }

    pub fn insert_shard(&mut self, shard_id: u32, data: ShardData) {
        self.shards.insert(shard_id, data);
    }

    pub fn remove_shard(&mut self, shard_id: u32) -> Option<ShardData> {
        self.shards.remove(&shard_id)
    }

    pub fn holds(&self, shard_id: u32) -> bool {
        self.shards.contains_key(&shard_id)
    }

    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.shards.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn stats(&self) -> BTreeMap<u32, ShardStats> {
        self.shards.iter().map(|(id, s)| (*id, s.stats())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_tracks_bytes() {
        let mut shard = ShardData::new();
        shard.set("ab".into(), "cde".into());
        assert_eq!(shard.stats(), ShardStats { entries: 1, bytes: 5 });

        // Overwrite replaces the old value's bytes.
        shard.set("ab".into(), "x".into());
        assert_eq!(shard.stats(), ShardStats { entries: 1, bytes: 3 });
    }

    #[test]
    fn test_container_shard_ids_sorted() {
        let container = ShardContainer::with_shards([3, 0, 7]);
        assert_eq!(container.shard_ids(), vec![0, 3, 7]);
        assert!(container.holds(7));
        assert!(!container.holds(1));
    }
}
