//! In-memory KV tier.
//!
//! Shared between coordinators through an `Arc` to stand in for a KV service
//! several processes talk to.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Expected, KvEntry, KvStore, KvValue};
use crate::error::StoreResult;

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, KvEntry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: &KvValue) -> StoreResult<()> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.value = value.clone();
                entry.version += 1;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(KvEntry {
                    value: value.clone(),
                    version: 1,
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: &KvValue,
    ) -> StoreResult<bool> {
        // The entry guard holds the shard lock for the whole check-and-write.
        let swapped = match (self.entries.entry(key.to_string()), expected) {
            (Entry::Vacant(vacant), Expected::Absent) => {
                vacant.insert(KvEntry {
                    value: value.clone(),
                    version: 1,
                });
                true
            }
            (Entry::Occupied(mut occupied), Expected::Version(version))
                if occupied.get().version == version =>
            {
                let entry = occupied.get_mut();
                entry.value = value.clone();
                entry.version += 1;
                true
            }
            _ => false,
        };
        Ok(swapped)
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        let mut items: Vec<(String, KvEntry)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
