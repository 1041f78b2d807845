//! In-memory durable store for single-node runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{PastePatch, PasteRepository};
use crate::error::StoreResult;
use crate::paste::{now_ms, Page, Paste, PasteSummary};

#[derive(Debug, Default)]
pub struct MemoryPasteRepository {
    rows: RwLock<BTreeMap<String, Paste>>,
}

impl MemoryPasteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn page<F>(&self, filter: F, limit: u64, offset: u64) -> Page<PasteSummary>
    where
        F: Fn(&Paste) -> bool,
    {
        let rows = self.rows.read();
        let mut matching: Vec<&Paste> = rows.values().filter(|p| filter(*p)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));

        Page {
            total: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(PasteSummary::from)
                .collect(),
        }
    }
}

#[async_trait]
impl PasteRepository for MemoryPasteRepository {
    async fn create(&self, paste: &Paste) -> StoreResult<bool> {
        let mut rows = self.rows.write();
        if rows.contains_key(&paste.key) {
            return Ok(false);
        }
        rows.insert(paste.key.clone(), paste.clone());
        Ok(true)
    }

    async fn get_by_key(&self, key: &str) -> StoreResult<Option<Paste>> {
        Ok(self.rows.read().get(key).cloned())
    }

    async fn update(&self, key: &str, patch: &PastePatch) -> StoreResult<bool> {
        let mut rows = self.rows.write();
        match rows.get_mut(key) {
            Some(paste) => {
                patch.apply_to(paste);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.rows.write().remove(key).is_some())
    }

    async fn list_alive(&self, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>> {
        let now = now_ms();
        Ok(self.page(|p| p.is_live(now), limit, offset))
    }

    async fn paginate_by_owner(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>> {
        let now = now_ms();
        Ok(self.page(|p| p.email == email && p.is_live(now), limit, offset))
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.rows.read().len() as u64)
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.rows.read().keys().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
