use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use searchhub_models::{SearchRecord, Source};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Persistence for search records.
///
/// All mutation is through field-scoped patches, never whole-record
/// writes: the answer stream and the related-question task update the same
/// record concurrently and must not clobber each other. Records are an
/// append-only log; nothing is ever deleted.
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn create(&self, query: &str) -> SearchRecord;
    async fn get(&self, id: Uuid) -> Option<SearchRecord>;

    async fn patch_sources(&self, id: Uuid, sources: Vec<Source>) -> Result<()>;
    async fn patch_content(&self, id: Uuid, content: String) -> Result<()>;
    async fn patch_relates(&self, id: Uuid, relates: Vec<String>) -> Result<()>;
    async fn patch_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()>;

    /// Records the embedding backfill job still has to process.
    async fn missing_embeddings(&self, limit: usize) -> Vec<SearchRecord>;

    /// Read-only subscription to one record; the receiver observes every
    /// patch in application order.
    async fn watch(&self, id: Uuid) -> Option<watch::Receiver<SearchRecord>>;
}

/// In-memory store: each record lives inside a `watch` channel so patching
/// and subscribing share one mechanism.
#[derive(Default)]
pub struct MemorySearchStore {
    records: RwLock<HashMap<Uuid, watch::Sender<SearchRecord>>>,
}

impl MemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn patch<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SearchRecord),
    {
        let records = self.records.read().await;
        let Some(sender) = records.get(&id) else {
            bail!("no search record with id {id}");
        };
        sender.send_modify(apply);
        Ok(())
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn create(&self, query: &str) -> SearchRecord {
        let record = SearchRecord::new(query);
        let (sender, _) = watch::channel(record.clone());
        self.records.write().await.insert(record.id, sender);
        record
    }

    async fn get(&self, id: Uuid) -> Option<SearchRecord> {
        let records = self.records.read().await;
        records.get(&id).map(|sender| sender.borrow().clone())
    }

    async fn patch_sources(&self, id: Uuid, sources: Vec<Source>) -> Result<()> {
        self.patch(id, |record| record.sources = sources).await
    }

    async fn patch_content(&self, id: Uuid, content: String) -> Result<()> {
        self.patch(id, |record| record.content = content).await
    }

    async fn patch_relates(&self, id: Uuid, relates: Vec<String>) -> Result<()> {
        self.patch(id, |record| record.relates = relates).await
    }

    async fn patch_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        self.patch(id, |record| record.query_embedding = Some(embedding))
            .await
    }

    async fn missing_embeddings(&self, limit: usize) -> Vec<SearchRecord> {
        let records = self.records.read().await;
        let mut missing: Vec<SearchRecord> = records
            .values()
            .filter(|sender| sender.borrow().query_embedding.is_none())
            .map(|sender| sender.borrow().clone())
            .collect();
        // Oldest first so a stuck record cannot starve newer ones forever.
        missing.sort_by_key(|record| record.created_at);
        missing.truncate(limit);
        missing
    }

    async fn watch(&self, id: Uuid) -> Option<watch::Receiver<SearchRecord>> {
        let records = self.records.read().await;
        records.get(&id).map(|sender| sender.subscribe())
    }
}
