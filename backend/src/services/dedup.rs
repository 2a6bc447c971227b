use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::llm::EmbeddingClient;
use super::store::SearchStore;
use super::vector_index::{NearestMatch, VectorIndex};

/// Semantic request deduplication: embed the incoming query, find the
/// single nearest previously answered query, and reuse its record instead
/// of running the pipeline again.
///
/// Lookups are best-effort. Any embedding or index failure degrades to a
/// cache miss so record creation is never blocked on the provider.
pub struct DedupCache {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    /// Minimum cosine similarity to accept a hit. `None` reproduces the
    /// thresholdless behavior: the nearest neighbor wins however weak.
    min_similarity: Option<f32>,
}

impl DedupCache {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        min_similarity: Option<f32>,
    ) -> Self {
        Self {
            embedder,
            index,
            min_similarity,
        }
    }

    pub async fn lookup(&self, query_text: &str) -> Option<Uuid> {
        let vector = match self.embedder.embed(query_text).await {
            Ok(vector) => vector,
            Err(e) => {
                log::warn!("dedup embedding failed, treating as miss: {e}");
                return None;
            }
        };
        let nearest = match self.index.nearest(&vector).await {
            Ok(nearest) => nearest?,
            Err(e) => {
                log::warn!("dedup vector search failed, treating as miss: {e}");
                return None;
            }
        };

        let NearestMatch { id, similarity } = nearest;
        if let Some(min) = self.min_similarity {
            if similarity < min {
                log::debug!("dedup nearest neighbor {id} below threshold ({similarity} < {min})");
                return None;
            }
        }
        log::info!("dedup hit: reusing record {id} (similarity {similarity:.3})");
        Some(id)
    }

    /// One backfill tick: embed up to `batch_size` records that still lack
    /// a query embedding, concurrently, and patch the vectors back.
    /// Embeddings are computed lazily off the record-creation path, so a
    /// record is not dedup-discoverable until this has run for it. A
    /// failed record is skipped and retried on the next tick.
    pub async fn backfill(&self, store: &dyn SearchStore, batch_size: usize) {
        let pending = store.missing_embeddings(batch_size).await;
        if pending.is_empty() {
            return;
        }
        log::debug!("embedding backfill: {} record(s) pending", pending.len());

        let tasks = pending.into_iter().map(|record| async move {
            match self.embedder.embed(&record.query).await {
                Ok(vector) => {
                    if let Err(e) = self.index.upsert(record.id, vector.clone()).await {
                        log::warn!("backfill index upsert failed for {}: {e}", record.id);
                        return;
                    }
                    if let Err(e) = store.patch_embedding(record.id, vector).await {
                        log::warn!("backfill embedding patch failed for {}: {e}", record.id);
                    }
                }
                Err(e) => {
                    log::warn!("backfill embedding failed for {}, will retry: {e}", record.id);
                }
            }
        });
        join_all(tasks).await;
    }

    /// Runs `backfill` on a fixed wall-clock interval until aborted.
    pub fn spawn_backfill(
        self: Arc<Self>,
        store: Arc<dyn SearchStore>,
        interval: Duration,
        batch_size: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.backfill(store.as_ref(), batch_size).await;
            }
        })
    }
}
