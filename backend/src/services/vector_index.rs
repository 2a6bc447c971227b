use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::{
    prelude::*,
    qdrant::{
        point_id::PointIdOptions, vectors_config::Config, CreateCollection, Distance,
        PointStruct, SearchPoints, VectorParams, VectorsConfig,
    },
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct NearestMatch {
    pub id: Uuid,
    pub similarity: f32,
}

/// Nearest-neighbor search over stored query embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: Uuid, vector: Vec<f32>) -> Result<()>;

    /// The single closest stored vector, or `None` for an empty index.
    async fn nearest(&self, vector: &[f32]) -> Result<Option<NearestMatch>>;
}

/// Exact cosine scan over an in-process map. The default index; dedup
/// volumes are per-deployment query histories, not document corpora.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<HashMap<Uuid, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.entries.write().await.insert(id, vector);
        Ok(())
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<NearestMatch>> {
        let entries = self.entries.read().await;
        let best = entries
            .iter()
            .map(|(id, stored)| NearestMatch {
                id: *id,
                similarity: cosine_similarity(vector, stored),
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));
        Ok(best)
    }
}

/// Qdrant-backed index for deployments where the query log outgrows a scan.
pub struct QdrantVectorIndex {
    client: QdrantClient,
    collection: String,
}

impl QdrantVectorIndex {
    pub async fn new(url: &str, collection: &str, dimension: u64) -> Result<Self> {
        let client = QdrantClient::from_url(url).build().map_err(|e| anyhow!("{e}"))?;
        let index = Self {
            client,
            collection: collection.to_string(),
        };
        index.ensure_collection(dimension).await?;
        Ok(index)
    }

    async fn ensure_collection(&self, dimension: u64) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| anyhow!("{e}"))?
            .collections;
        if collections.iter().any(|c| c.name == self.collection) {
            return Ok(());
        }
        let request = CreateCollection {
            collection_name: self.collection.clone(),
            vectors_config: Some(VectorsConfig {
                config: Some(Config::Params(VectorParams {
                    size: dimension,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        };
        self.client
            .create_collection(&request)
            .await
            .map_err(|e| anyhow!("{e}"))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        let payload = Payload::new();
        let point = PointStruct::new(id.to_string(), vector, payload);
        self.client
            .upsert_points_blocking(&self.collection, None, vec![point], None)
            .await
            .map_err(|e| anyhow!("{e}"))?;
        Ok(())
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<NearestMatch>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection.clone(),
                vector: vector.to_vec(),
                limit: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow!("{e}"))?;

        let nearest = response.result.into_iter().next().and_then(|scored| {
            let id = match scored.id.and_then(|p| p.point_id_options) {
                Some(PointIdOptions::Uuid(raw)) => Uuid::parse_str(&raw).ok()?,
                _ => return None,
            };
            Some(NearestMatch {
                id,
                similarity: scored.score,
            })
        });
        Ok(nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_index_has_no_neighbor() {
        let index = MemoryVectorIndex::new();
        assert_eq!(index.nearest(&[1.0, 0.0]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nearest_picks_highest_cosine() {
        let index = MemoryVectorIndex::new();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.upsert(close, vec![1.0, 0.1, 0.0]).await.unwrap();
        index.upsert(far, vec![0.0, 0.0, 1.0]).await.unwrap();

        let hit = index.nearest(&[1.0, 0.0, 0.0]).await.unwrap().unwrap();
        assert_eq!(hit.id, close);
        assert!(hit.similarity > 0.9);
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }
}
