use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod protocol;

/// One retrieved web result. Ordering follows provider rank; the 1-based
/// position in a record's source list is the citation key used by the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub snippet: String,
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// The unit of work and persisted state for one answered query.
///
/// `content` grows monotonically while generation streams; `sources` is
/// written once by retrieval; `relates` is written once by the related
/// question task; `query_embedding` is filled in later by the backfill job.
/// Records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: Uuid,
    pub query: String,
    pub content: String,
    pub sources: Vec<Source>,
    pub relates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl SearchRecord {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            content: String::new(),
            sources: Vec::new(),
            relates: Vec::new(),
            query_embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// Body of `POST /api/query`. A known `search_uuid` replays the stored
/// result so shared links render identically for every viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_related_questions: Option<bool>,
}

/// Read surface consumed by the UI: the record minus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub id: Uuid,
    pub query: String,
    pub sources: Vec<Source>,
    pub content: String,
    pub relates: Vec<String>,
}

impl From<SearchRecord> for SearchSnapshot {
    fn from(record: SearchRecord) -> Self {
        Self {
            id: record.id,
            query: record.query,
            sources: record.sources,
            content: record.content,
            relates: record.relates,
        }
    }
}
