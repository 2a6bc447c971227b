use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use searchhub_models::{SearchRecord, Source};
use searchhub_utils::{partial_marker_suffix, rewrite_citations};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::QueryError;
use super::dedup::DedupCache;
use super::llm::{GenerationClient, GenerationError};
use super::prompts::{
    build_more_questions_prompt, build_rag_system_prompt, sanitize_query, NO_SOURCES_WARNING,
};
use super::search_provider::{SearchProvider, REFERENCE_COUNT};
use super::store::SearchStore;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sources grounding one answer.
    pub reference_count: usize,
    /// Persist the rewritten answer buffer every this many deltas, to
    /// bound write amplification. The final state is always persisted.
    pub flush_every: usize,
    pub generate_related: bool,
    pub max_related: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reference_count: REFERENCE_COUNT,
            flush_every: 5,
            generate_related: true,
            max_related: 5,
        }
    }
}

/// One logical output of the pipeline, in stream order: sources once, then
/// answer deltas, then related questions once.
#[derive(Debug, Clone)]
pub enum RagEvent {
    Sources(Vec<Source>),
    Delta(String),
    Relates(Vec<String>),
}

pub enum QueryOutcome {
    /// A stored record satisfies the request (dedup hit or shared link).
    Replay(SearchRecord),
    /// A fresh pipeline run; `events` drives the framed response.
    Live {
        id: Uuid,
        events: BoxStream<'static, RagEvent>,
    },
}

/// Sequences one query through dedup lookup, retrieval, grounded answer
/// streaming and the concurrent related-question branch, persisting each
/// stage into the record as it lands.
pub struct RagOrchestrator {
    store: Arc<dyn SearchStore>,
    retriever: Arc<dyn SearchProvider>,
    llm: Arc<dyn GenerationClient>,
    dedup: Arc<DedupCache>,
    config: OrchestratorConfig,
}

impl RagOrchestrator {
    pub fn new(
        store: Arc<dyn SearchStore>,
        retriever: Arc<dyn SearchProvider>,
        llm: Arc<dyn GenerationClient>,
        dedup: Arc<DedupCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            retriever,
            llm,
            dedup,
            config,
        }
    }

    pub async fn submit(
        &self,
        raw_query: &str,
        search_uuid: Option<Uuid>,
        generate_related: Option<bool>,
    ) -> Result<QueryOutcome, QueryError> {
        let query = sanitize_query(raw_query);
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        // Shared links replay the stored result verbatim, without checking
        // that the stored query matches, so every viewer sees the same page.
        if let Some(uuid) = search_uuid {
            if let Some(record) = self.store.get(uuid).await {
                log::info!("record {uuid}: replaying stored result");
                return Ok(QueryOutcome::Replay(record));
            }
            log::info!("search_uuid {uuid} not found, generating fresh");
        }

        if let Some(existing) = self.dedup.lookup(&query).await {
            if let Some(record) = self.store.get(existing).await {
                return Ok(QueryOutcome::Replay(record));
            }
            log::warn!("dedup index points at unknown record {existing}, ignoring");
        }

        let record = self.store.create(&query).await;
        let id = record.id;
        log::info!("record {id}: created for query {query:?}");

        log::debug!("record {id}: retrieving");
        let sources = match self.retriever.search(&query).await {
            Ok(mut sources) => {
                sources.truncate(self.config.reference_count);
                sources
            }
            Err(e) => {
                // Degraded but non-fatal: answer from an empty context.
                log::error!("record {id}: retrieval failed, proceeding without sources: {e}");
                Vec::new()
            }
        };
        if let Err(e) = self.store.patch_sources(id, sources.clone()).await {
            log::error!("record {id}: failed to persist sources: {e}");
        }

        let related = if self.config.generate_related && generate_related.unwrap_or(true) {
            Some(spawn_related_questions(
                self.llm.clone(),
                self.store.clone(),
                id,
                query.clone(),
                sources.clone(),
                self.config.max_related,
            ))
        } else {
            None
        };

        // Open the generation stream before returning so quota and auth
        // failures come back as a typed error, not a broken stream.
        log::debug!("record {id}: generating");
        let system_prompt = build_rag_system_prompt(&sources);
        let mut tokens = self
            .llm
            .stream_answer(&system_prompt, &query)
            .await
            .map_err(|e| match e {
                GenerationError::RateLimited => QueryError::RateLimited,
                GenerationError::Upstream(message) => QueryError::Generation(message),
            })?;

        let store = self.store.clone();
        let flush_every = self.config.flush_every.max(1);
        let events = stream! {
            yield RagEvent::Sources(sources.clone());

            let source_count = sources.len();
            let mut buffer = String::new();
            if sources.is_empty() {
                buffer.push_str(NO_SOURCES_WARNING);
                yield RagEvent::Delta(NO_SOURCES_WARNING.to_string());
            }

            let mut since_flush = 0usize;
            while let Some(delta) = tokens.next().await {
                match delta {
                    Ok(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        buffer.push_str(&text);
                        since_flush += 1;
                        if since_flush >= flush_every {
                            since_flush = 0;
                            persist_answer(store.as_ref(), id, &buffer, source_count, false).await;
                        }
                        yield RagEvent::Delta(text);
                    }
                    Err(e) => {
                        // The partial answer persisted so far stays valid.
                        log::error!("record {id}: generation stream failed mid-answer: {e}");
                        break;
                    }
                }
            }
            persist_answer(store.as_ref(), id, &buffer, source_count, true).await;
            log::info!("record {id}: generation done ({} bytes)", buffer.len());

            let relates = match related {
                Some(handle) => handle.await.unwrap_or_else(|e| {
                    log::error!("record {id}: related-question task failed: {e}");
                    Vec::new()
                }),
                None => Vec::new(),
            };
            yield RagEvent::Relates(relates);
            log::debug!("record {id}: done");
        };

        Ok(QueryOutcome::Live {
            id,
            events: events.boxed(),
        })
    }
}

/// Persists the rewritten cumulative answer. While the stream is still
/// running, a trailing partial citation marker is withheld so readers of
/// the record never observe a prefix regression once the marker completes
/// and rewrites to a shorter form.
async fn persist_answer(
    store: &dyn SearchStore,
    id: Uuid,
    buffer: &str,
    source_count: usize,
    finished: bool,
) {
    let safe_len = if finished {
        buffer.len()
    } else {
        buffer.len() - partial_marker_suffix(buffer)
    };
    let rewritten = rewrite_citations(&buffer[..safe_len], source_count);
    if let Err(e) = store.patch_content(id, rewritten).await {
        log::error!("record {id}: failed to persist answer: {e}");
    }
}

/// The related-question branch: one non-streaming tool call running
/// concurrently with answer generation, writing only the `relates` field.
/// Never fails the answer path; every error degrades to an empty list.
fn spawn_related_questions(
    llm: Arc<dyn GenerationClient>,
    store: Arc<dyn SearchStore>,
    id: Uuid,
    query: String,
    sources: Vec<Source>,
    max_related: usize,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        log::debug!("record {id}: related questions pending");
        let system_prompt = build_more_questions_prompt(&sources);
        let mut relates = match llm.related_questions(&system_prompt, &query).await {
            Ok(questions) => questions,
            Err(e) => {
                log::warn!("record {id}: related-question generation failed: {e}");
                Vec::new()
            }
        };
        relates.truncate(max_related);
        if let Err(e) = store.patch_relates(id, relates.clone()).await {
            log::error!("record {id}: failed to persist related questions: {e}");
        }
        log::debug!("record {id}: related questions done ({})", relates.len());
        relates
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::{EmbeddingClient, TokenStream};
    use crate::services::store::MemorySearchStore;
    use crate::services::vector_index::{MemoryVectorIndex, VectorIndex};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct StubRetriever {
        fail: bool,
    }

    #[async_trait]
    impl SearchProvider for StubRetriever {
        async fn search(&self, _query: &str) -> Result<Vec<Source>> {
            if self.fail {
                bail!("search engine down");
            }
            Ok(vec![
                Source::new("A", "https://a.example", "snippet a"),
                Source::new("B", "https://b.example", "snippet b"),
            ])
        }
    }

    enum LlmMode {
        Ok,
        RateLimited,
        RelatedOverflow,
        RelatedFails,
    }

    struct StubLlm {
        mode: LlmMode,
        // Deltas chosen to split a citation marker across chunks.
        deltas: Vec<&'static str>,
    }

    impl StubLlm {
        fn new(mode: LlmMode) -> Self {
            Self {
                mode,
                deltas: vec!["Rust is fast [[cit", "ation:1]]", " and safe."],
            }
        }
    }

    #[async_trait]
    impl GenerationClient for StubLlm {
        async fn stream_answer(
            &self,
            _system_prompt: &str,
            _user_text: &str,
        ) -> Result<TokenStream, GenerationError> {
            if matches!(self.mode, LlmMode::RateLimited) {
                return Err(GenerationError::RateLimited);
            }
            let deltas: Vec<Result<String, GenerationError>> =
                self.deltas.iter().map(|d| Ok(d.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(deltas)))
        }

        async fn related_questions(
            &self,
            _system_prompt: &str,
            _user_text: &str,
        ) -> Result<Vec<String>, GenerationError> {
            match self.mode {
                LlmMode::RelatedFails => {
                    Err(GenerationError::Upstream("malformed tool arguments".into()))
                }
                LlmMode::RelatedOverflow => {
                    Ok((1..=8).map(|i| format!("Q{i}?")).collect())
                }
                _ => Ok(vec!["What about lifetimes?".to_string()]),
            }
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingClient for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn embedding_dimension(&self) -> Option<u32> {
            Some(2)
        }
    }

    struct Fixture {
        orchestrator: RagOrchestrator,
        store: Arc<MemorySearchStore>,
        index: Arc<MemoryVectorIndex>,
    }

    fn fixture(retriever_fails: bool, mode: LlmMode) -> Fixture {
        let store = Arc::new(MemorySearchStore::new());
        let index = Arc::new(MemoryVectorIndex::new());
        let dedup = Arc::new(DedupCache::new(Arc::new(StubEmbedder), index.clone(), None));
        let orchestrator = RagOrchestrator::new(
            store.clone(),
            Arc::new(StubRetriever {
                fail: retriever_fails,
            }),
            Arc::new(StubLlm::new(mode)),
            dedup,
            OrchestratorConfig {
                flush_every: 1,
                ..Default::default()
            },
        );
        Fixture {
            orchestrator,
            store,
            index,
        }
    }

    async fn collect_live(outcome: QueryOutcome) -> (Uuid, Vec<RagEvent>) {
        match outcome {
            QueryOutcome::Live { id, events } => (id, events.collect().await),
            QueryOutcome::Replay(_) => panic!("expected a live pipeline run"),
        }
    }

    #[tokio::test]
    async fn test_pipeline_streams_sources_deltas_then_relates() {
        let f = fixture(false, LlmMode::Ok);
        let outcome = f.orchestrator.submit("why rust", None, None).await.unwrap();
        let (id, events) = collect_live(outcome).await;

        assert!(matches!(&events[0], RagEvent::Sources(s) if s.len() == 2));
        let answer: String = events
            .iter()
            .filter_map(|e| match e {
                RagEvent::Delta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(answer, "Rust is fast [[citation:1]] and safe.");
        assert!(matches!(
            events.last(),
            Some(RagEvent::Relates(r)) if r == &vec!["What about lifetimes?".to_string()]
        ));

        // Persisted content is the rewritten cumulative buffer.
        let record = f.store.get(id).await.unwrap();
        assert_eq!(record.content, "Rust is fast [citation](1) and safe.");
        assert_eq!(record.sources.len(), 2);
        assert_eq!(record.relates, vec!["What about lifetimes?".to_string()]);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_empty_sources() {
        let f = fixture(true, LlmMode::Ok);
        let outcome = f.orchestrator.submit("why rust", None, None).await.unwrap();
        let (id, events) = collect_live(outcome).await;

        assert!(matches!(&events[0], RagEvent::Sources(s) if s.is_empty()));
        assert!(matches!(&events[1], RagEvent::Delta(d) if d == NO_SOURCES_WARNING));

        // No sources means every citation stays inert.
        let record = f.store.get(id).await.unwrap();
        assert!(record.content.starts_with(NO_SOURCES_WARNING));
        assert!(record.content.contains("[citation:1]"));
        assert!(!record.content.contains("[citation](1)"));
    }

    #[tokio::test]
    async fn test_generation_rate_limit_surfaces_typed_error() {
        let f = fixture(false, LlmMode::RateLimited);
        let err = f.orchestrator.submit("why rust", None, None).await.err().unwrap();
        assert!(matches!(err, QueryError::RateLimited));
    }

    #[tokio::test]
    async fn test_related_questions_truncated_to_five() {
        let f = fixture(false, LlmMode::RelatedOverflow);
        let outcome = f.orchestrator.submit("why rust", None, None).await.unwrap();
        let (id, events) = collect_live(outcome).await;

        let Some(RagEvent::Relates(relates)) = events.last() else {
            panic!("expected relates event");
        };
        assert_eq!(relates.len(), 5);
        assert_eq!(f.store.get(id).await.unwrap().relates.len(), 5);
    }

    #[tokio::test]
    async fn test_related_failure_degrades_to_empty_list() {
        let f = fixture(false, LlmMode::RelatedFails);
        let outcome = f.orchestrator.submit("why rust", None, None).await.unwrap();
        let (id, events) = collect_live(outcome).await;

        assert!(matches!(events.last(), Some(RagEvent::Relates(r)) if r.is_empty()));
        // The answer path was unaffected.
        let record = f.store.get(id).await.unwrap();
        assert_eq!(record.content, "Rust is fast [citation](1) and safe.");
        assert_eq!(record.relates, Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_dedup_hit_replays_existing_record() {
        let f = fixture(false, LlmMode::Ok);
        let prior = f.store.create("why rust").await;
        f.store
            .patch_content(prior.id, "stored answer".into())
            .await
            .unwrap();
        f.index.upsert(prior.id, vec![1.0, 0.0]).await.unwrap();

        let outcome = f
            .orchestrator
            .submit("why is rust good", None, None)
            .await
            .unwrap();
        match outcome {
            QueryOutcome::Replay(record) => {
                assert_eq!(record.id, prior.id);
                assert_eq!(record.content, "stored answer");
            }
            QueryOutcome::Live { .. } => panic!("expected dedup replay"),
        }
    }

    #[tokio::test]
    async fn test_replay_by_search_uuid() {
        let f = fixture(false, LlmMode::Ok);
        let prior = f.store.create("old query").await;

        let outcome = f
            .orchestrator
            .submit("completely different", Some(prior.id), None)
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Replay(r) if r.id == prior.id));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let f = fixture(false, LlmMode::Ok);
        let err = f.orchestrator.submit("  [INST][/INST] ", None, None).await.err().unwrap();
        assert!(matches!(err, QueryError::EmptyQuery));
    }
}
