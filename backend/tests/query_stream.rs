//! End-to-end: HTTP request in, framed stream out, parsed back by the
//! client crate's parser.

use std::sync::Arc;

use actix_web::{test, web, App};
use anyhow::{bail, Result};
use async_trait::async_trait;
use searchhub_backend::routes::configure_routes;
use searchhub_backend::services::dedup::DedupCache;
use searchhub_backend::services::llm::{
    EmbeddingClient, GenerationClient, GenerationError, TokenStream,
};
use searchhub_backend::services::orchestrator::{OrchestratorConfig, RagOrchestrator};
use searchhub_backend::services::search_provider::SearchProvider;
use searchhub_backend::services::store::{MemorySearchStore, SearchStore};
use searchhub_backend::services::vector_index::MemoryVectorIndex;
use searchhub_backend::state::AppState;
use searchhub_client::{ParseEvent, StreamParser};
use searchhub_models::Source;

struct StubRetriever;

#[async_trait]
impl SearchProvider for StubRetriever {
    async fn search(&self, _query: &str) -> Result<Vec<Source>> {
        Ok(vec![Source::new("A", "https://a.example", "snippet a")])
    }
}

struct StubLlm {
    rate_limited: bool,
}

#[async_trait]
impl GenerationClient for StubLlm {
    async fn stream_answer(
        &self,
        _system_prompt: &str,
        _user_text: &str,
    ) -> Result<TokenStream, GenerationError> {
        if self.rate_limited {
            return Err(GenerationError::RateLimited);
        }
        let deltas: Vec<Result<String, GenerationError>> = vec![
            Ok("Hello [[cit".to_string()),
            Ok("ation:1]] world".to_string()),
        ];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }

    async fn related_questions(
        &self,
        _system_prompt: &str,
        _user_text: &str,
    ) -> Result<Vec<String>, GenerationError> {
        Ok(vec!["Q1?".to_string(), "Q2?".to_string()])
    }
}

struct StubEmbedder;

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("no embedding provider in tests")
    }

    fn embedding_dimension(&self) -> Option<u32> {
        None
    }
}

fn build_state(rate_limited: bool) -> (web::Data<AppState>, Arc<MemorySearchStore>) {
    let store = Arc::new(MemorySearchStore::new());
    let dedup = Arc::new(DedupCache::new(
        Arc::new(StubEmbedder),
        Arc::new(MemoryVectorIndex::new()),
        None,
    ));
    let orchestrator = Arc::new(RagOrchestrator::new(
        store.clone(),
        Arc::new(StubRetriever),
        Arc::new(StubLlm { rate_limited }),
        dedup,
        OrchestratorConfig::default(),
    ));
    (
        web::Data::new(AppState::new(store.clone(), orchestrator)),
        store,
    )
}

#[actix_web::test]
async fn test_query_roundtrip_through_parser() {
    let (state, store) = build_state(false);
    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/api/query")
        .set_json(serde_json::json!({ "query": "why rust" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = test::read_body(resp).await;
    let mut parser = StreamParser::new();
    let mut events = parser.feed(&body);
    events.extend(parser.finish());

    assert!(matches!(&events[0], ParseEvent::Sources(s) if s.len() == 1));
    let answer = events.iter().rev().find_map(|e| match e {
        ParseEvent::Answer(a) => Some(a.clone()),
        _ => None,
    });
    assert_eq!(answer.as_deref(), Some("Hello [citation](1) world"));
    assert!(matches!(
        events.last(),
        Some(ParseEvent::Relates(r)) if r == &vec!["Q1?".to_string(), "Q2?".to_string()]
    ));

    // The record persisted the rewritten answer and the relates patch.
    let records = store.missing_embeddings(10).await;
    assert_eq!(records.len(), 1);
    let record = store.get(records[0].id).await.unwrap();
    assert_eq!(record.content, "Hello [citation](1) world");
    assert_eq!(record.relates.len(), 2);
}

#[actix_web::test]
async fn test_empty_query_is_bad_request() {
    let (state, _) = build_state(false);
    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/api/query")
        .set_json(serde_json::json!({ "query": "   " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn test_rate_limited_generation_maps_to_429() {
    let (state, _) = build_state(true);
    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/api/query")
        .set_json(serde_json::json!({ "query": "why rust" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 429);
}

#[actix_web::test]
async fn test_replay_by_search_uuid_returns_stored_frame() {
    let (state, store) = build_state(false);
    let record = store.create("old query").await;
    store
        .patch_content(record.id, "stored answer".to_string())
        .await
        .unwrap();
    store
        .patch_relates(record.id, vec!["R?".to_string()])
        .await
        .unwrap();

    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;
    let req = test::TestRequest::post()
        .uri("/api/query")
        .set_json(serde_json::json!({ "query": "anything", "search_uuid": record.id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let mut parser = StreamParser::new();
    let mut events = parser.feed(&body);
    events.extend(parser.finish());

    let answer = events.iter().rev().find_map(|e| match e {
        ParseEvent::Answer(a) => Some(a.clone()),
        _ => None,
    });
    assert_eq!(answer.as_deref(), Some("stored answer"));
    assert!(matches!(
        events.last(),
        Some(ParseEvent::Relates(r)) if r == &vec!["R?".to_string()]
    ));
}

#[actix_web::test]
async fn test_search_snapshot_and_missing_record() {
    let (state, store) = build_state(false);
    let record = store.create("q").await;
    store
        .patch_sources(record.id, vec![Source::new("A", "u", "s")])
        .await
        .unwrap();

    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/search/{}", record.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let snapshot: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(snapshot["query"], "q");
    assert_eq!(snapshot["sources"][0]["name"], "A");

    let req = test::TestRequest::get()
        .uri(&format!("/api/search/{}", uuid::Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_web::test]
async fn test_health_endpoint() {
    let (state, _) = build_state(false);
    let app =
        test::init_service(App::new().app_data(state).configure(configure_routes)).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
}
