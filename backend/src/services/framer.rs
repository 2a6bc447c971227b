//! Encodes orchestrator output into the sentinel-delimited response body.

use actix_web::web::Bytes;
use async_stream::stream;
use futures::{Stream, StreamExt};
use searchhub_models::protocol::{
    LLM_RESPONSE_SENTINEL, RELATED_QUESTIONS_SENTINEL, SENTINEL_PADDING,
};
use searchhub_models::{SearchRecord, Source};

use super::orchestrator::RagEvent;

fn sources_json(sources: &[Source]) -> String {
    serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string())
}

fn relates_json(relates: &[String]) -> String {
    serde_json::to_string(relates).unwrap_or_else(|_| "[]".to_string())
}

/// Maps the event stream onto framed body chunks. Event order (sources,
/// deltas, relates) is the orchestrator's contract; the framer only
/// inserts the sentinels.
pub fn frame_events(
    events: impl Stream<Item = RagEvent> + Unpin,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            match event {
                RagEvent::Sources(sources) => {
                    yield Ok(Bytes::from(sources_json(&sources)));
                    yield Ok(Bytes::from(format!(
                        "{SENTINEL_PADDING}{LLM_RESPONSE_SENTINEL}{SENTINEL_PADDING}"
                    )));
                }
                RagEvent::Delta(delta) => {
                    yield Ok(Bytes::from(delta));
                }
                RagEvent::Relates(relates) => {
                    yield Ok(Bytes::from(format!(
                        "{SENTINEL_PADDING}{RELATED_QUESTIONS_SENTINEL}{SENTINEL_PADDING}"
                    )));
                    yield Ok(Bytes::from(relates_json(&relates)));
                }
            }
        }
    }
}

/// Renders a completed record as one framed buffer, for replaying dedup
/// hits and shared links.
pub fn frame_record(record: &SearchRecord) -> Bytes {
    let mut framed = String::with_capacity(record.content.len() + 256);
    framed.push_str(&sources_json(&record.sources));
    framed.push_str(SENTINEL_PADDING);
    framed.push_str(LLM_RESPONSE_SENTINEL);
    framed.push_str(SENTINEL_PADDING);
    framed.push_str(&record.content);
    framed.push_str(SENTINEL_PADDING);
    framed.push_str(RELATED_QUESTIONS_SENTINEL);
    framed.push_str(SENTINEL_PADDING);
    framed.push_str(&relates_json(&record.relates));
    Bytes::from(framed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchhub_models::SearchRecord;

    async fn frame_to_string(events: Vec<RagEvent>) -> String {
        let framed: Vec<_> = frame_events(futures::stream::iter(events)).collect().await;
        framed
            .into_iter()
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_frames_all_three_sections_in_order() {
        let body = frame_to_string(vec![
            RagEvent::Sources(vec![Source::new("A", "u", "s")]),
            RagEvent::Delta("Hello ".to_string()),
            RagEvent::Delta("world".to_string()),
            RagEvent::Relates(vec!["Q1?".to_string()]),
        ])
        .await;

        let llm_at = body.find(LLM_RESPONSE_SENTINEL).unwrap();
        let related_at = body.find(RELATED_QUESTIONS_SENTINEL).unwrap();
        assert!(llm_at < related_at);
        assert!(body[..llm_at].trim().starts_with('['));
        assert!(body[llm_at..related_at].contains("Hello world"));
        assert!(body.ends_with("[\"Q1?\"]"));
    }

    #[tokio::test]
    async fn test_empty_relates_framed_as_empty_array() {
        let body = frame_to_string(vec![
            RagEvent::Sources(vec![]),
            RagEvent::Relates(vec![]),
        ])
        .await;
        assert!(body.ends_with("[]"));
    }

    #[tokio::test]
    async fn test_record_replay_matches_live_framing() {
        let mut record = SearchRecord::new("q");
        record.sources = vec![Source::new("A", "u", "s")];
        record.content = "Hello world".to_string();
        record.relates = vec!["Q1?".to_string()];

        let replay = String::from_utf8(frame_record(&record).to_vec()).unwrap();
        let live = frame_to_string(vec![
            RagEvent::Sources(record.sources.clone()),
            RagEvent::Delta(record.content.clone()),
            RagEvent::Relates(record.relates.clone()),
        ])
        .await;
        assert_eq!(replay, live);
    }
}
