use actix_web::{web, HttpResponse};
use futures::stream;
use searchhub_models::QueryRequest;

use crate::errors::QueryError;
use crate::services::framer::{frame_events, frame_record};
use crate::services::orchestrator::QueryOutcome;
use crate::state::AppState;

/// `POST /api/query`: runs (or replays) a search and streams the framed
/// response body.
pub async fn query(req: web::Json<QueryRequest>, state: web::Data<AppState>) -> HttpResponse {
    let request = req.into_inner();
    log::info!("query request: {:?}", request.query);

    match state
        .orchestrator
        .submit(
            &request.query,
            request.search_uuid,
            request.generate_related_questions,
        )
        .await
    {
        Ok(QueryOutcome::Replay(record)) => {
            let body = frame_record(&record);
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .insert_header(("x-search-id", record.id.to_string()))
                .streaming(stream::once(async move {
                    Ok::<_, actix_web::Error>(body)
                }))
        }
        Ok(QueryOutcome::Live { id, events }) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header(("x-search-id", id.to_string()))
            .streaming(frame_events(events)),
        Err(QueryError::EmptyQuery) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": "query must not be empty"
        })),
        Err(QueryError::RateLimited) => {
            log::warn!("query rate limited upstream");
            HttpResponse::TooManyRequests().json(serde_json::json!({
                "error": "rate limited by upstream provider"
            }))
        }
        Err(QueryError::Generation(e)) => {
            log::error!("query generation failed: {e}");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "generation failed",
                "details": e
            }))
        }
    }
}
