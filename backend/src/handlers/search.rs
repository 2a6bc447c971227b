use actix_web::web::Bytes;
use actix_web::{web, HttpResponse};
use async_stream::stream;
use searchhub_models::SearchSnapshot;
use uuid::Uuid;

use crate::state::AppState;

/// `GET /api/search/{id}`: one-shot snapshot of a record.
pub async fn get_search(path: web::Path<Uuid>, state: web::Data<AppState>) -> HttpResponse {
    match state.store.get(*path).await {
        Some(record) => HttpResponse::Ok().json(SearchSnapshot::from(record)),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "search record not found"
        })),
    }
}

/// `GET /api/search/{id}/subscribe`: server-sent snapshots of a record,
/// one per applied patch, so a reader watches the answer grow without
/// polling.
pub async fn subscribe_search(path: web::Path<Uuid>, state: web::Data<AppState>) -> HttpResponse {
    let Some(mut rx) = state.store.watch(*path).await else {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "search record not found"
        }));
    };

    let events = stream! {
        loop {
            let snapshot = SearchSnapshot::from(rx.borrow_and_update().clone());
            match serde_json::to_string(&snapshot) {
                Ok(json) => yield Ok::<_, actix_web::Error>(Bytes::from(format!("data: {json}\n\n"))),
                Err(e) => {
                    log::error!("failed to serialize snapshot for {}: {e}", snapshot.id);
                    break;
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(events)
}
