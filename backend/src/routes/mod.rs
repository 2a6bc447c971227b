use actix_web::web;

use crate::handlers;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/query", web::post().to(handlers::query))
            .route("/search/{id}", web::get().to(handlers::get_search))
            .route("/search/{id}/subscribe", web::get().to(handlers::subscribe_search)),
    )
    .route("/health", web::get().to(handlers::health_check));
}
