use thiserror::Error;

/// Failures a query request can surface to the caller. Everything else in
/// the pipeline (retrieval, related questions, dedup, persistence of
/// partials) is contained at its own boundary and degrades locally.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("rate limited by upstream provider")]
    RateLimited,
    #[error("upstream generation failure: {0}")]
    Generation(String),
}
