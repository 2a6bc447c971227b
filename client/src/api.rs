use futures::StreamExt;
use searchhub_models::QueryRequest;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::parser::{ParseEvent, StreamParser};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rate limited by server")]
    RateLimited,
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Per-payload callbacks, fired as the parser completes each section.
pub struct StreamCallbacks {
    pub on_sources: Box<dyn FnMut(Vec<searchhub_models::Source>) + Send>,
    pub on_answer: Box<dyn FnMut(String) + Send>,
    pub on_relates: Box<dyn FnMut(Vec<String>) + Send>,
}

impl StreamCallbacks {
    fn dispatch(&mut self, events: Vec<ParseEvent>) {
        for event in events {
            match event {
                ParseEvent::Sources(sources) => (self.on_sources)(sources),
                ParseEvent::Answer(answer) => (self.on_answer)(answer),
                ParseEvent::Relates(relates) => (self.on_relates)(relates),
            }
        }
    }
}

/// Cooperative abort for an in-flight query stream.
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn abort_channel() -> (AbortHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, rx)
}

/// Streams query responses from the backend and feeds them through a
/// fresh parser per request.
pub struct QueryClient {
    http: reqwest::Client,
    base_url: String,
}

impl QueryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Runs one query to completion, or until `abort` fires. After an
    /// abort no further callbacks are invoked; whatever was already
    /// delivered stays delivered.
    pub async fn stream_query(
        &self,
        query: &str,
        search_uuid: Option<Uuid>,
        callbacks: &mut StreamCallbacks,
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/query", self.base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&QueryRequest {
                query: query.to_string(),
                search_uuid,
                generate_related_questions: None,
            })
            .send()
            .await?;

        // 429 gets its own variant so the UI can say "slow down" instead
        // of a generic failure.
        match response.status().as_u16() {
            200 => {}
            429 => return Err(ClientError::RateLimited),
            status => return Err(ClientError::Status(status)),
        }

        let mut parser = StreamParser::new();
        let mut body = response.bytes_stream();
        let mut abort = abort;

        loop {
            tokio::select! {
                biased;
                _ = wait_for_abort(&mut abort) => {
                    parser.cancel();
                    log::debug!("query stream aborted by caller");
                    return Ok(());
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => callbacks.dispatch(parser.feed(&bytes)),
                    Some(Err(e)) => {
                        // Partial results already dispatched remain valid.
                        parser.cancel();
                        return Err(ClientError::Transport(e));
                    }
                    None => {
                        callbacks.dispatch(parser.finish());
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Resolves only when the abort flag flips to true. A dropped or absent
/// handle never resolves, so the stream just runs to completion.
async fn wait_for_abort(abort: &mut Option<watch::Receiver<bool>>) {
    loop {
        match abort {
            Some(rx) => {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    *abort = None;
                }
            }
            None => futures::future::pending::<()>().await,
        }
    }
}
