pub mod openai;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use openai::OpenAiClient;

/// Stream of answer text deltas in generation order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("rate limited by generation provider")]
    RateLimited,
    #[error("generation provider failure: {0}")]
    Upstream(String),
}

/// Answer and related-question generation.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Streaming chat completion for the grounded answer.
    async fn stream_answer(&self, system_prompt: &str, user_text: &str)
        -> Result<TokenStream, GenerationError>;

    /// Single structured tool call returning follow-up question strings.
    /// A response carrying no tool call yields an empty list; malformed tool
    /// arguments are an error the caller degrades to an empty list.
    async fn related_questions(&self, system_prompt: &str, user_text: &str)
        -> Result<Vec<String>, GenerationError>;
}

/// Text to fixed-dimension vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Known output dimension for the configured model, if any.
    fn embedding_dimension(&self) -> Option<u32>;
}
