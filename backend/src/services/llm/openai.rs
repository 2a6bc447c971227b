use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, EmbeddingInput,
        FunctionObjectArgs, Stop,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use futures::StreamExt;
use phf::phf_map;
use serde::Deserialize;

use super::{EmbeddingClient, GenerationClient, GenerationError, TokenStream};
use crate::services::prompts::STOP_WORDS;

static DEFAULT_EMBEDDING_DIMENSIONS: phf::Map<&str, u32> = phf_map! {
    "text-embedding-3-small" => 1536,
    "text-embedding-3-large" => 3072,
    "text-embedding-ada-002" => 1536,
};

const ANSWER_MAX_TOKENS: u16 = 1024;
const RELATED_MAX_TOKENS: u16 = 512;

/// OpenAI-compatible backend for answer generation, related questions and
/// query embeddings. `base_url` lets deployments point at any provider that
/// speaks the same API.
pub struct OpenAiClient {
    client: OpenAIClient<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        chat_model: String,
        embedding_model: String,
    ) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = base_url {
            config = config.with_api_base(base_url);
        }
        Self {
            client: OpenAIClient::with_config(config),
            chat_model,
            embedding_model,
        }
    }

    fn chat_messages(
        system_prompt: &str,
        user_text: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()?
                .into(),
        ])
    }
}

fn map_openai_error(err: OpenAIError) -> GenerationError {
    if let OpenAIError::ApiError(api) = &err {
        let kind = api.r#type.as_deref().unwrap_or("");
        if kind.contains("rate_limit")
            || kind.contains("insufficient_quota")
            || api.message.to_ascii_lowercase().contains("rate limit")
        {
            return GenerationError::RateLimited;
        }
    }
    GenerationError::Upstream(err.to_string())
}

#[derive(Deserialize)]
struct RelatedQuestionsArgs {
    #[serde(default)]
    questions: Vec<String>,
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn stream_answer(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<TokenStream, GenerationError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(Self::chat_messages(system_prompt, user_text).map_err(map_openai_error)?)
            .temperature(0.9)
            .max_tokens(ANSWER_MAX_TOKENS)
            .stop(Stop::StringArray(
                STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            ))
            .build()
            .map_err(map_openai_error)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        Ok(Box::pin(stream.map(|item| match item {
            Ok(resp) => Ok(resp
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
                .unwrap_or_default()),
            Err(err) => Err(map_openai_error(err)),
        })))
    }

    async fn related_questions(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<Vec<String>, GenerationError> {
        let tool = ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(
                FunctionObjectArgs::default()
                    .name("ask_related_questions")
                    .description("ask further questions that are related to the input and output.")
                    .parameters(serde_json::json!({
                        "type": "object",
                        "properties": {
                            "questions": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "related question to the original question and context."
                            }
                        }
                    }))
                    .build()
                    .map_err(map_openai_error)?,
            )
            .build()
            .map_err(map_openai_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(Self::chat_messages(system_prompt, user_text).map_err(map_openai_error)?)
            .tools(vec![tool])
            .max_tokens(RELATED_MAX_TOKENS)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let Some(tool_call) = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.tool_calls)
            .and_then(|calls| calls.into_iter().next())
        else {
            // The model declined to call the tool; nothing to suggest.
            return Ok(Vec::new());
        };

        let parsed: RelatedQuestionsArgs = serde_json::from_str(&tool_call.function.arguments)
            .map_err(|e| GenerationError::Upstream(format!("malformed tool arguments: {e}")))?;
        Ok(parsed.questions)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| anyhow!("failed to build embedding request: {e}"))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| anyhow!("failed to create embedding: {e}"))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("no embedding returned from provider"))
    }

    fn embedding_dimension(&self) -> Option<u32> {
        DEFAULT_EMBEDDING_DIMENSIONS
            .get(self.embedding_model.as_str())
            .copied()
    }
}
