//! services/api/src/adapters/chat.rs
//!
//! This module contains the adapter for OpenAI-compatible chat models.
//! It implements the `LanguageModelService` port from the `core` crate and is
//! instantiated once per configured provider (Groq, Gemini, Ollama).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use inbox_assistant_core::{
    domain::AnalysisResult,
    ports::{CandidateText, DraftRequest, LanguageModelService, PortError, PortResult, RelevanceVerdict},
};

use super::llm_json::{parse_analysis, parse_relevance, parse_similar_ids};
use super::ollama::OllamaModelResolver;
use super::prompts;
use crate::config::ChatProviderConfig;

const JUDGMENT_TEMPERATURE: f32 = 0.0;
const DRAFT_TEMPERATURE: f32 = 0.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the model name comes from.
pub enum ChatModel {
    Fixed(String),
    /// Looked up from the Ollama server on first use.
    Ollama(Arc<OllamaModelResolver>),
}

impl ChatModel {
    async fn name(&self) -> String {
        match self {
            ChatModel::Fixed(model) => model.clone(),
            ChatModel::Ollama(resolver) => resolver.resolve().await,
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `LanguageModelService` using an OpenAI-compatible LLM.
pub struct ChatModelAdapter {
    provider: String,
    client: Client<OpenAIConfig>,
    model: ChatModel,
    timeout: Duration,
}

impl ChatModelAdapter {
    /// Creates a new `ChatModelAdapter`.
    pub fn new(provider: impl Into<String>, client: Client<OpenAIConfig>, model: ChatModel) -> Self {
        Self {
            provider: provider.into(),
            client,
            model,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Builds the adapter for one configured provider.
    pub fn from_config(config: &ChatProviderConfig, ollama_base_url: &str) -> PortResult<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.base_url);
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        let model = match &config.model {
            Some(model) => ChatModel::Fixed(model.clone()),
            None => ChatModel::Ollama(Arc::new(OllamaModelResolver::new(ollama_base_url, None)?)),
        };
        Ok(Self::new(config.kind.as_str(), Client::with_config(openai_config), model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends one system + user exchange and returns the first choice's text.
    async fn complete(&self, system: String, user: String, temperature: f32) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let model = self.model.name().await;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&model)
            .messages(messages)
            .temperature(temperature)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| PortError::Transport(format!("{} timed out after {:?}", self.provider, self.timeout)))?
            .map_err(|e: OpenAIError| match e {
                OpenAIError::JSONDeserialize(..) => PortError::MalformedResponse(e.to_string()),
                other => PortError::Transport(other.to_string()),
            })?;
        debug!(provider = %self.provider, %model, "Chat completion received.");

        // Extract the text content from the first choice in the response.
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PortError::MalformedResponse(format!("{} returned no text content", self.provider)))
    }
}

//=========================================================================================
// `LanguageModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LanguageModelService for ChatModelAdapter {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn judge_similarity(&self, target_text: &str, candidates: &[CandidateText]) -> PortResult<Vec<String>> {
        let (system, user) = prompts::judge_similarity(target_text, candidates);
        let raw = self.complete(system, user, JUDGMENT_TEMPERATURE).await?;
        parse_similar_ids(&raw)
    }

    async fn classify(&self, text: &str) -> PortResult<AnalysisResult> {
        let (system, user) = prompts::classify(text);
        let raw = self.complete(system, user, JUDGMENT_TEMPERATURE).await?;
        parse_analysis(&raw)
    }

    async fn draft_reply(&self, request: &DraftRequest) -> PortResult<String> {
        let (system, user) = prompts::draft_reply(request);
        let raw = self.complete(system, user, DRAFT_TEMPERATURE).await?;
        let text = raw.trim();
        if text.is_empty() {
            return Err(PortError::MalformedResponse(format!("{} returned an empty draft", self.provider)));
        }
        Ok(text.to_string())
    }

    async fn assess_relevance(&self, subject: &str, body: &str) -> PortResult<RelevanceVerdict> {
        let (system, user) = prompts::assess_relevance(subject, body);
        let raw = self.complete(system, user, JUDGMENT_TEMPERATURE).await?;
        parse_relevance(&raw)
    }
}
