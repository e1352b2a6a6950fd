//! services/api/src/adapters/ollama.rs
//!
//! Ollama's native HTTP API: batch embeddings with a fallback to the legacy
//! single-prompt endpoint, and chat model resolution from the installed models.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use inbox_assistant_core::ports::{EmbeddingService, PortError, PortResult};

use super::embeddings::{expect_count, read_embeddings};

pub const DEFAULT_CHAT_MODEL: &str = "llama3";

fn http_client() -> PortResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| PortError::Unexpected(format!("failed to build HTTP client: {e}")))
}

//=========================================================================================
// Endpoint Memo
//=========================================================================================

/// Which embedding endpoint the Ollama server answered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedEndpoint {
    /// `POST /api/embed` with `{model, input}`.
    Batch,
    /// `POST /api/embeddings` with `{model, prompt}`, one text per call.
    Legacy,
    /// The server refused or answered garbage; stop asking.
    Unavailable,
}

/// Remembers the first endpoint that worked so later calls skip probing.
#[derive(Debug, Default)]
pub struct EmbedEndpointCache {
    endpoint: Mutex<Option<EmbedEndpoint>>,
}

impl EmbedEndpointCache {
    pub fn get(&self) -> Option<EmbedEndpoint> {
        *self.endpoint.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, endpoint: EmbedEndpoint) {
        *self.endpoint.lock().unwrap_or_else(|p| p.into_inner()) = Some(endpoint);
    }

    pub fn reset(&self) {
        *self.endpoint.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Result of one endpoint attempt.
enum Attempt {
    Embedded(Vec<Vec<f32>>),
    /// 404 or connection failure: try the next endpoint, memo untouched.
    Skip(String),
    /// Any other failure: the provider is unusable.
    Refused(PortError),
}

//=========================================================================================
// Embedding Adapter
//=========================================================================================

pub struct OllamaEmbeddingAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    cache: EmbedEndpointCache,
}

impl OllamaEmbeddingAdapter {
    pub fn new(base_url: &str, model: &str) -> PortResult<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            cache: EmbedEndpointCache::default(),
        })
    }

    pub fn endpoint_cache(&self) -> &EmbedEndpointCache {
        &self.cache
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, Attempt> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return Err(Attempt::Skip(format!("{url}: {e}"))),
        };
        let status = response.status();
        debug!(%url, status = %status, "Ollama embedding response received.");
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Attempt::Skip(format!("{url}: 404")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Attempt::Refused(PortError::Transport(format!("{url} returned {status}: {text}"))));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Attempt::Refused(PortError::MalformedResponse(e.to_string())))
    }

    async fn embed_batch(&self, texts: &[String]) -> Attempt {
        match self.post("/api/embed", json!({ "model": self.model, "input": texts })).await {
            Ok(body) => match read_embeddings(&body) {
                Some(vectors) => Attempt::Embedded(vectors),
                None => Attempt::Refused(PortError::MalformedResponse(
                    "unrecognized /api/embed response".to_string(),
                )),
            },
            Err(attempt) => attempt,
        }
    }

    async fn embed_legacy(&self, texts: &[String]) -> Attempt {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match self.post("/api/embeddings", json!({ "model": self.model, "prompt": text })).await {
                Ok(body) => match read_embeddings(&body).and_then(|mut rows| rows.pop()) {
                    Some(vector) => vectors.push(vector),
                    None => {
                        return Attempt::Refused(PortError::MalformedResponse(
                            "unrecognized /api/embeddings response".to_string(),
                        ))
                    }
                },
                Err(attempt) => return attempt,
            }
        }
        Attempt::Embedded(vectors)
    }
}

#[async_trait]
impl EmbeddingService for OllamaEmbeddingAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let candidates: &[EmbedEndpoint] = match self.cache.get() {
            Some(EmbedEndpoint::Unavailable) => {
                return Err(PortError::Transport("Ollama embeddings marked unavailable".to_string()))
            }
            Some(EmbedEndpoint::Batch) => &[EmbedEndpoint::Batch],
            Some(EmbedEndpoint::Legacy) => &[EmbedEndpoint::Legacy],
            None => &[EmbedEndpoint::Batch, EmbedEndpoint::Legacy],
        };

        let mut last_skip = String::new();
        for endpoint in candidates {
            let attempt = match endpoint {
                EmbedEndpoint::Legacy => self.embed_legacy(texts).await,
                _ => self.embed_batch(texts).await,
            };
            match attempt {
                Attempt::Embedded(vectors) => {
                    if self.cache.get() != Some(*endpoint) {
                        info!(endpoint = ?endpoint, "Ollama embedding endpoint selected.");
                        self.cache.set(*endpoint);
                    }
                    return expect_count(vectors, texts.len());
                }
                Attempt::Skip(reason) => {
                    debug!(%reason, "Ollama embedding endpoint skipped.");
                    last_skip = reason;
                }
                Attempt::Refused(e) => {
                    warn!(error = %e, "Ollama embeddings unavailable; disabling.");
                    self.cache.set(EmbedEndpoint::Unavailable);
                    return Err(e);
                }
            }
        }
        warn!(reason = %last_skip, "No Ollama embedding endpoint answered; disabling.");
        self.cache.set(EmbedEndpoint::Unavailable);
        Err(PortError::Transport(format!("no Ollama embedding endpoint answered ({last_skip})")))
    }
}

//=========================================================================================
// Chat Model Resolution
//=========================================================================================

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Picks the chat model to use against an Ollama server.
///
/// An explicitly configured model always wins. Otherwise the installed models
/// are listed once: the default model if present, else the first one listed.
pub struct OllamaModelResolver {
    client: reqwest::Client,
    base_url: String,
    explicit: Option<String>,
    resolved: Mutex<Option<String>>,
}

impl OllamaModelResolver {
    pub fn new(base_url: &str, explicit: Option<String>) -> PortResult<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            explicit,
            resolved: Mutex::new(None),
        })
    }

    pub async fn resolve(&self) -> String {
        if let Some(model) = &self.explicit {
            return model.clone();
        }
        let cached = self.resolved.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(model) = cached {
            return model;
        }
        match self.installed_models().await {
            Ok(names) => {
                let chosen = pick_model(&names);
                info!(model = %chosen, "Resolved Ollama chat model.");
                *self.resolved.lock().unwrap_or_else(|p| p.into_inner()) = Some(chosen.clone());
                chosen
            }
            Err(e) => {
                warn!(error = %e, "Could not list Ollama models; using the default.");
                DEFAULT_CHAT_MODEL.to_string()
            }
        }
    }

    async fn installed_models(&self) -> PortResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PortError::Transport(format!("/api/tags returned {}", response.status())));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| PortError::MalformedResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn pick_model(names: &[String]) -> String {
    let is_default = |name: &String| {
        name == DEFAULT_CHAT_MODEL || name.starts_with(&format!("{DEFAULT_CHAT_MODEL}:"))
    };
    names
        .iter()
        .find(|n| is_default(*n))
        .or_else(|| names.first())
        .cloned()
        .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string())
}
