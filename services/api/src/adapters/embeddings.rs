//! services/api/src/adapters/embeddings.rs
//!
//! OpenAI-compatible embedding endpoint (`POST {base}/embeddings`) and the
//! response-shape reader shared with the Ollama adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use inbox_assistant_core::ports::{EmbeddingService, PortError, PortResult};

use crate::config::RemoteEmbeddingConfig;

/// Reads any of the known embedding response shapes:
/// `{"embeddings": [[..]]}`, `{"data": [{"embedding": [..]}]}` or `{"embedding": [..]}`.
pub fn read_embeddings(body: &Value) -> Option<Vec<Vec<f32>>> {
    if let Some(rows) = body.get("embeddings").and_then(Value::as_array) {
        return Some(rows.iter().map(read_vector).collect());
    }
    if let Some(items) = body.get("data").and_then(Value::as_array) {
        return Some(
            items
                .iter()
                .map(|item| item.get("embedding").map(read_vector).unwrap_or_default())
                .collect(),
        );
    }
    if let Some(single) = body.get("embedding").filter(|v| v.is_array()) {
        return Some(vec![read_vector(single)]);
    }
    None
}

fn read_vector(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|xs| xs.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
        .unwrap_or_default()
}

/// Checks the one-vector-per-input contract.
pub fn expect_count(vectors: Vec<Vec<f32>>, expected: usize) -> PortResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(PortError::MalformedResponse(format!(
            "expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    Ok(vectors)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Debug, Clone)]
pub struct RemoteEmbeddingAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl RemoteEmbeddingAdapter {
    pub fn new(config: &RemoteEmbeddingConfig) -> PortResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddingAdapter {
    fn name(&self) -> &str {
        "remote"
    }

    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortError::Transport(format!("embedding request failed: {e}")))?;
        let status = response.status();
        debug!(status = %status, count = texts.len(), "Remote embedding response received.");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Transport(format!("embedding endpoint returned {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PortError::MalformedResponse(e.to_string()))?;
        let vectors = read_embeddings(&body)
            .ok_or_else(|| PortError::MalformedResponse("unrecognized embedding response".to_string()))?;
        expect_count(vectors, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer, api_key: Option<&str>) -> RemoteEmbeddingAdapter {
        RemoteEmbeddingAdapter::new(&RemoteEmbeddingConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: api_key.map(str::to_string),
            model: "text-embedding-3-small".to_string(),
        })
        .unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn reads_all_known_shapes() {
        assert_eq!(
            read_embeddings(&json!({ "embeddings": [[1.0, 2.0], [3.0]] })),
            Some(vec![vec![1.0, 2.0], vec![3.0]])
        );
        assert_eq!(
            read_embeddings(&json!({ "data": [{ "embedding": [0.5] }, { "index": 1 }] })),
            Some(vec![vec![0.5], vec![]])
        );
        assert_eq!(read_embeddings(&json!({ "embedding": [1.0] })), Some(vec![vec![1.0]]));
        assert_eq!(read_embeddings(&json!({ "vectors": [] })), None);
    }

    #[tokio::test]
    async fn posts_batch_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "text-embedding-3-small", "input": ["a", "b"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [1.0, 0.0] }, { "embedding": [0.0, 1.0] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = adapter(&server, Some("sk-test")).embed(&texts(&["a", "b"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn count_mismatch_and_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({ "input": ["one", "two"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0]] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({ "input": ["boom"] })))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let adapter = adapter(&server, None);
        assert!(matches!(
            adapter.embed(&texts(&["one", "two"])).await,
            Err(PortError::MalformedResponse(_))
        ));
        assert!(matches!(adapter.embed(&texts(&["boom"])).await, Err(PortError::Transport(_))));
        assert!(adapter.embed(&[]).await.unwrap().is_empty());
    }
}
