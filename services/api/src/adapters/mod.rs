pub mod chat;
pub mod db;
pub mod embeddings;
pub mod llm_json;
pub mod ollama;
pub mod prompts;

pub use chat::ChatModelAdapter;
pub use db::DbAdapter;
pub use embeddings::RemoteEmbeddingAdapter;
pub use ollama::{OllamaEmbeddingAdapter, OllamaModelResolver};
