//! crates/inbox_assistant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or model APIs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{AnalysisResult, BusinessPolicy, Message};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The remote side could not be reached, timed out, or answered with an error status.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// The remote side answered, but not in the shape we asked for.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Port Payloads
//=========================================================================================

/// A candidate handed to a language model for a same-issue judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateText {
    pub id: String,
    pub text: String,
}

/// Everything a model needs to draft a reply.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub message_text: String,
    pub sender_name: String,
    /// Pre-rendered `title: content` blocks, already truncated.
    pub policy_context: String,
    pub business_name: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    pub reason: Option<String>,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Row-oriented persistence keyed by user id and message id.
#[async_trait]
pub trait MessageStore: Send + Sync {
    // --- Messages ---
    async fn list_messages(&self, user_id: Uuid) -> PortResult<Vec<Message>>;

    async fn get_message(&self, user_id: Uuid, message_id: &str) -> PortResult<Message>;

    async fn existing_message_ids(&self, user_id: Uuid) -> PortResult<Vec<String>>;

    async fn upsert_messages(&self, user_id: Uuid, messages: &[Message]) -> PortResult<()>;

    async fn update_analysis(
        &self,
        user_id: Uuid,
        message_id: &str,
        analysis: &AnalysisResult,
    ) -> PortResult<()>;

    async fn save_suggested_reply(
        &self,
        user_id: Uuid,
        message_id: &str,
        reply: &str,
    ) -> PortResult<()>;

    async fn mark_replied(&self, user_id: Uuid, message_ids: &[String]) -> PortResult<()>;

    /// Deletes the given ids and returns how many rows were removed.
    async fn delete_messages(&self, user_id: Uuid, message_ids: &[String]) -> PortResult<u64>;

    // --- Policies ---
    async fn list_policies(&self, user_id: Uuid) -> PortResult<Vec<BusinessPolicy>>;

    async fn create_policy(
        &self,
        user_id: Uuid,
        title: &str,
        content: &str,
        category: Option<&str>,
    ) -> PortResult<BusinessPolicy>;

    async fn update_policy(&self, user_id: Uuid, policy: &BusinessPolicy) -> PortResult<()>;

    async fn delete_policy(&self, user_id: Uuid, policy_id: &str) -> PortResult<()>;
}

/// Turns texts into fixed-length vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// A short label for logs.
    fn name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>>;
}

/// The capability interface every chat-capable model backend implements.
///
/// Implementations must treat model output as untrusted: anything that does not
/// validate against the expected JSON shape is reported as `MalformedResponse`.
#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// A short label for logs, e.g. `groq` or `ollama`.
    fn name(&self) -> &str;

    /// Returns the ids of candidates describing the same issue as the target.
    async fn judge_similarity(
        &self,
        target_text: &str,
        candidates: &[CandidateText],
    ) -> PortResult<Vec<String>>;

    async fn classify(&self, text: &str) -> PortResult<AnalysisResult>;

    async fn draft_reply(&self, request: &DraftRequest) -> PortResult<String>;

    /// Decides whether an inbound email is a genuine business inquiry.
    async fn assess_relevance(&self, subject: &str, body: &str) -> PortResult<RelevanceVerdict>;
}
