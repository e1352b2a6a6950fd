//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use inbox_assistant_core::{
    domain::{AnalysisResult, BusinessPolicy, InboundMessage, Message, MessageCategory, ResponseCost},
    drafting::{plan_bulk_reply, OutgoingReply},
    filter::filter_messages,
    ports::PortError,
    sync::SyncReport,
    text::personalize,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use std::str::FromStr;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_messages_handler,
        similar_messages_handler,
        classify_message_handler,
        classify_pending_handler,
        draft_reply_handler,
        send_reply_handler,
        sync_handler,
        list_policies_handler,
        create_policy_handler,
        update_policy_handler,
        delete_policy_handler,
    ),
    components(schemas(
        MessageDto,
        AnalysisDto,
        SimilarMessagesResponse,
        ClassifyPendingResponse,
        DraftResponse,
        ReplyRequest,
        OutgoingReplyDto,
        ReplyResponse,
        InboundMessageDto,
        SyncRequest,
        SyncResponse,
        PolicyDto,
        PolicyPayload,
    )),
    tags(
        (name = "Inbox Assistant API", description = "Classify, triage and answer customer messages.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageDto {
    pub id: String,
    pub sender_name: String,
    pub sender_handle: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_replied: bool,
    pub category: String,
    pub sentiment: String,
    pub predicted_cost: String,
    pub tags: Vec<String>,
    pub suggested_reply: Option<String>,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            sender_name: m.sender_name.clone(),
            sender_handle: m.sender_handle.clone(),
            channel: m.channel.to_string(),
            subject: m.subject.clone(),
            body: m.body.clone(),
            received_at: m.received_at,
            is_read: m.is_read,
            is_replied: m.is_replied,
            category: m.category.to_string(),
            sentiment: m.sentiment.to_string(),
            predicted_cost: m.predicted_cost.to_string(),
            tags: m.tags.clone(),
            suggested_reply: m.suggested_reply.clone(),
        }
    }
}

/// Search and filter options for the message list.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessageFilterParams {
    /// Case-insensitive text matched against sender, subject and body.
    pub q: Option<String>,
    /// Comma-separated categories, e.g. `Shipping,Returns`.
    pub category: Option<String>,
    /// Comma-separated urgencies (predicted cost), e.g. `High,Medium`.
    pub urgency: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AnalysisDto {
    pub category: String,
    pub sentiment: String,
    pub predicted_cost: String,
    pub tags: Vec<String>,
}

impl From<AnalysisResult> for AnalysisDto {
    fn from(a: AnalysisResult) -> Self {
        Self {
            category: a.category.to_string(),
            sentiment: a.sentiment.to_string(),
            predicted_cost: a.predicted_cost.to_string(),
            tags: a.tags,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SimilarMessagesResponse {
    pub ids: Vec<String>,
    pub messages: Vec<MessageDto>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ClassifyPendingResponse {
    pub classified: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DraftResponse {
    /// The draft with the `{NAME}` placeholder in place of the sender's first name.
    pub template: String,
    /// The draft personalized for the target's sender.
    pub preview: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ReplyRequest {
    /// Reply text using `{NAME}`. Defaults to the stored suggested reply.
    pub template: Option<String>,
    /// Similar messages to answer with the same reply.
    #[serde(default)]
    pub similar_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct OutgoingReplyDto {
    pub message_id: String,
    pub recipient: String,
    pub text: String,
}

impl From<OutgoingReply> for OutgoingReplyDto {
    fn from(r: OutgoingReply) -> Self {
        Self {
            message_id: r.message_id,
            recipient: r.recipient,
            text: r.text,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReplyResponse {
    pub replies: Vec<OutgoingReplyDto>,
}

/// A message handed over by the mail collaborator.
#[derive(Deserialize, ToSchema)]
pub struct InboundMessageDto {
    pub id: String,
    pub thread_id: Option<String>,
    /// Raw `From` header, e.g. `Jane Doe <jane@example.com>`.
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl From<InboundMessageDto> for InboundMessage {
    fn from(dto: InboundMessageDto) -> Self {
        InboundMessage {
            id: dto.id,
            thread_id: dto.thread_id,
            from: dto.from,
            subject: dto.subject,
            body: dto.body,
            received_at: dto.received_at.unwrap_or_else(Utc::now),
            labels: dto.labels,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SyncRequest {
    pub messages: Vec<InboundMessageDto>,
    /// Delete stored messages that are now judged irrelevant. Defaults to true.
    pub purge_irrelevant: Option<bool>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    pub message: String,
    pub synced: usize,
    pub skipped: usize,
    pub purged: u64,
}

impl From<SyncReport> for SyncResponse {
    fn from(r: SyncReport) -> Self {
        Self {
            message: format!("Synced {} emails. Skipped {}. Purged {}.", r.synced, r.skipped, r.purged),
            synced: r.synced,
            skipped: r.skipped,
            purged: r.purged,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PolicyDto {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

impl From<BusinessPolicy> for PolicyDto {
    fn from(p: BusinessPolicy) -> Self {
        Self {
            id: p.id,
            title: p.title,
            content: p.content,
            category: p.category,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct PolicyPayload {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

fn port_failure(context: &str, e: PortError) -> HandlerError {
    match e {
        PortError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        other => {
            error!("{}: {:?}", context, other);
            (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}

//=========================================================================================
// Message Handlers
//=========================================================================================

/// List the caller's messages, newest first, optionally searched and filtered.
#[utoipa::path(
    get,
    path = "/messages",
    responses(
        (status = 200, description = "Matching stored messages", body = [MessageDto]),
        (status = 400, description = "Unknown category or urgency"),
        (status = 401, description = "Missing or invalid x-user-id header")
    ),
    params(
        MessageFilterParams,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(params): Query<MessageFilterParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let categories: Vec<MessageCategory> = parse_list(params.category.as_deref())?;
    let costs: Vec<ResponseCost> = parse_list(params.urgency.as_deref())?;
    let messages = app_state
        .store
        .list_messages(user_id)
        .await
        .map_err(|e| port_failure("Failed to list messages", e))?;
    let found = filter_messages(&messages, params.q.as_deref().unwrap_or_default(), &categories, &costs);
    Ok(Json(found.into_iter().map(MessageDto::from).collect::<Vec<_>>()))
}

/// Parses a comma-separated list of closed-enum names; blanks are ignored.
fn parse_list<T>(raw: Option<&str>) -> Result<Vec<T>, HandlerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string())))
        .collect()
}

/// Find open messages describing the same issue as the target.
#[utoipa::path(
    post,
    path = "/messages/{id}/similar",
    responses(
        (status = 200, description = "Matching messages, possibly none", body = SimilarMessagesResponse),
        (status = 404, description = "Target message not found")
    ),
    params(
        ("id" = String, Path, description = "Target message id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn similar_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let inbox = app_state
        .store
        .list_messages(user_id)
        .await
        .map_err(|e| port_failure("Failed to load messages", e))?;
    let target = inbox
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Message {} not found", id)))?;

    let open: Vec<Message> = inbox.iter().filter(|m| !m.is_replied).cloned().collect();
    let ids = app_state.similarity.find_similar(target, &open).await;
    info!(%id, matches = ids.len(), "Similar message lookup finished.");

    let messages = ids
        .iter()
        .filter_map(|sid| open.iter().find(|m| &m.id == sid))
        .map(MessageDto::from)
        .collect();
    Ok(Json(SimilarMessagesResponse { ids, messages }))
}

/// Classify one message and store the result.
#[utoipa::path(
    post,
    path = "/messages/{id}/classify",
    responses(
        (status = 200, description = "Classification stored", body = AnalysisDto),
        (status = 404, description = "Message not found"),
        (status = 409, description = "Message is already being classified")
    ),
    params(
        ("id" = String, Path, description = "Message id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn classify_message_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    match app_state.inbox.classify_message(user_id, &id).await {
        Ok(Some(analysis)) => Ok(Json(AnalysisDto::from(analysis))),
        Ok(None) => Err((StatusCode::CONFLICT, format!("Message {} is already being classified", id))),
        Err(e) => Err(port_failure("Failed to classify message", e)),
    }
}

/// Classify every message still carrying the default classification.
#[utoipa::path(
    post,
    path = "/messages/classify-pending",
    responses((status = 200, description = "Backfill finished", body = ClassifyPendingResponse)),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn classify_pending_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let classified = app_state
        .inbox
        .classify_pending(user_id)
        .await
        .map_err(|e| port_failure("Failed to classify pending messages", e))?;
    Ok(Json(ClassifyPendingResponse { classified }))
}

/// Draft a reply for a message and store it as the suggested reply.
#[utoipa::path(
    post,
    path = "/messages/{id}/draft",
    responses(
        (status = 200, description = "Draft stored", body = DraftResponse),
        (status = 404, description = "Message not found")
    ),
    params(
        ("id" = String, Path, description = "Message id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn draft_reply_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let store = &app_state.store;
    let message = store
        .get_message(user_id, &id)
        .await
        .map_err(|e| port_failure("Failed to load message", e))?;
    let policies = store
        .list_policies(user_id)
        .await
        .map_err(|e| port_failure("Failed to load policies", e))?;

    let template = app_state.composer.draft_template(&message, &policies).await;
    store
        .save_suggested_reply(user_id, &id, &template)
        .await
        .map_err(|e| port_failure("Failed to store draft", e))?;

    let preview = personalize(&template, &message.sender_name);
    Ok(Json(DraftResponse { template, preview }))
}

/// Personalize one reply for the target and the selected similar messages, and mark them replied.
///
/// Delivery is left to the mail collaborator; the personalized texts are returned.
#[utoipa::path(
    post,
    path = "/messages/{id}/reply",
    request_body = ReplyRequest,
    responses(
        (status = 200, description = "Replies prepared and messages marked replied", body = ReplyResponse),
        (status = 400, description = "No reply text given and none stored"),
        (status = 404, description = "Message not found")
    ),
    params(
        ("id" = String, Path, description = "Target message id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn send_reply_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
    Json(payload): Json<ReplyRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let inbox = app_state
        .store
        .list_messages(user_id)
        .await
        .map_err(|e| port_failure("Failed to load messages", e))?;
    let target = inbox
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Message {} not found", id)))?;

    let template = payload
        .template
        .filter(|t| !t.trim().is_empty())
        .or_else(|| target.suggested_reply.clone())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "No reply text given and no draft stored".to_string()))?;

    let replies = plan_bulk_reply(&template, target, &inbox, &payload.similar_ids);
    let ids: Vec<String> = replies.iter().map(|r| r.message_id.clone()).collect();
    app_state
        .store
        .mark_replied(user_id, &ids)
        .await
        .map_err(|e| port_failure("Failed to mark messages replied", e))?;
    info!(%id, count = ids.len(), "Bulk reply prepared.");

    Ok(Json(ReplyResponse {
        replies: replies.into_iter().map(OutgoingReplyDto::from).collect(),
    }))
}

//=========================================================================================
// Sync Handler
//=========================================================================================

/// Ingest inbound mail: gate, classify and store it.
///
/// If the sync outlives the configured timeout the request answers 202 and the
/// sync keeps running in the background.
#[utoipa::path(
    post,
    path = "/sync",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Sync finished", body = SyncResponse),
        (status = 202, description = "Sync still running in the background"),
        (status = 500, description = "Sync failed")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn sync_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(payload): Json<SyncRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let inbound: Vec<InboundMessage> = payload.messages.into_iter().map(InboundMessage::from).collect();
    let purge = payload.purge_irrelevant.unwrap_or(true);
    let inbox = app_state.inbox.clone();

    let mut task = tokio::spawn(async move {
        let result = inbox.sync(user_id, inbound, purge).await;
        if let Err(e) = &result {
            error!(%user_id, "Inbox sync failed: {:?}", e);
        }
        result
    });

    match tokio::time::timeout(app_state.config.sync_timeout, &mut task).await {
        Ok(Ok(Ok(report))) => Ok((StatusCode::OK, Json(SyncResponse::from(report))).into_response()),
        Ok(Ok(Err(e))) => Err(port_failure("Inbox sync failed", e)),
        Ok(Err(join_error)) => {
            error!("Inbox sync task panicked: {:?}", join_error);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Inbox sync failed".to_string()))
        }
        Err(_) => {
            warn!(%user_id, "Inbox sync still running; answering 202.");
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "message": "Sync started; still running in the background." })),
            )
                .into_response())
        }
    }
}

//=========================================================================================
// Policy Handlers
//=========================================================================================

/// List the caller's business policies.
#[utoipa::path(
    get,
    path = "/policies",
    responses((status = 200, description = "All policies", body = [PolicyDto])),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_policies_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let policies = app_state
        .store
        .list_policies(user_id)
        .await
        .map_err(|e| port_failure("Failed to list policies", e))?;
    Ok(Json(policies.into_iter().map(PolicyDto::from).collect::<Vec<_>>()))
}

/// Create a business policy.
#[utoipa::path(
    post,
    path = "/policies",
    request_body = PolicyPayload,
    responses(
        (status = 201, description = "Policy created", body = PolicyDto),
        (status = 400, description = "Title or content missing")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_policy_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(payload): Json<PolicyPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    if payload.title.trim().is_empty() || payload.content.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Policy title and content are required".to_string()));
    }
    let policy = app_state
        .store
        .create_policy(user_id, payload.title.trim(), payload.content.trim(), payload.category.as_deref())
        .await
        .map_err(|e| port_failure("Failed to create policy", e))?;
    Ok((StatusCode::CREATED, Json(PolicyDto::from(policy))))
}

/// Replace a business policy.
#[utoipa::path(
    put,
    path = "/policies/{id}",
    request_body = PolicyPayload,
    responses(
        (status = 200, description = "Policy updated", body = PolicyDto),
        (status = 404, description = "Policy not found")
    ),
    params(
        ("id" = String, Path, description = "Policy id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_policy_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
    Json(payload): Json<PolicyPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    if payload.title.trim().is_empty() || payload.content.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Policy title and content are required".to_string()));
    }
    let policy = BusinessPolicy {
        id,
        title: payload.title.trim().to_string(),
        content: payload.content.trim().to_string(),
        category: payload.category,
    };
    app_state
        .store
        .update_policy(user_id, &policy)
        .await
        .map_err(|e| port_failure("Failed to update policy", e))?;
    Ok(Json(PolicyDto::from(policy)))
}

/// Delete a business policy.
#[utoipa::path(
    delete,
    path = "/policies/{id}",
    responses(
        (status = 204, description = "Policy deleted"),
        (status = 404, description = "Policy not found")
    ),
    params(
        ("id" = String, Path, description = "Policy id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_policy_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .store
        .delete_policy(user_id, &id)
        .await
        .map_err(|e| port_failure("Failed to delete policy", e))?;
    Ok(StatusCode::NO_CONTENT)
}
