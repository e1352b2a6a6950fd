pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
use rest::*;
use state::AppState;

/// Builds the protected REST router. Every route requires the `x-user-id` header.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/messages", get(list_messages_handler))
        .route("/messages/classify-pending", post(classify_pending_handler))
        .route("/messages/{id}/similar", post(similar_messages_handler))
        .route("/messages/{id}/classify", post(classify_message_handler))
        .route("/messages/{id}/draft", post(draft_reply_handler))
        .route("/messages/{id}/reply", post(send_reply_handler))
        .route("/sync", post(sync_handler))
        .route("/policies", get(list_policies_handler).post(create_policy_handler))
        .route("/policies/{id}", put(update_policy_handler).delete(delete_policy_handler))
        .route_layer(axum_middleware::from_fn(require_user))
        .with_state(state)
}
