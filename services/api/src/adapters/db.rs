//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `MessageStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inbox_assistant_core::domain::{
    AnalysisResult, BusinessPolicy, Channel, Message, MessageCategory, ResponseCost, Sentiment,
};
use inbox_assistant_core::ports::{MessageStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `MessageStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const MESSAGE_COLUMNS: &str = "id, sender_name, sender_handle, channel, subject, body, received_at, \
     is_read, is_replied, category, sentiment, predicted_cost, tags, suggested_reply";

#[derive(FromRow)]
struct MessageRecord {
    id: String,
    sender_name: String,
    sender_handle: String,
    channel: String,
    subject: Option<String>,
    body: String,
    received_at: DateTime<Utc>,
    is_read: bool,
    is_replied: bool,
    category: String,
    sentiment: String,
    predicted_cost: String,
    tags: Vec<String>,
    suggested_reply: Option<String>,
}
impl MessageRecord {
    /// Unknown enum text in a row falls back to the unclassified defaults.
    fn to_domain(self) -> Message {
        let defaults = AnalysisResult::default();
        Message {
            channel: self.channel.parse::<Channel>().unwrap_or_else(|e| {
                warn!(id = %self.id, error = %e, "Unknown channel in store.");
                Channel::Email
            }),
            category: self.category.parse::<MessageCategory>().unwrap_or(defaults.category),
            sentiment: self.sentiment.parse::<Sentiment>().unwrap_or(defaults.sentiment),
            predicted_cost: self.predicted_cost.parse::<ResponseCost>().unwrap_or(defaults.predicted_cost),
            id: self.id,
            sender_name: self.sender_name,
            sender_handle: self.sender_handle,
            subject: self.subject,
            body: self.body,
            received_at: self.received_at,
            is_read: self.is_read,
            is_replied: self.is_replied,
            tags: self.tags,
            suggested_reply: self.suggested_reply,
        }
    }
}

#[derive(FromRow)]
struct PolicyRecord {
    id: Uuid,
    title: String,
    content: String,
    category: Option<String>,
}
impl PolicyRecord {
    fn to_domain(self) -> BusinessPolicy {
        BusinessPolicy {
            id: self.id.to_string(),
            title: self.title,
            content: self.content,
            category: self.category,
        }
    }
}

fn policy_uuid(policy_id: &str) -> PortResult<Uuid> {
    Uuid::parse_str(policy_id).map_err(|_| PortError::NotFound(format!("Policy {} not found", policy_id)))
}

//=========================================================================================
// `MessageStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MessageStore for DbAdapter {
    async fn list_messages(&self, user_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = $1 ORDER BY received_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_message(&self, user_id: Uuid, message_id: &str) -> PortResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = $1 AND id = $2"
        ))
        .bind(user_id)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Message {} not found", message_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn existing_message_ids(&self, user_id: Uuid) -> PortResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT id FROM messages WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn upsert_messages(&self, user_id: Uuid, messages: &[Message]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for m in messages {
            sqlx::query(
                "INSERT INTO messages (user_id, id, sender_name, sender_handle, channel, subject, body, received_at, \
                     is_read, is_replied, category, sentiment, predicted_cost, tags, suggested_reply) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                 ON CONFLICT (user_id, id) DO UPDATE SET \
                     sender_name = EXCLUDED.sender_name, sender_handle = EXCLUDED.sender_handle, \
                     subject = EXCLUDED.subject, body = EXCLUDED.body, received_at = EXCLUDED.received_at, \
                     is_read = EXCLUDED.is_read, is_replied = EXCLUDED.is_replied, \
                     category = EXCLUDED.category, sentiment = EXCLUDED.sentiment, \
                     predicted_cost = EXCLUDED.predicted_cost, tags = EXCLUDED.tags",
            )
            .bind(user_id)
            .bind(&m.id)
            .bind(&m.sender_name)
            .bind(&m.sender_handle)
            .bind(m.channel.as_str())
            .bind(&m.subject)
            .bind(&m.body)
            .bind(m.received_at)
            .bind(m.is_read)
            .bind(m.is_replied)
            .bind(m.category.as_str())
            .bind(m.sentiment.as_str())
            .bind(m.predicted_cost.as_str())
            .bind(&m.tags)
            .bind(&m.suggested_reply)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)
    }

    async fn update_analysis(&self, user_id: Uuid, message_id: &str, analysis: &AnalysisResult) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET category = $1, sentiment = $2, predicted_cost = $3, tags = $4 \
             WHERE user_id = $5 AND id = $6",
        )
        .bind(analysis.category.as_str())
        .bind(analysis.sentiment.as_str())
        .bind(analysis.predicted_cost.as_str())
        .bind(&analysis.tags)
        .bind(user_id)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Message {} not found", message_id)));
        }
        Ok(())
    }

    async fn save_suggested_reply(&self, user_id: Uuid, message_id: &str, reply: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE messages SET suggested_reply = $1 WHERE user_id = $2 AND id = $3")
            .bind(reply)
            .bind(user_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Message {} not found", message_id)));
        }
        Ok(())
    }

    async fn mark_replied(&self, user_id: Uuid, message_ids: &[String]) -> PortResult<()> {
        sqlx::query("UPDATE messages SET is_replied = TRUE, is_read = TRUE WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(message_ids)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_messages(&self, user_id: Uuid, message_ids: &[String]) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(message_ids)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn list_policies(&self, user_id: Uuid) -> PortResult<Vec<BusinessPolicy>> {
        let records = sqlx::query_as::<_, PolicyRecord>(
            "SELECT id, title, content, category FROM policies WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn create_policy(
        &self,
        user_id: Uuid,
        title: &str,
        content: &str,
        category: Option<&str>,
    ) -> PortResult<BusinessPolicy> {
        let record = sqlx::query_as::<_, PolicyRecord>(
            "INSERT INTO policies (id, user_id, title, content, category) VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, title, content, category",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(content)
        .bind(category)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_policy(&self, user_id: Uuid, policy: &BusinessPolicy) -> PortResult<()> {
        let id = policy_uuid(&policy.id)?;
        let result = sqlx::query(
            "UPDATE policies SET title = $1, content = $2, category = $3 WHERE user_id = $4 AND id = $5",
        )
        .bind(&policy.title)
        .bind(&policy.content)
        .bind(&policy.category)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Policy {} not found", policy.id)));
        }
        Ok(())
    }

    async fn delete_policy(&self, user_id: Uuid, policy_id: &str) -> PortResult<()> {
        let id = policy_uuid(policy_id)?;
        let result = sqlx::query("DELETE FROM policies WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Policy {} not found", policy_id)));
        }
        Ok(())
    }
}
