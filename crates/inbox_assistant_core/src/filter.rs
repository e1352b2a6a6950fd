//! crates/inbox_assistant_core/src/filter.rs
//!
//! Inbox search: a case-insensitive text query over sender, subject and body,
//! narrowed by category and urgency (predicted response cost).

use crate::domain::{Message, MessageCategory, ResponseCost};

/// Returns the messages matching every given criterion, in input order.
///
/// A blank `query` or an empty `categories`/`costs` list does not filter.
pub fn filter_messages<'a>(
    messages: &'a [Message],
    query: &str,
    categories: &[MessageCategory],
    costs: &[ResponseCost],
) -> Vec<&'a Message> {
    let needle = query.trim().to_lowercase();
    messages
        .iter()
        .filter(|m| needle.is_empty() || matches_query(m, &needle))
        .filter(|m| categories.is_empty() || categories.contains(&m.category))
        .filter(|m| costs.is_empty() || costs.contains(&m.predicted_cost))
        .collect()
}

fn matches_query(message: &Message, needle: &str) -> bool {
    message.sender_name.to_lowercase().contains(needle)
        || message.body.to_lowercase().contains(needle)
        || message
            .subject
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains(needle))
}
