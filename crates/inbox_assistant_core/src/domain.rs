//! crates/inbox_assistant_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Closed Enumerations
//=========================================================================================

/// The channel a customer message arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Instagram,
    Etsy,
    Shopify,
}

/// The topic bucket a message is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    Shipping,
    Returns,
    Product,
    Custom,
    General,
    Complaint,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// How costly it would be to leave the message unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResponseCost {
    /// Simple query, an automated reply is possible.
    Low,
    /// Needs verification.
    Medium,
    /// Complex custom request or angry customer.
    High,
}

/// Returned when a string does not name a member of one of the closed enumerations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// Each closed enumeration gets `ALL`, `as_str`, `Display` and a case-insensitive `FromStr`.
macro_rules! closed_enum {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(trimmed))
                    .ok_or_else(|| UnknownVariant {
                        kind: $kind,
                        value: trimmed.to_string(),
                    })
            }
        }
    };
}

closed_enum!(Channel, "channel", [Email, Instagram, Etsy, Shopify]);
closed_enum!(
    MessageCategory,
    "category",
    [Shipping, Returns, Product, Custom, General, Complaint, Other]
);
closed_enum!(Sentiment, "sentiment", [Positive, Neutral, Negative]);
closed_enum!(ResponseCost, "response cost", [Low, Medium, High]);

//=========================================================================================
// Entities
//=========================================================================================

/// A customer support inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_name: String,
    pub sender_handle: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_replied: bool,
    pub category: MessageCategory,
    pub sentiment: Sentiment,
    pub predicted_cost: ResponseCost,
    pub tags: Vec<String>,
    pub suggested_reply: Option<String>,
}

impl Message {
    /// True while the message still carries the default, not-yet-analysed classification.
    pub fn is_pending_classification(&self) -> bool {
        self.category == MessageCategory::General
            && self.predicted_cost == ResponseCost::Low
            && self.tags.is_empty()
    }

    /// Overwrites the classification fields with a fresh analysis.
    pub fn apply_analysis(&mut self, analysis: &AnalysisResult) {
        self.category = analysis.category;
        self.sentiment = analysis.sentiment;
        self.predicted_cost = analysis.predicted_cost;
        self.tags = analysis.tags.clone();
    }
}

/// A named block of free text used as grounding context when drafting replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessPolicy {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

/// The classification produced for a single message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub category: MessageCategory,
    pub sentiment: Sentiment,
    pub predicted_cost: ResponseCost,
    pub tags: Vec<String>,
}

impl AnalysisResult {
    pub const MAX_TAGS: usize = 3;
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            category: MessageCategory::General,
            sentiment: Sentiment::Neutral,
            predicted_cost: ResponseCost::Low,
            tags: Vec::new(),
        }
    }
}

/// A message as delivered by the upstream mail collaborator, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub thread_id: Option<String>,
    /// The raw `From` header, e.g. `Jane Doe <jane@example.com>`.
    pub from: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

impl InboundMessage {
    /// Splits the `From` header into a display name and a handle.
    pub fn sender(&self) -> (String, String) {
        let name = self.from.split('<').next().unwrap_or_default().trim();
        let handle = match (self.from.find('<'), self.from.rfind('>')) {
            (Some(start), Some(end)) if end > start + 1 => self.from[start + 1..end].trim(),
            _ => self.from.trim(),
        };
        (name.trim_matches('"').to_string(), handle.to_string())
    }

    pub fn is_unread(&self) -> bool {
        self.labels.iter().any(|l| l == "UNREAD")
    }

    /// Converts the delivery into a stored message carrying the given analysis.
    pub fn into_message(self, analysis: AnalysisResult) -> Message {
        let (sender_name, sender_handle) = self.sender();
        let is_read = !self.is_unread();
        Message {
            id: self.id,
            sender_name,
            sender_handle,
            channel: Channel::Email,
            subject: Some(self.subject).filter(|s| !s.trim().is_empty()),
            body: self.body,
            received_at: self.received_at,
            is_read,
            is_replied: false,
            category: analysis.category,
            sentiment: analysis.sentiment,
            predicted_cost: analysis.predicted_cost,
            tags: analysis.tags,
            suggested_reply: None,
        }
    }
}
