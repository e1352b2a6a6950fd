//! crates/inbox_assistant_core/src/classification.rs
//!
//! Message classification: language models in priority order, then a keyword
//! heuristic, then the default `{General, Neutral, Low, []}`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::{AnalysisResult, MessageCategory, ResponseCost, Sentiment};
use crate::ports::LanguageModelService;
use crate::text::{decode_html_entities, tokenize};

//=========================================================================================
// Classifier
//=========================================================================================

pub struct Classifier {
    models: Vec<Arc<dyn LanguageModelService>>,
}

impl Classifier {
    pub fn new(models: Vec<Arc<dyn LanguageModelService>>) -> Self {
        Self { models }
    }

    /// Classifies a message body. Never fails; inconclusive input yields the default.
    pub async fn classify(&self, text: &str) -> AnalysisResult {
        if text.trim().is_empty() {
            return AnalysisResult::default();
        }

        for model in &self.models {
            match model.classify(text).await {
                Ok(mut analysis) => {
                    analysis.tags.truncate(AnalysisResult::MAX_TAGS);
                    if analysis.tags.is_empty() {
                        analysis.tags.push(analysis.category.to_string());
                    }
                    debug!(provider = model.name(), category = %analysis.category, "Model classified message.");
                    return analysis;
                }
                Err(e) => warn!(provider = model.name(), error = %e, "Model classification failed."),
            }
        }

        match classify_heuristically(text) {
            Some(analysis) => {
                debug!(category = %analysis.category, "Heuristic classified message.");
                analysis
            }
            None => AnalysisResult::default(),
        }
    }
}

//=========================================================================================
// Keyword Heuristic
//=========================================================================================

// Buckets in tie-break priority order.
const CATEGORY_KEYWORDS: &[(MessageCategory, &[&str])] = &[
    (
        MessageCategory::Complaint,
        &[
            "disappointed", "unacceptable", "terrible", "awful", "worst", "angry", "chargeback",
            "complaint", "scam", "furious", "shattered", "broken", "damaged",
        ],
    ),
    (
        MessageCategory::Returns,
        &["return", "returns", "refund", "refunds", "exchange", "replacement", "money back", "send it back"],
    ),
    (
        MessageCategory::Shipping,
        &[
            "shipping", "ship", "shipped", "package", "parcel", "tracking", "delivery", "delivered",
            "arrive", "arrived", "courier", "late", "delay", "delayed", "dispatch",
        ],
    ),
    (
        MessageCategory::Custom,
        &["custom", "customized", "customised", "personalized", "personalised", "engraving", "initials", "bespoke"],
    ),
    (
        MessageCategory::Product,
        &["size", "sizing", "material", "colour", "color", "stock", "available", "dimensions", "quality", "product"],
    ),
];

const NEGATIVE_WORDS: &[&str] = &[
    "disappointed", "unacceptable", "terrible", "awful", "worst", "angry", "broken", "damaged",
    "shattered", "never", "still", "refund", "chargeback", "upset", "frustrated",
];

const POSITIVE_WORDS: &[&str] = &["love", "thanks", "thank", "great", "amazing", "beautiful", "happy", "wonderful"];

/// Scores each keyword bucket against the text; `None` when no bucket matches.
pub fn classify_heuristically(text: &str) -> Option<AnalysisResult> {
    let decoded = decode_html_entities(text);
    let tokens = tokenize(&decoded);
    if tokens.is_empty() {
        return None;
    }
    let joined = format!(" {} ", tokens.join(" "));
    let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();

    let hits = |keyword: &str| {
        if keyword.contains(' ') {
            joined.contains(&format!(" {keyword} "))
        } else {
            token_set.contains(keyword)
        }
    };

    let mut best: Option<(MessageCategory, Vec<&str>)> = None;
    for (category, keywords) in CATEGORY_KEYWORDS {
        let matched: Vec<&str> = keywords.iter().copied().filter(|k| hits(k)).collect();
        let beats = match &best {
            Some((_, current)) => matched.len() > current.len(),
            None => !matched.is_empty(),
        };
        if beats {
            best = Some((*category, matched));
        }
    }
    let (category, matched) = best?;

    let negative = NEGATIVE_WORDS.iter().filter(|w| token_set.contains(*w)).count();
    let positive = POSITIVE_WORDS.iter().filter(|w| token_set.contains(*w)).count();
    let sentiment = if negative > positive {
        Sentiment::Negative
    } else if positive > negative {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    };

    let predicted_cost = match (category, sentiment) {
        (MessageCategory::Complaint, _) | (_, Sentiment::Negative) => ResponseCost::High,
        (MessageCategory::Returns, _) | (MessageCategory::Custom, _) => ResponseCost::Medium,
        _ => ResponseCost::Low,
    };

    let tags = matched
        .into_iter()
        .take(AnalysisResult::MAX_TAGS)
        .map(title_case)
        .collect();

    Some(AnalysisResult {
        category,
        sentiment,
        predicted_cost,
        tags,
    })
}

fn title_case(word: &str) -> String {
    word.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//=========================================================================================
// In-flight Guard
//=========================================================================================

/// Tracks which message ids are currently being classified.
///
/// Overlapping triggers (a fresh insert and a backfill, say) must not classify the
/// same message twice at once. The registry lives in application state.
#[derive(Debug, Default)]
pub struct ClassificationGuard {
    in_flight: Mutex<HashSet<String>>,
}

impl ClassificationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `message_id`, or returns `None` if it is already being classified.
    pub fn try_acquire(self: &Arc<Self>, message_id: &str) -> Option<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(message_id.to_string()) {
            return None;
        }
        Some(InFlight {
            guard: Arc::clone(self),
            message_id: message_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, message_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(message_id)
    }
}

/// Releases its message id when dropped.
#[derive(Debug)]
pub struct InFlight {
    guard: Arc<ClassificationGuard>,
    message_id: String,
}

impl InFlight {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.guard
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.message_id);
    }
}
