//! crates/inbox_assistant_core/src/relevance.rs
//!
//! Decides whether an inbound email is a genuine business inquiry before it
//! is stored. Label and keyword checks are cheap and run first; a language
//! model only sees mail that passed both. Model failures fail open.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::domain::InboundMessage;
use crate::ports::{LanguageModelService, RelevanceVerdict};
use crate::text::normalize_for_comparison;

/// Mailbox labels that mark a message as noise regardless of content.
pub const EXCLUDED_LABELS: &[&str] = &[
    "SPAM",
    "TRASH",
    "CATEGORY_PROMOTIONS",
    "CATEGORY_SOCIAL",
    "CATEGORY_FORUMS",
];

pub const BUSINESS_KEYWORDS: &[&str] = &[
    "order", "purchase", "invoice", "receipt", "billing", "charge", "payment", "tracking",
    "shipment", "shipping", "delivery", "delivered", "eta", "return", "refund", "exchange",
    "replacement", "cancel", "cancellation", "address", "support", "help", "issue", "problem",
    "broken", "damaged", "missing", "late", "delay", "complaint", "warranty", "subscription",
];

pub struct RelevanceGate {
    models: Vec<Arc<dyn LanguageModelService>>,
}

impl RelevanceGate {
    pub fn new(models: Vec<Arc<dyn LanguageModelService>>) -> Self {
        Self { models }
    }

    pub async fn assess(&self, message: &InboundMessage) -> RelevanceVerdict {
        if let Some(label) = excluded_label(&message.labels) {
            return irrelevant(format!("labelled {label}"));
        }
        if !mentions_business(&message.subject, &message.body) {
            return irrelevant("no business keywords".to_string());
        }

        for model in &self.models {
            match model.assess_relevance(&message.subject, &message.body).await {
                Ok(verdict) => {
                    debug!(provider = model.name(), id = %message.id, relevant = verdict.relevant, "Relevance verdict.");
                    return verdict;
                }
                Err(e) => warn!(provider = model.name(), error = %e, "Relevance check failed."),
            }
        }

        RelevanceVerdict {
            relevant: true,
            reason: None,
        }
    }
}

fn irrelevant(reason: String) -> RelevanceVerdict {
    RelevanceVerdict {
        relevant: false,
        reason: Some(reason),
    }
}

fn excluded_label(labels: &[String]) -> Option<&str> {
    labels
        .iter()
        .map(String::as_str)
        .find(|label| EXCLUDED_LABELS.contains(label))
}

// Keywords match at the start of a word so inflections ("orders", "refunded") count.
fn business_keyword() -> &'static Regex {
    static KEYWORD: OnceLock<Regex> = OnceLock::new();
    KEYWORD.get_or_init(|| {
        let alternatives = BUSINESS_KEYWORDS
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"\b(?:{alternatives})")).expect("static keyword pattern is valid")
    })
}

/// True when the normalized subject or body contains a word starting with a business keyword.
pub fn mentions_business(subject: &str, body: &str) -> bool {
    let text = normalize_for_comparison(&format!("{subject}\n{body}"));
    business_keyword().is_match(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnalysisResult;
    use crate::ports::{CandidateText, DraftRequest, PortError, PortResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModel {
        verdict: Option<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModelService for StubModel {
        fn name(&self) -> &str {
            "stub"
        }
        async fn judge_similarity(&self, _t: &str, _c: &[CandidateText]) -> PortResult<Vec<String>> {
            Ok(vec![])
        }
        async fn classify(&self, _text: &str) -> PortResult<AnalysisResult> {
            Ok(AnalysisResult::default())
        }
        async fn draft_reply(&self, _r: &DraftRequest) -> PortResult<String> {
            Ok(String::new())
        }
        async fn assess_relevance(&self, _s: &str, _b: &str) -> PortResult<RelevanceVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.verdict {
                Some(relevant) => Ok(RelevanceVerdict {
                    relevant,
                    reason: Some("stub".to_string()),
                }),
                None => Err(PortError::Transport("connection refused".to_string())),
            }
        }
    }

    fn model(verdict: Option<bool>) -> Arc<StubModel> {
        Arc::new(StubModel {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }

    fn inbound(subject: &str, body: &str, labels: &[&str]) -> InboundMessage {
        InboundMessage {
            id: "g1".into(),
            thread_id: None,
            from: "Jane <jane@example.com>".into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn excluded_labels_short_circuit() {
        let m = model(Some(true));
        let gate = RelevanceGate::new(vec![m.clone()]);
        let verdict = gate
            .assess(&inbound("Your order", "Refund inside", &["INBOX", "CATEGORY_PROMOTIONS"]))
            .await;
        assert!(!verdict.relevant);
        assert_eq!(m.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mail_without_business_keywords_is_irrelevant() {
        let m = model(Some(true));
        let gate = RelevanceGate::new(vec![m.clone()]);
        let verdict = gate.assess(&inbound("Lunch?", "Are you free Friday?", &["INBOX"])).await;
        assert!(!verdict.relevant);
        assert_eq!(m.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_verdict_is_used_when_available() {
        let gate = RelevanceGate::new(vec![model(None), model(Some(false))]);
        let verdict = gate
            .assess(&inbound("Newsletter", "Track your order history with our new app", &[]))
            .await;
        assert!(!verdict.relevant);
    }

    #[tokio::test]
    async fn model_failure_fails_open() {
        let gate = RelevanceGate::new(vec![model(None)]);
        let verdict = gate
            .assess(&inbound("Where is my order?", "It has been a week.", &["INBOX", "UNREAD"]))
            .await;
        assert!(verdict.relevant);
    }

    #[test]
    fn keyword_pass_accepts_inflected_forms() {
        assert!(mentions_business("Re: Order #123", ""));
        assert!(mentions_business("", "The parcel arrived DAMAGED."));
        assert!(mentions_business(
            "Where are my orders?",
            "I returned the item last week and want my refunds."
        ));
        assert!(mentions_business("Subscription", ""));
        assert!(mentions_business("", "My order was cancelled without notice"));
    }

    #[test]
    fn keyword_pass_ignores_keywords_inside_other_words() {
        assert!(!mentions_business("Team metadata", "Beta notes attached"));
        assert!(!mentions_business("Lunch?", "Are you free Friday?"));
    }
}
