//! crates/inbox_assistant_core/src/drafting.rs
//!
//! Reply drafting and `{NAME}` fan-out for bulk replies.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{BusinessPolicy, Message};
use crate::ports::{DraftRequest, LanguageModelService};
use crate::text::{decode_html_entities, first_name, personalize, templatize_name, truncate_chars};

pub const POLICY_CONTEXT_CHARS: usize = 6000;
pub const MESSAGE_TEXT_CHARS: usize = 1500;

pub struct DraftComposer {
    models: Vec<Arc<dyn LanguageModelService>>,
    business_name: String,
    signature: String,
}

impl DraftComposer {
    pub fn new(
        models: Vec<Arc<dyn LanguageModelService>>,
        business_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            models,
            business_name: business_name.into(),
            signature: signature.into(),
        }
    }

    pub fn request_for(&self, message: &Message, policies: &[BusinessPolicy]) -> DraftRequest {
        DraftRequest {
            message_text: truncate_chars(&decode_html_entities(&message.body), MESSAGE_TEXT_CHARS),
            sender_name: message.sender_name.clone(),
            policy_context: policy_context(policies),
            business_name: self.business_name.clone(),
            signature: self.signature.clone(),
        }
    }

    /// Drafts a reply to `message`. Never fails; falls back to a fixed template.
    pub async fn draft(&self, message: &Message, policies: &[BusinessPolicy]) -> String {
        let request = self.request_for(message, policies);
        for model in &self.models {
            match model.draft_reply(&request).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(provider = model.name(), id = %message.id, "Drafted reply.");
                    return text.trim().to_string();
                }
                Ok(_) => warn!(provider = model.name(), "Model returned an empty draft."),
                Err(e) => warn!(provider = model.name(), error = %e, "Drafting failed."),
            }
        }
        fallback_draft(&message.sender_name, &self.business_name)
    }

    /// Drafts a reply and stores it in `{NAME}` template form.
    pub async fn draft_template(&self, message: &Message, policies: &[BusinessPolicy]) -> String {
        let draft = self.draft(message, policies).await;
        templatize_name(&draft, &message.sender_name)
    }
}

/// Renders policies as `title: content` blocks separated by blank lines.
pub fn policy_context(policies: &[BusinessPolicy]) -> String {
    let joined = policies
        .iter()
        .map(|p| format!("{}: {}", p.title.trim(), p.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&joined, POLICY_CONTEXT_CHARS)
}

pub fn fallback_draft(sender_name: &str, business_name: &str) -> String {
    let name = match first_name(sender_name) {
        "" => "there",
        n => n,
    };
    let business = match business_name.trim() {
        "" => "us",
        b => b,
    };
    format!(
        "Hi {name},\n\nThanks for reaching out to {business}. I'm looking into this now and will help get it resolved. \
         Could you confirm your order number and any relevant details (e.g., tracking number or photos if applicable)?\n\nThanks!"
    )
}

//=========================================================================================
// Bulk Reply
//=========================================================================================

/// One personalized reply ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub message_id: String,
    pub recipient: String,
    pub text: String,
}

/// Personalizes `template` for the target and every selected similar message.
///
/// Messages already replied to are skipped unless they are the target itself.
/// Ids not present in `inbox` are ignored.
pub fn plan_bulk_reply(
    template: &str,
    target: &Message,
    inbox: &[Message],
    selected_ids: &[String],
) -> Vec<OutgoingReply> {
    let mut replies = vec![OutgoingReply {
        message_id: target.id.clone(),
        recipient: target.sender_handle.clone(),
        text: personalize(template, &target.sender_name),
    }];

    for id in selected_ids {
        if *id == target.id || replies.iter().any(|r| &r.message_id == id) {
            continue;
        }
        let Some(message) = inbox.iter().find(|m| &m.id == id) else {
            continue;
        };
        if message.is_replied {
            continue;
        }
        replies.push(OutgoingReply {
            message_id: message.id.clone(),
            recipient: message.sender_handle.clone(),
            text: personalize(template, &message.sender_name),
        });
    }
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisResult, Channel, MessageCategory, ResponseCost, Sentiment};
    use crate::ports::{CandidateText, PortError, PortResult, RelevanceVerdict};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct StubModel {
        answer: PortResult<String>,
        seen: Mutex<Vec<DraftRequest>>,
    }

    impl StubModel {
        fn new(answer: PortResult<String>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                seen: Mutex::new(Vec::new()),
            })
        }
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
        async fn draft_reply(&self, request: &DraftRequest) -> PortResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.answer {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(PortError::Transport(e.to_string())),
            }
        }
        async fn assess_relevance(&self, _s: &str, _b: &str) -> PortResult<RelevanceVerdict> {
            Ok(RelevanceVerdict { relevant: true, reason: None })
        }
    }

    fn message(id: &str, sender: &str, body: &str, replied: bool) -> Message {
        Message {
            id: id.to_string(),
            sender_name: sender.to_string(),
            sender_handle: format!("{id}@example.com"),
            channel: Channel::Email,
            subject: None,
            body: body.to_string(),
            received_at: Utc::now(),
            is_read: false,
            is_replied: replied,
            category: MessageCategory::Shipping,
            sentiment: Sentiment::Neutral,
            predicted_cost: ResponseCost::Low,
            tags: vec![],
            suggested_reply: None,
        }
    }

    fn policy(title: &str, content: &str) -> BusinessPolicy {
        BusinessPolicy {
            id: title.to_lowercase(),
            title: title.to_string(),
            content: content.to_string(),
            category: None,
        }
    }

    #[tokio::test]
    async fn model_draft_is_templatized_with_the_sender_first_name() {
        let model = StubModel::new(Ok("Hi Bartholomew, it ships Monday.".to_string()));
        let composer = DraftComposer::new(vec![model.clone()], "Acme", "");
        let target = message("t", "Bartholomew III", "Where is my order?", false);
        let template = composer.draft_template(&target, &[]).await;
        assert_eq!(template, "Hi {NAME}, it ships Monday.");
    }

    #[tokio::test]
    async fn failing_and_empty_models_fall_back_to_template() {
        let composer = DraftComposer::new(
            vec![
                StubModel::new(Err(PortError::Transport("down".into()))),
                StubModel::new(Ok("   ".to_string())),
            ],
            "",
            "",
        );
        let draft = composer.draft(&message("t", "", "help", false), &[]).await;
        assert!(draft.starts_with("Hi there,\n\nThanks for reaching out to us."));
        assert!(draft.ends_with("Thanks!"));
    }

    #[tokio::test]
    async fn request_carries_truncated_inputs() {
        let model = StubModel::new(Ok("ok".to_string()));
        let composer = DraftComposer::new(vec![model.clone()], "Acme", "Acme team");
        let long_body = format!("it&#39;s {}", "x".repeat(2000));
        let policies = vec![policy("Returns", "30 days."), policy("Shipping", &"y".repeat(7000))];
        composer.draft(&message("t", "Jane", &long_body, false), &policies).await;

        let seen = model.seen.lock().unwrap();
        let request = &seen[0];
        assert!(request.message_text.starts_with("it's "));
        assert_eq!(request.message_text.chars().count(), MESSAGE_TEXT_CHARS);
        assert!(request.policy_context.starts_with("Returns: 30 days.\n\nShipping: "));
        assert_eq!(request.policy_context.chars().count(), POLICY_CONTEXT_CHARS);
        assert_eq!(request.business_name, "Acme");
    }

    #[test]
    fn fallback_uses_first_name_and_business() {
        let draft = fallback_draft("Alice Smith", "Acme Candles");
        assert!(draft.starts_with("Hi Alice,\n\nThanks for reaching out to Acme Candles."));
    }

    #[test]
    fn bulk_reply_personalizes_and_skips_already_replied() {
        let target = message("t", "Bartholomew III", "late", true);
        let inbox = vec![
            target.clone(),
            message("a", "Broke Guy", "late", false),
            message("b", "Alice", "late", true),
            message("c", "", "late", false),
        ];
        let selected = vec!["a".to_string(), "b".to_string(), "c".to_string(), "ghost".to_string()];
        let replies = plan_bulk_reply("Hi {NAME}, sorry!", &target, &inbox, &selected);

        let ids: Vec<&str> = replies.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["t", "a", "c"]);
        assert_eq!(replies[0].text, "Hi Bartholomew, sorry!");
        assert_eq!(replies[1].text, "Hi Broke, sorry!");
        assert_eq!(replies[2].text, "Hi , sorry!");
        assert_eq!(replies[1].recipient, "a@example.com");
    }
}
