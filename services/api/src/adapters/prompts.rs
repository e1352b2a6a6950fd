//! services/api/src/adapters/prompts.rs
//!
//! Prompt text for the chat adapters. Each builder returns a `(system, user)` pair.

use inbox_assistant_core::domain::MessageCategory;
use inbox_assistant_core::ports::{CandidateText, DraftRequest};
use serde_json::json;

pub fn judge_similarity(target_text: &str, candidates: &[CandidateText]) -> (String, String) {
    let system = "You compare customer support messages and decide if they are about the SAME issue. \
                  Output ONLY valid JSON."
        .to_string();
    let listed: Vec<_> = candidates
        .iter()
        .map(|c| json!({ "id": c.id, "body": c.text }))
        .collect();
    let user = format!(
        "Target message:\n{target_text}\n\n\
         Candidates (JSON array of {{id, body}}):\n{}\n\n\
         Return ONLY JSON in the shape {{\"similarIds\": [\"...\"]}}.\n\
         Only include IDs for messages asking about the SAME issue that can receive the SAME reply.\n\
         If none match, return {{\"similarIds\": []}}.",
        serde_json::Value::Array(listed)
    );
    (system, user)
}

pub fn classify(text: &str) -> (String, String) {
    let categories = MessageCategory::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let system = "You are a customer support AI that classifies messages.".to_string();
    let user = format!(
        "Categorize the following customer message into one of these categories: {categories}.\n\
         Also judge the sentiment (Positive, Neutral, Negative), the effort needed to answer \
         (Low, Medium, High) and up to 3 short topic tags.\n\n\
         Message: \"{text}\"\n\n\
         Respond ONLY with a valid JSON object: \
         {{\"category\": \"<category>\", \"sentiment\": \"<sentiment>\", \"predicted_cost\": \"<cost>\", \
         \"tags\": [\"<tag>\"], \"reason\": \"<short reason>\"}}"
    );
    (system, user)
}

pub fn draft_reply(request: &DraftRequest) -> (String, String) {
    let business = if request.business_name.is_empty() {
        "the business".to_string()
    } else {
        request.business_name.clone()
    };
    let mut system = format!(
        "You write customer support replies on behalf of {business}. Be warm, concise and concrete. \
         Use the business policies when they apply and never invent order details. \
         Output ONLY the reply text, no JSON."
    );
    if !request.signature.is_empty() {
        system.push_str(&format!(" Sign with: \"{}\".", request.signature));
    }
    let user = format!(
        "Customer name: {}\nMessage: {}\n\nBusiness policies (reference as needed):\n{}\n\nWrite the reply.",
        request.sender_name, request.message_text, request.policy_context
    );
    (system, user)
}

pub fn assess_relevance(subject: &str, body: &str) -> (String, String) {
    let system = "You triage a small business inbox.".to_string();
    let user = format!(
        "Is the following email a business/customer support inquiry (not marketing, spam, or transactional)?\n\n\
         Subject: {subject}\nBody: {body}\n\n\
         Respond ONLY with a valid JSON object: {{\"relevant\": true/false, \"reason\": \"<short reason>\"}}"
    );
    (system, user)
}
