//! services/api/src/adapters/llm_json.rs
//!
//! Model output is untrusted text. These helpers pull the JSON object out of it
//! and validate it into typed payloads; anything else is a `MalformedResponse`.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;

use inbox_assistant_core::domain::{AnalysisResult, MessageCategory, ResponseCost, Sentiment};
use inbox_assistant_core::ports::{PortError, PortResult, RelevanceVerdict};

fn object_pattern() -> &'static Regex {
    static OBJECT: OnceLock<Regex> = OnceLock::new();
    OBJECT.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static regex is valid"))
}

/// Parses `raw` as JSON, or failing that the outermost `{...}` span inside it.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> PortResult<T> {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }
    let span = object_pattern()
        .find(trimmed)
        .ok_or_else(|| PortError::MalformedResponse(format!("no JSON object in: {}", preview(trimmed))))?;
    serde_json::from_str::<T>(span.as_str()).map_err(|e| PortError::MalformedResponse(e.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

//=========================================================================================
// Typed Payloads
//=========================================================================================

#[derive(Debug, Deserialize)]
struct JudgePayload {
    #[serde(rename = "similarIds", alias = "similar_ids")]
    similar_ids: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    category: Option<String>,
    sentiment: Option<String>,
    #[serde(alias = "predictedCost", alias = "cost")]
    predicted_cost: Option<String>,
    #[serde(default)]
    tags: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RelevancePayload {
    relevant: serde_json::Value,
    reason: Option<String>,
}

/// Reads `{"similarIds": [...]}`, keeping only string entries.
pub fn parse_similar_ids(raw: &str) -> PortResult<Vec<String>> {
    let payload: JudgePayload = extract_json(raw)?;
    Ok(payload
        .similar_ids
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// Validates a classification answer. A missing or unknown category is an error;
/// an unknown sentiment falls back to Neutral and an unknown cost to Low.
pub fn parse_analysis(raw: &str) -> PortResult<AnalysisResult> {
    let payload: ClassificationPayload = extract_json(raw)?;
    let category = payload
        .category
        .ok_or_else(|| PortError::MalformedResponse("missing category".to_string()))?
        .trim()
        .parse::<MessageCategory>()
        .map_err(|e| PortError::MalformedResponse(e.to_string()))?;
    let sentiment = payload
        .sentiment
        .and_then(|s| s.trim().parse::<Sentiment>().ok())
        .unwrap_or(Sentiment::Neutral);
    let predicted_cost = payload
        .predicted_cost
        .and_then(|c| c.trim().parse::<ResponseCost>().ok())
        .unwrap_or(ResponseCost::Low);
    let tags = payload
        .tags
        .into_iter()
        .filter_map(|t| t.as_str().map(|s| s.trim().to_string()))
        .filter(|t| !t.is_empty())
        .take(AnalysisResult::MAX_TAGS)
        .collect();
    Ok(AnalysisResult {
        category,
        sentiment,
        predicted_cost,
        tags,
    })
}

/// Reads `{"relevant": bool, "reason": str}`. Accepts `"true"`/`"false"` strings.
pub fn parse_relevance(raw: &str) -> PortResult<RelevanceVerdict> {
    let payload: RelevancePayload = extract_json(raw)?;
    let relevant = match &payload.relevant {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        other => {
            return Err(PortError::MalformedResponse(format!(
                "'relevant' is not a boolean: {other}"
            )))
        }
    };
    Ok(RelevanceVerdict {
        relevant,
        reason: payload.reason,
    })
}
