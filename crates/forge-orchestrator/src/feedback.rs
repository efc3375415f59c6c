//! Feedback items and recovery of structured output from model text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Category forced onto mechanical-pass items.
pub const MECHANICAL_CATEGORY: &str = "grammar";
/// Severity forced onto mechanical-pass items.
pub const MECHANICAL_SEVERITY: &str = "suggestion";

/// Characters of unparseable output kept in the diagnostic log line.
const DIAGNOSTIC_PREVIEW_CHARS: usize = 300;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("json fence regex should be valid"));

static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```\s*([\s\S]*?)\s*```").expect("fence regex should be valid"));

/// A web citation backing a feedback item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub finding: String,
}

/// One review comment.
///
/// Every field is optional on input; models routinely omit some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackItem {
    #[serde(deserialize_with = "lenient_id")]
    pub id: u32,
    /// Verbatim fragment of the document the comment is about.
    pub quote: String,
    pub title: String,
    pub category: String,
    pub severity: String,
    pub explanation: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Specialists that raised the issue.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
}

/// Accepts numeric or numeric-string ids; anything else becomes 0 and is
/// fixed by [`renumber`].
fn lenient_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let id = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(id.unwrap_or(0))
}

/// Extracts a list of feedback items from model output.
///
/// Tries, in order: the whole text, the first ```` ```json ```` fence, the first
/// fence of any kind, and the widest `[`...`]` span. Output that yields no JSON
/// array at any layer is logged and treated as zero items.
pub fn parse_feedback(text: &str) -> Vec<FeedbackItem> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    try_parse_feedback(text).unwrap_or_else(|| {
        let preview: String = text.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
        warn!(preview = %preview, "Failed to parse feedback JSON from model output");
        Vec::new()
    })
}

/// Like [`parse_feedback`], but `None` when no layer yields a JSON array.
pub fn try_parse_feedback(text: &str) -> Option<Vec<FeedbackItem>> {
    candidates(text).into_iter().find_map(parse_array)
}

fn candidates(text: &str) -> Vec<&str> {
    let mut candidates = vec![text];

    if let Some(inner) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str());
    }
    if let Some(inner) = ANY_FENCE.captures(text).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str());
    }
    if let (Some(first), Some(last)) = (text.find('['), text.rfind(']')) {
        if last > first {
            candidates.push(&text[first..=last]);
        }
    }

    candidates
}

fn parse_array(candidate: &str) -> Option<Vec<FeedbackItem>> {
    let Value::Array(values) = serde_json::from_str::<Value>(candidate).ok()? else {
        return None;
    };

    let items = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<FeedbackItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Skipping malformed feedback item");
                None
            }
        })
        .collect();

    Some(items)
}

/// Assigns ids `first_id..` in list order.
pub fn renumber(items: &mut [FeedbackItem], first_id: u32) {
    for (id, item) in (first_id..).zip(items.iter_mut()) {
        item.id = id;
    }
}

/// Forces the fixed mechanical-pass category and severity.
pub fn mark_mechanical(items: &mut [FeedbackItem]) {
    for item in items {
        item.category = MECHANICAL_CATEGORY.to_string();
        item.severity = MECHANICAL_SEVERITY.to_string();
    }
}
