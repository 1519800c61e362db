//! JSONP parsing and record transformation for the detail endpoint.

use fundwatch_core::{FetchSource, ProjectRecord, RewardTier, UNKNOWN_STATUS, completion_rate};
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use fundwatch_fetch::FetchError;

// ============================================================================
// Regex Patterns
// ============================================================================

/// `jQuery123({...});`
static JSONP_PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)jQuery\d+\((.+)\);?$").expect("Invalid regex")
});

/// `window[decodeURIComponent('jQuery123')]({...});`
static JSONP_WINDOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)window\[decodeURIComponent\('jQuery\d+'\)\]\((.+)\);?$").expect("Invalid regex")
});

/// Everything a price can be made of.
static PRICE_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.]").expect("Invalid regex"));

// ============================================================================
// Envelope
// ============================================================================

/// Extracts and decodes the JSON wrapped in a JSONP callback.
pub fn parse_jsonp(text: &str) -> Result<Value, FetchError> {
    let text = text.trim();
    let captures = JSONP_PLAIN_RE
        .captures(text)
        .or_else(|| JSONP_WINDOW_RE.captures(text))
        .ok_or_else(|| FetchError::Parse("unrecognized JSONP envelope".to_string()))?;

    let inner = captures
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(|| FetchError::Parse("empty JSONP envelope".to_string()))?;
    Ok(serde_json::from_str(inner)?)
}

/// Picks the project object out of a decoded payload.
///
/// The endpoint answers with either the object itself or an array whose
/// first element is the project.
pub fn project_payload(payload: &Value) -> Result<&Value, FetchError> {
    match payload {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| FetchError::Parse("empty project list".to_string())),
        Value::Object(map) if !map.is_empty() => Ok(payload),
        Value::Object(_) => Err(FetchError::Parse("empty project object".to_string())),
        other => Err(FetchError::Parse(format!("unexpected payload: {other}"))),
    }
}

// ============================================================================
// Record Transformation
// ============================================================================

/// Converts an upstream project object into a [`ProjectRecord`].
pub fn to_record(id: &str, project: &Value) -> ProjectRecord {
    let target_amount = field_price(project, "goal");
    let raised_amount = field_price(project, "backer_money");

    let name = ["name", "short_title", "title"]
        .iter()
        .find_map(|key| field_string(project, key))
        .unwrap_or_default();

    let status = field_string(project, "status").unwrap_or_else(|| UNKNOWN_STATUS.to_string());

    let reward_tiers: Vec<RewardTier> = project
        .get("reward_list")
        .and_then(Value::as_array)
        .map(|tiers| tiers.iter().filter(|t| is_shown(t)).map(to_tier).collect())
        .unwrap_or_default();

    debug!(
        id,
        target = target_amount,
        raised = raised_amount,
        tiers = reward_tiers.len(),
        "Parsed project payload"
    );

    ProjectRecord {
        id: id.to_string(),
        name,
        status,
        target_amount,
        raised_amount,
        completion_rate: completion_rate(raised_amount, target_amount),
        backer_count: field_u64(project, "backer_count"),
        like_count: field_u64(project, "bull_count"),
        comment_count: field_u64(project, "comment_count"),
        reward_tiers,
        start_time: field_string(project, "start_time"),
        end_time: field_string(project, "end_time"),
        source: FetchSource::Api,
        ..ProjectRecord::unknown(id)
    }
}

fn is_shown(tier: &Value) -> bool {
    match tier.get("if_show") {
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => s.trim() == "1",
        _ => false,
    }
}

fn to_tier(tier: &Value) -> RewardTier {
    let cap = field_u64(tier, "max_total");
    let sold = field_u64(tier, "back_count");
    let (cap, remaining) = if cap > 0 {
        (Some(cap), Some(cap.saturating_sub(sold)))
    } else {
        (None, None)
    };

    RewardTier {
        title: field_string(tier, "title")
            .or_else(|| field_string(tier, "name"))
            .unwrap_or_default(),
        price: field_price(tier, "money"),
        cap,
        sold,
        remaining,
        description: field_string(tier, "content")
            .map(|c| strip_html(&c))
            .unwrap_or_default(),
    }
}

// ============================================================================
// Field Helpers
// ============================================================================

/// Parses a price by dropping everything except digits and dots.
pub fn parse_price(raw: &str) -> f64 {
    PRICE_STRIP_RE.replace_all(raw, "").parse().unwrap_or(0.0)
}

/// Removes tags, decodes entities and collapses whitespace.
pub fn strip_html(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn field_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_price(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_price(s),
        _ => 0.0,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn field_u64(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        }
        _ => 0,
    }
}
