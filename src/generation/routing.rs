//! Classification output and its tolerant parser
//!
//! Models wrap JSON in code fences, add prose around it, or drop fields. The
//! parser extracts the first JSON object and fills gaps with defaults; only a
//! response with no usable object is reported as malformed.

use serde::Deserialize;

use crate::generation::GenerationError;

/// Longest excerpt of the user's words kept in a fallback summary
const FALLBACK_EXCERPT_CHARS: usize = 120;

/// Per-turn routing verdict. Never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoutingDecision {
    #[serde(default)]
    pub needs_past_memory: bool,
    #[serde(default)]
    pub standalone_answer: Option<String>,
    #[serde(default)]
    pub memory_one_liner: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    /// Self-reported confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: Option<f32>,
    /// The turn is ambiguous without earlier conversations
    #[serde(default)]
    pub needs_broader_context: bool,
}

impl RoutingDecision {
    /// The conservative decision used when classification is unavailable
    pub fn fallback(text: &str) -> Self {
        Self {
            needs_past_memory: false,
            standalone_answer: None,
            memory_one_liner: Some(generic_one_liner(text)),
            reasoning: "classification unavailable".to_string(),
            confidence: None,
            needs_broader_context: false,
        }
    }

    /// Clears empty strings and clamps confidence
    fn normalize(mut self) -> Self {
        self.standalone_answer = self
            .standalone_answer
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        self.memory_one_liner = self
            .memory_one_liner
            .map(|m| single_line(&m))
            .filter(|m| !m.is_empty());
        self.confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0));
        self
    }
}

/// A one-line summary that needs no model call
pub fn generic_one_liner(text: &str) -> String {
    let flat = single_line(text);
    let excerpt: String = flat.chars().take(FALLBACK_EXCERPT_CHARS).collect();
    if excerpt.is_empty() {
        "User checked in without saying much.".to_string()
    } else if excerpt.len() < flat.len() {
        format!("User talked about: {}...", excerpt)
    } else {
        format!("User talked about: {}", excerpt)
    }
}

/// Collapses whitespace and newlines into single spaces
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the first balanced `{...}` block in `raw`
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a classification response
pub fn parse_routing_decision(raw: &str) -> Result<RoutingDecision, GenerationError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| GenerationError::malformed("no JSON object in classification"))?;
    let decision: RoutingDecision = serde_json::from_str(json)
        .map_err(|e| GenerationError::malformed(format!("classification: {}", e)))?;
    Ok(decision.normalize())
}
