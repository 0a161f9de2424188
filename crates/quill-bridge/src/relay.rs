//! Responses relayed through document comments
//!
//! An agent that cannot reach the bridge replies to the command's comment
//! with the response envelope, either inside a markdown code fence or as
//! bare JSON.

use quill_core::{CommandResponse, MessageKind};
use regex::Regex;
use std::sync::OnceLock;

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
    })
}

fn parse(candidate: &str) -> Option<CommandResponse> {
    let response: CommandResponse = serde_json::from_str(candidate.trim()).ok()?;
    (response.kind == MessageKind::Response).then_some(response)
}

/// Pull a response envelope out of comment text, if one is present
pub fn extract_response(text: &str) -> Option<CommandResponse> {
    for captures in fence_pattern().captures_iter(text) {
        if let Some(response) = captures.get(1).and_then(|m| parse(m.as_str())) {
            return Some(response);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse(&text[start..=end])
}
