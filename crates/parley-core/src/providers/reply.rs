//! Reading model output back into an [`AgentReply`]

use serde_json::Value;
use tracing::warn;

use crate::agent::{AgentReply, Handoff};

/// Drop a surrounding markdown code fence, if the model added one
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim();
        }
    }
    trimmed
}

fn parse_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn read_handoff(value: Option<&Value>) -> Option<Handoff> {
    let value = value?;
    match serde_json::from_value::<Handoff>(value.clone()) {
        Ok(handoff) => Some(handoff),
        Err(e) => {
            warn!("Ignoring malformed handoff {}: {}", value, e);
            None
        }
    }
}

/// Single mode: a JSON object carrying a handoff is structured, anything else is text.
pub fn parse_single(content: &str) -> AgentReply {
    let content = content.trim();
    let Some(object) = parse_object(content) else {
        return AgentReply::Text(content.to_string());
    };
    match read_handoff(object.get("handoff")) {
        Some(handoff) => AgentReply::Structured {
            message: object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            handoff: Some(handoff),
            is_final: false,
        },
        None => AgentReply::Text(content.to_string()),
    }
}

/// Collaboration mode: expects `{message, handoff?, final?}`. Anything else is
/// carried as a non-final message holding the raw text.
pub fn parse_collaboration(content: &str) -> AgentReply {
    let content = content.trim();
    let fallback = || AgentReply::Structured {
        message: Some(content.to_string()),
        handoff: None,
        is_final: false,
    };

    let Some(object) = parse_object(content) else {
        warn!("Non-JSON reply in collaboration mode: {}", content);
        return fallback();
    };
    let Some(message) = object.get("message").and_then(Value::as_str) else {
        warn!("Collaboration reply missing 'message' field");
        return fallback();
    };

    AgentReply::Structured {
        message: Some(message.to_string()),
        handoff: read_handoff(object.get("handoff")),
        is_final: object.get("final").and_then(Value::as_bool).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_plain_text() {
        assert_eq!(parse_single("  Hello there "), AgentReply::Text("Hello there".to_string()));
    }

    #[test]
    fn test_single_handoff() {
        let reply = parse_single(r#"{ "handoff": { "to": "claude", "task": "check my math" } }"#);
        assert_eq!(
            reply,
            AgentReply::Structured {
                message: None,
                handoff: Some(Handoff::new("claude", "check my math")),
                is_final: false,
            }
        );
    }

    #[test]
    fn test_single_json_without_handoff_is_text() {
        let raw = r#"{"answer": 42}"#;
        assert_eq!(parse_single(raw), AgentReply::Text(raw.to_string()));
    }

    #[test]
    fn test_single_fenced_handoff() {
        let reply = parse_single("```json\n{\"handoff\": {\"to\": \"gpt\", \"task\": \"edit\"}}\n```");
        assert_eq!(reply.handoff().map(|h| h.to.as_str()), Some("gpt"));
    }

    #[test]
    fn test_collaboration_full_turn() {
        let reply = parse_collaboration(
            r#"{"message": "Here's a draft", "handoff": {"to": "gpt", "task": "tighten it"}, "final": false}"#,
        );
        let (message, handoff, is_final) = reply.into_turn();
        assert_eq!(message, "Here's a draft");
        assert_eq!(handoff, Some(Handoff::new("gpt", "tighten it")));
        assert!(!is_final);
    }

    #[test]
    fn test_collaboration_final_without_handoff() {
        let (message, handoff, is_final) =
            parse_collaboration(r#"{"message": "Done.", "final": true}"#).into_turn();
        assert_eq!(message, "Done.");
        assert!(handoff.is_none());
        assert!(is_final);
    }

    #[test]
    fn test_collaboration_non_json_falls_back() {
        let (message, handoff, is_final) = parse_collaboration("I think we're done").into_turn();
        assert_eq!(message, "I think we're done");
        assert!(handoff.is_none());
        assert!(!is_final);
    }

    #[test]
    fn test_collaboration_missing_message_falls_back() {
        let raw = r#"{"handoff": {"to": "claude"}, "final": true}"#;
        let (message, handoff, is_final) = parse_collaboration(raw).into_turn();
        assert_eq!(message, raw);
        assert!(handoff.is_none());
        assert!(!is_final);
    }

    #[test]
    fn test_collaboration_malformed_handoff_is_dropped() {
        let (_, handoff, _) =
            parse_collaboration(r#"{"message": "hi", "handoff": "claude"}"#).into_turn();
        assert!(handoff.is_none());
    }
}
