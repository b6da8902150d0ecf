//! Wire envelope and REST payloads

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parley_core::session::{CollaborationMode, SessionStatus, SessionSummary};
use parley_core::{AgentId, InboundEvent, OutboundEvent, RouterSnapshot};
use serde::{Deserialize, Serialize};

/// Gateway → Client event: a router event stamped with its broadcast time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    #[serde(flatten)]
    pub event: OutboundEvent,
    /// Unix seconds
    pub ts: i64,
}

impl GatewayEvent {
    pub fn new(event: OutboundEvent) -> Self {
        Self {
            event,
            ts: Utc::now().timestamp(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}

/// Parse one client text frame
pub fn parse_frame(raw: &str) -> Result<InboundEvent, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Echo of a human message, broadcast before it is routed
pub fn echo(event: &InboundEvent) -> Option<OutboundEvent> {
    match event {
        InboundEvent::HumanMessage {
            target,
            thread,
            text,
            call_id,
        } => Some(OutboundEvent::HumanMessage {
            sender: "you".to_string(),
            target: target.clone(),
            thread: thread.clone(),
            text: text.clone(),
            call_id: call_id.clone(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_connections: usize,
    pub active_collaborations: usize,
    pub openai_key_configured: bool,
    pub anthropic_key_configured: bool,
}

/// Entry in `GET /api/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub goal: String,
    pub mode: CollaborationMode,
    pub round: u32,
    pub max_rounds: Option<u32>,
    pub current_speaker: AgentId,
    pub started_at: DateTime<Utc>,
}

impl From<SessionSummary> for ActiveSession {
    fn from(s: SessionSummary) -> Self {
        Self {
            goal: s.goal,
            mode: s.mode,
            round: s.round,
            max_rounds: s.max_rounds,
            current_speaker: s.current_speaker,
            started_at: s.started_at,
        }
    }
}

pub fn active_sessions(summaries: Vec<SessionSummary>) -> BTreeMap<String, ActiveSession> {
    summaries
        .into_iter()
        .map(|s| (s.id.clone(), ActiveSession::from(s)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAllResponse {
    pub success: bool,
    pub message: String,
    pub stopped_sessions: Vec<String>,
}

impl StopAllResponse {
    pub fn from_stopped(stopped: Vec<String>) -> Self {
        if stopped.is_empty() {
            return Self {
                success: false,
                message: "No active sessions to stop".to_string(),
                stopped_sessions: stopped,
            };
        }
        Self {
            success: true,
            message: format!("Stopped {} session(s)", stopped.len()),
            stopped_sessions: stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
    pub message: String,
}

/// Entry in `GET /debug/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    pub status: SessionStatus,
    pub goal: String,
    pub round: u32,
    pub mode: CollaborationMode,
    pub started_at: DateTime<Utc>,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSessions {
    pub collaboration_sessions: BTreeMap<String, DebugSession>,
    pub allstop_requests: Vec<String>,
}

impl From<RouterSnapshot> for DebugSessions {
    fn from(snapshot: RouterSnapshot) -> Self {
        Self {
            collaboration_sessions: snapshot
                .sessions
                .into_iter()
                .map(|s| {
                    (
                        s.id,
                        DebugSession {
                            status: s.status,
                            goal: s.goal,
                            round: s.round,
                            mode: s.mode,
                            started_at: s.started_at,
                            total_tokens: s.total_tokens,
                        },
                    )
                })
                .collect(),
            allstop_requests: snapshot.allstop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_is_flat() {
        let event = GatewayEvent::new(OutboundEvent::CollaborationEnded {
            session_id: "s1".to_string(),
            reason: "Stopped by user".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "collaboration_ended");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["reason"], "Stopped by user");
        assert!(json["ts"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_parse_frame() {
        let event = parse_frame(r#"{"type":"stop_collaboration","session_id":"s1"}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::StopCollaboration {
                session_id: Some("s1".to_string())
            }
        );
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"text":"no type"}"#).is_err());
    }

    #[test]
    fn test_echo_only_for_human_messages() {
        let human = parse_frame(r#"{"type":"human_message","target":"claude","text":"hey"}"#).unwrap();
        match echo(&human) {
            Some(OutboundEvent::HumanMessage { sender, target, text, .. }) => {
                assert_eq!(sender, "you");
                assert_eq!(target, "claude");
                assert_eq!(text, "hey");
            }
            other => panic!("unexpected echo: {:?}", other),
        }
        let stop = parse_frame(r#"{"type":"stop_collaboration"}"#).unwrap();
        assert!(echo(&stop).is_none());
    }

    #[test]
    fn test_stop_all_response() {
        let none = StopAllResponse::from_stopped(vec![]);
        assert!(!none.success);
        assert_eq!(none.message, "No active sessions to stop");

        let two = StopAllResponse::from_stopped(vec!["a".to_string(), "b".to_string()]);
        assert!(two.success);
        assert_eq!(two.message, "Stopped 2 session(s)");
    }
}
