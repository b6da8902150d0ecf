//! Inbound and outbound router events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, Handoff};
use crate::session::CollaborationMode;

fn default_thread() -> String {
    "default".to_string()
}

/// Event handed to the router, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    HumanMessage {
        /// Agent name as typed by the human; validated on routing
        #[serde(default)]
        target: String,
        #[serde(default = "default_thread")]
        thread: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        call_id: Option<String>,
    },
    AgentCall(AgentCallEvent),
    StartCollaboration {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        goal: Option<String>,
        #[serde(default)]
        initial_speaker: Option<String>,
        #[serde(default)]
        mode: Option<CollaborationMode>,
        #[serde(default)]
        max_rounds: Option<u32>,
    },
    StopCollaboration {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Any other `type`; ignored by the dispatcher
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HumanMessage { .. } => "human_message",
            Self::AgentCall(_) => "agent_call",
            Self::StartCollaboration { .. } => "start_collaboration",
            Self::StopCollaboration { .. } => "stop_collaboration",
            Self::Unknown => "unknown",
        }
    }
}

/// Wire form of an agent call (target still unvalidated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCallEvent {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_thread")]
    pub thread: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A validated request to invoke one agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCall {
    pub target: AgentId,
    pub text: String,
    pub thread: String,
    pub call_id: String,
    pub session_id: Option<String>,
    /// Session run the call belongs to; `None` binds to whichever run is current
    pub generation: Option<u64>,
}

impl AgentCall {
    /// Single-mode call outside any session
    pub fn single(
        target: AgentId,
        text: impl Into<String>,
        thread: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            target,
            text: text.into(),
            thread: thread.into(),
            call_id: call_id.into(),
            session_id: None,
            generation: None,
        }
    }

    /// Session-scoped call for the given round
    pub fn collaboration(target: AgentId, text: impl Into<String>, session_id: &str, round: u32) -> Self {
        Self {
            target,
            text: text.into(),
            thread: default_thread(),
            call_id: format!("collab_{}_{}", session_id, round),
            session_id: Some(session_id.to_string()),
            generation: None,
        }
    }

    /// Pin the call to one run of its session
    pub fn in_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Event the router publishes to every connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Echo of a human message, emitted by the transport before routing
    HumanMessage {
        sender: String,
        target: String,
        thread: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    AgentResponse {
        sender: AgentId,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        round: Option<u32>,
        #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
        is_final: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        handoff: Option<Handoff>,
    },
    CollaborationStarted {
        session_id: String,
        goal: String,
        mode: CollaborationMode,
        initial_speaker: AgentId,
    },
    CollaborationEnded {
        session_id: String,
        reason: String,
    },
    SystemNotice {
        text: String,
    },
    Error {
        text: String,
    },
}

impl OutboundEvent {
    pub fn notice(text: impl Into<String>) -> Self {
        Self::SystemNotice { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::HumanMessage { .. } => "human_message",
            Self::AgentResponse { .. } => "agent_response",
            Self::CollaborationStarted { .. } => "collaboration_started",
            Self::CollaborationEnded { .. } => "collaboration_ended",
            Self::SystemNotice { .. } => "system_notice",
            Self::Error { .. } => "error",
        }
    }

    /// Session this event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::AgentResponse { session_id, .. } => session_id.as_deref(),
            Self::CollaborationStarted { session_id, .. }
            | Self::CollaborationEnded { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Where the router publishes outbound events (the transport's broadcast)
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: OutboundEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_human_message_defaults() {
        let json = r#"{"type":"human_message","target":"gpt","text":"hi"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InboundEvent::HumanMessage {
                target: "gpt".to_string(),
                thread: "default".to_string(),
                text: "hi".to_string(),
                call_id: None,
            }
        );
    }

    #[test]
    fn test_parse_start_collaboration_legacy_mode() {
        let json = r#"{"type":"start_collaboration","session_id":"s1","goal":"plan","mode":"autopilot","max_rounds":4}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::StartCollaboration { session_id, mode, max_rounds, initial_speaker, .. } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(mode, Some(CollaborationMode::Unbounded));
                assert_eq!(max_rounds, Some(4));
                assert!(initial_speaker.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        let event: InboundEvent = serde_json::from_str(r#"{"type":"dance","steps":3}"#).unwrap();
        assert_eq!(event, InboundEvent::Unknown);
        assert_eq!(event.kind(), "unknown");
    }

    #[test]
    fn test_parse_agent_call() {
        let json = r#"{"type":"agent_call","target":"claude","text":"go","session_id":"s9"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::AgentCall(call) => {
                assert_eq!(call.target, "claude");
                assert_eq!(call.session_id.as_deref(), Some("s9"));
                assert_eq!(call.thread, "default");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_collaboration_call_id() {
        let call = AgentCall::collaboration(AgentId::Claude, "goal", "s1", 3);
        assert_eq!(call.call_id, "collab_s1_3");
        assert_eq!(call.session_id.as_deref(), Some("s1"));
        assert_eq!(call.generation, None);
        assert_eq!(call.in_generation(4).generation, Some(4));
    }

    #[test]
    fn test_serialize_agent_response_skips_empty_fields() {
        let event = OutboundEvent::AgentResponse {
            sender: AgentId::Gpt,
            text: "done".to_string(),
            thread: None,
            round: Some(2),
            is_final: Some(true),
            session_id: Some("s1".to_string()),
            call_id: None,
            handoff: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_response");
        assert_eq!(json["sender"], "gpt");
        assert_eq!(json["final"], true);
        assert_eq!(json["round"], 2);
        assert!(json.get("call_id").is_none());
        assert!(json.get("handoff").is_none());
    }

    #[test]
    fn test_outbound_session_id() {
        let ended = OutboundEvent::CollaborationEnded {
            session_id: "s2".to_string(),
            reason: "done".to_string(),
        };
        assert_eq!(ended.session_id(), Some("s2"));
        assert_eq!(OutboundEvent::notice("hi").session_id(), None);
        assert_eq!(ended.kind(), "collaboration_ended");
    }
}
