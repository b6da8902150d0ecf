//! Agent identities and the connector capability the router drives

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::SessionContext;

/// One of the two agents sharing the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Gpt,
    Claude,
}

impl AgentId {
    /// The peer agent (used when a turn passes without an explicit handoff)
    pub fn other(self) -> Self {
        match self {
            Self::Gpt => Self::Claude,
            Self::Claude => Self::Gpt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Claude => "claude",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches('@');
        match name.to_lowercase().as_str() {
            "gpt" => Ok(Self::Gpt),
            "claude" => Ok(Self::Claude),
            _ => Err(s.to_string()),
        }
    }
}

/// Request from an agent to pass control to its peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    /// Raw target name as written by the model; validated by the router
    pub to: String,
    #[serde(default)]
    pub task: Option<String>,
}

impl Handoff {
    pub fn new(to: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            task: Some(task.into()),
        }
    }

    /// The target, if it names one of the known agents
    pub fn target(&self) -> Option<AgentId> {
        self.to.parse().ok()
    }
}

/// What an agent said back
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    /// Free text, no directives
    Text(String),
    /// JSON reply with optional visible message, handoff and completion flag
    Structured {
        message: Option<String>,
        handoff: Option<Handoff>,
        is_final: bool,
    },
}

impl AgentReply {
    pub fn handoff(&self) -> Option<&Handoff> {
        match self {
            Self::Text(_) => None,
            Self::Structured { handoff, .. } => handoff.as_ref(),
        }
    }

    /// Collapse into the (message, handoff, final) triple used by collaboration turns.
    /// Plain text is read as a non-final message without a handoff.
    pub fn into_turn(self) -> (String, Option<Handoff>, bool) {
        match self {
            Self::Text(text) => (text, None, false),
            Self::Structured {
                message,
                handoff,
                is_final,
            } => (message.unwrap_or_default(), handoff, is_final),
        }
    }
}

/// A reply plus the provider-reported token cost of producing it
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub reply: AgentReply,
    pub tokens_used: u64,
}

impl AgentResponse {
    pub fn new(reply: AgentReply, tokens_used: u64) -> Self {
        Self { reply, tokens_used }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(AgentReply::Text(text.into()), 0)
    }
}

/// Capability the router needs from each agent backend
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Which agent this connector speaks for
    fn agent(&self) -> AgentId;

    /// Single-mode call: plain prompt, no session context
    async fn send_single(&self, text: &str) -> Result<AgentResponse>;

    /// Collaboration call: prompt plus goal, round and recent transcript
    async fn send_in_collaboration(
        &self,
        text: &str,
        context: &SessionContext,
    ) -> Result<AgentResponse>;
}

/// The registered connectors, one per agent identity
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<AgentId, Arc<dyn AgentConnector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under the identity it reports
    pub fn with(mut self, connector: Arc<dyn AgentConnector>) -> Self {
        self.connectors.insert(connector.agent(), connector);
        self
    }

    pub fn get(&self, agent: AgentId) -> Option<Arc<dyn AgentConnector>> {
        self.connectors.get(&agent).cloned()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_parse() {
        assert_eq!("gpt".parse::<AgentId>(), Ok(AgentId::Gpt));
        assert_eq!("@Claude".parse::<AgentId>(), Ok(AgentId::Claude));
        assert_eq!(" GPT ".parse::<AgentId>(), Ok(AgentId::Gpt));
        assert!("gemini".parse::<AgentId>().is_err());
        assert!("".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_agent_id_other() {
        assert_eq!(AgentId::Gpt.other(), AgentId::Claude);
        assert_eq!(AgentId::Claude.other(), AgentId::Gpt);
    }

    #[test]
    fn test_agent_id_serde() {
        assert_eq!(serde_json::to_string(&AgentId::Claude).unwrap(), "\"claude\"");
        let id: AgentId = serde_json::from_str("\"gpt\"").unwrap();
        assert_eq!(id, AgentId::Gpt);
    }

    #[test]
    fn test_handoff_target() {
        assert_eq!(Handoff::new("claude", "review").target(), Some(AgentId::Claude));
        assert_eq!(Handoff::new("bard", "review").target(), None);
    }

    #[test]
    fn test_into_turn_plain_text() {
        let (message, handoff, fin) = AgentReply::Text("hello".to_string()).into_turn();
        assert_eq!(message, "hello");
        assert!(handoff.is_none());
        assert!(!fin);
    }

    #[test]
    fn test_into_turn_structured_defaults() {
        let reply = AgentReply::Structured {
            message: None,
            handoff: Some(Handoff::new("gpt", "edit")),
            is_final: true,
        };
        let (message, handoff, fin) = reply.into_turn();
        assert_eq!(message, "");
        assert_eq!(handoff.unwrap().to, "gpt");
        assert!(fin);
    }
}
