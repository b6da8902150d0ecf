//! parley-core - The turn-taking brain of parley
//!
//! This crate provides:
//! - Agent identities and the connector capability the router drives
//! - The router: single-mode hops and the collaboration state machine
//! - Continuation, safeguard and allstop policies
//! - Anthropic and OpenAI HTTP connectors

pub mod agent;
pub mod allstop;
pub mod config;
pub mod error;
pub mod events;
pub mod hops;
pub mod policy;
pub mod providers;
pub mod router;
pub mod session;

// Re-export main types for convenience
pub use agent::{AgentConnector, AgentId, AgentReply, AgentResponse, ConnectorSet, Handoff};
pub use config::RouterConfig;
pub use error::RouterError;
pub use events::{AgentCall, AgentCallEvent, EventSink, InboundEvent, OutboundEvent};
pub use providers::{AnthropicConnector, OpenAiConnector};
pub use router::{Router, RouterSnapshot};
pub use session::{
    CollaborationMode, CollaborationSession, SessionContext, SessionStatus, SessionSummary,
};
