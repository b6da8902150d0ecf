//! HTTP connectors for the two agents
//!
//! Both speak the same turn protocol: free text or a strict-JSON handoff in
//! single mode, `{message, handoff, final}` JSON in collaboration mode.

pub mod anthropic;
pub mod openai;
pub mod prompt;
pub mod reply;

pub use anthropic::AnthropicConnector;
pub use openai::OpenAiConnector;
