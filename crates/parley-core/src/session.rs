//! Collaboration sessions - the records the router mutates turn by turn

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::agent::AgentId;

/// How a collaboration decides whether to take another turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationMode {
    /// Round cap applies and every turn must hand off to continue
    #[default]
    #[serde(alias = "collaborate")]
    Bounded,
    /// Runs until stopped or an emergency limit fires
    #[serde(alias = "autopilot")]
    Unbounded,
}

impl std::fmt::Display for CollaborationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounded => write!(f, "bounded"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// One line of a session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub sender: AgentId,
    pub message: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

/// A running or recently ended collaboration
#[derive(Debug, Clone)]
pub struct CollaborationSession {
    pub id: String,
    pub goal: String,
    pub mode: CollaborationMode,
    pub initial_speaker: AgentId,
    pub current_speaker: AgentId,
    pub max_rounds: Option<u32>,
    pub round: u32,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Monotonic start time for the elapsed-time safeguard
    pub started: Instant,
    pub transcript: Vec<TranscriptEntry>,
    pub total_tokens: u64,
    /// Distinguishes runs that reuse the same id; assigned by the router
    pub generation: u64,
}

impl CollaborationSession {
    pub fn new(
        id: impl Into<String>,
        goal: impl Into<String>,
        mode: CollaborationMode,
        initial_speaker: AgentId,
        max_rounds: Option<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            mode,
            initial_speaker,
            current_speaker: initial_speaker,
            max_rounds,
            round: 1,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            started: Instant::now(),
            transcript: Vec::new(),
            total_tokens: 0,
            generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Mark the session ended. Returns false if it already was.
    pub fn end(&mut self) -> bool {
        if self.status == SessionStatus::Ended {
            return false;
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn record(&mut self, sender: AgentId, message: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            sender,
            message: message.into(),
            round: self.round,
            timestamp: Utc::now(),
        });
    }

    /// Snapshot handed to connectors: goal, round and the last `window` transcript entries
    pub fn context(&self, window: usize) -> SessionContext {
        let skip = self.transcript.len().saturating_sub(window);
        SessionContext {
            goal: self.goal.clone(),
            round: self.round,
            max_rounds: self.max_rounds,
            mode: self.mode,
            transcript: self
                .transcript
                .iter()
                .skip(skip)
                .map(|e| ContextLine {
                    sender: e.sender,
                    message: e.message.clone(),
                })
                .collect(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            goal: self.goal.clone(),
            mode: self.mode,
            status: self.status,
            round: self.round,
            max_rounds: self.max_rounds,
            current_speaker: self.current_speaker,
            started_at: self.started_at,
            total_tokens: self.total_tokens,
        }
    }
}

/// Session context passed to a connector in collaboration mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub goal: String,
    pub round: u32,
    pub max_rounds: Option<u32>,
    pub mode: CollaborationMode,
    pub transcript: Vec<ContextLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLine {
    pub sender: AgentId,
    pub message: String,
}

/// Public view of a session for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub goal: String,
    pub mode: CollaborationMode,
    pub status: SessionStatus,
    pub round: u32,
    pub max_rounds: Option<u32>,
    pub current_speaker: AgentId,
    pub started_at: DateTime<Utc>,
    pub total_tokens: u64,
}

/// In-memory table of sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, CollaborationSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session with this id
    pub fn insert(&mut self, session: CollaborationSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<&CollaborationSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CollaborationSession> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CollaborationSession> {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// True when the session exists and has not ended
    pub fn is_active(&self, id: &str) -> bool {
        self.sessions.get(id).is_some_and(|s| s.is_active())
    }

    /// Ids of all active sessions, oldest first
    pub fn active_ids(&self) -> Vec<String> {
        let mut active: Vec<&CollaborationSession> =
            self.sessions.values().filter(|s| s.is_active()).collect();
        active.sort_by_key(|s| s.started);
        active.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &CollaborationSession> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> CollaborationSession {
        CollaborationSession::new(id, "write a haiku", CollaborationMode::Bounded, AgentId::Gpt, Some(3))
    }

    #[test]
    fn test_new_session_defaults() {
        let s = session("s1");
        assert_eq!(s.round, 1);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.current_speaker, AgentId::Gpt);
        assert!(s.transcript.is_empty());
        assert_eq!(s.total_tokens, 0);
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn test_end_is_one_way() {
        let mut s = session("s1");
        assert!(s.end());
        assert!(s.ended_at.is_some());
        assert!(!s.end());
        assert!(!s.is_active());
    }

    #[test]
    fn test_context_window_keeps_most_recent() {
        let mut s = session("s1");
        for i in 0..12 {
            s.record(AgentId::Gpt, format!("msg {}", i));
        }
        let ctx = s.context(8);
        assert_eq!(ctx.transcript.len(), 8);
        assert_eq!(ctx.transcript[0].message, "msg 4");
        assert_eq!(ctx.transcript[7].message, "msg 11");
        assert_eq!(ctx.goal, "write a haiku");
        assert_eq!(ctx.max_rounds, Some(3));
    }

    #[test]
    fn test_context_window_shorter_transcript() {
        let mut s = session("s1");
        s.record(AgentId::Claude, "only one");
        let ctx = s.context(8);
        assert_eq!(ctx.transcript.len(), 1);
        assert_eq!(ctx.transcript[0].sender, AgentId::Claude);
    }

    #[test]
    fn test_record_stamps_current_round() {
        let mut s = session("s1");
        s.record(AgentId::Gpt, "first");
        s.round += 1;
        s.record(AgentId::Claude, "second");
        assert_eq!(s.transcript[0].round, 1);
        assert_eq!(s.transcript[1].round, 2);
    }

    #[test]
    fn test_mode_aliases() {
        let m: CollaborationMode = serde_json::from_str("\"autopilot\"").unwrap();
        assert_eq!(m, CollaborationMode::Unbounded);
        let m: CollaborationMode = serde_json::from_str("\"collaborate\"").unwrap();
        assert_eq!(m, CollaborationMode::Bounded);
        assert_eq!(serde_json::to_string(&CollaborationMode::Unbounded).unwrap(), "\"unbounded\"");
    }

    #[test]
    fn test_store_active_ids() {
        let mut store = SessionStore::new();
        store.insert(session("a"));
        store.insert(session("b"));
        store.get_mut("a").unwrap().end();
        assert_eq!(store.active_ids(), vec!["b".to_string()]);
        assert!(store.contains("a"));
        assert!(!store.is_active("a"));
        assert!(store.is_active("b"));
        assert!(!store.is_active("missing"));
    }
}
