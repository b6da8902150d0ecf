//! The router - dispatches inbound events, runs single-mode hops and drives
//! collaboration sessions turn by turn.
//!
//! All mutable state lives behind one lock that is never held across an
//! await. Every connector call is a suspension point during which a stop may
//! land, so session state is re-validated after each one before acting on the
//! reply.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentId, AgentReply, AgentResponse, ConnectorSet, Handoff};
use crate::allstop::is_allstop;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::events::{AgentCall, AgentCallEvent, EventSink, InboundEvent, OutboundEvent};
use crate::hops::HopTracker;
use crate::policy::{self, Continuation};
use crate::session::{
    CollaborationMode, CollaborationSession, SessionContext, SessionStore, SessionSummary,
};

/// Shared mutable state owned by one router
struct RouterState {
    sessions: SessionStore,
    /// Sessions being torn down; replies for these are discarded
    allstop: HashSet<String>,
    /// Nested call depth per session run, keyed by generation
    call_depth: HashMap<u64, u32>,
    hops: HopTracker,
    /// Pending delayed cleanups, cancelled if the id is reused
    cleanups: HashMap<String, CancellationToken>,
    last_generation: u64,
}

/// Decrements a session run's call depth when the agent call that took it exits
struct CallDepthGuard {
    state: Arc<Mutex<RouterState>>,
    generation: u64,
}

impl Drop for CallDepthGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(depth) = state.call_depth.get_mut(&self.generation) {
            *depth = depth.saturating_sub(1);
        }
    }
}

enum Admission {
    Open {
        context: SessionContext,
        generation: u64,
        guard: CallDepthGuard,
    },
    Rejected(&'static str),
    TooDeep(u32),
}

enum Turn {
    Discard(&'static str),
    Publish {
        event: OutboundEvent,
        emergency: Option<String>,
        decision: Continuation,
    },
}

enum Advance {
    Stopped,
    RoundLimit(u32),
    Next {
        speaker: AgentId,
        task: String,
        round: u32,
    },
}

/// Debug view of the router's tables
#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub sessions: Vec<SessionSummary>,
    pub allstop: Vec<String>,
}

/// Routes messages between the two agents and owns every collaboration session
pub struct Router {
    config: RouterConfig,
    connectors: ConnectorSet,
    state: Arc<Mutex<RouterState>>,
}

impl Router {
    pub fn new(config: RouterConfig, connectors: ConnectorSet) -> Self {
        let hops = HopTracker::new(config.hop_capacity);
        if connectors.is_empty() {
            warn!("Router created without connectors; every agent call will fail");
        }
        info!(
            "Router initialized with {} connectors (max call depth {}, emergency rounds {})",
            connectors.len(),
            config.max_call_depth,
            config.max_rounds_emergency
        );
        Self {
            config,
            connectors,
            state: Arc::new(Mutex::new(RouterState {
                sessions: SessionStore::new(),
                allstop: HashSet::new(),
                call_depth: HashMap::new(),
                hops,
                cleanups: HashMap::new(),
                last_generation: 0,
            })),
        }
    }

    /// Handle one inbound event. Failures become a single `error` event; nothing propagates.
    pub async fn process(&self, event: InboundEvent, sink: &dyn EventSink) {
        let kind = event.kind();
        debug!("Processing {} event", kind);

        let result = match event {
            InboundEvent::HumanMessage {
                target,
                thread,
                text,
                call_id,
            } => {
                self.handle_human_message(&target, thread, text, call_id, sink)
                    .await
            }
            InboundEvent::AgentCall(call) => self.handle_agent_call_event(call, sink).await,
            InboundEvent::StartCollaboration {
                session_id,
                goal,
                initial_speaker,
                mode,
                max_rounds,
            } => {
                self.handle_start(session_id, goal, initial_speaker, mode, max_rounds, sink)
                    .await
            }
            InboundEvent::StopCollaboration { session_id } => {
                self.handle_stop(session_id, sink).await;
                Ok(())
            }
            InboundEvent::Unknown => {
                warn!("Ignoring event with unknown type");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Error processing {} event: {}", kind, e);
            sink.publish(OutboundEvent::error(e.to_string())).await;
        }
    }

    // ── Single mode ──

    async fn handle_human_message(
        &self,
        target: &str,
        thread: String,
        text: String,
        call_id: Option<String>,
        sink: &dyn EventSink,
    ) -> Result<(), RouterError> {
        if is_allstop(&text) {
            info!("Allstop phrase received");
            self.allstop_from_text(sink).await;
            return Ok(());
        }

        let target: AgentId = target
            .parse()
            .map_err(|_| RouterError::InvalidTarget(target.to_string()))?;
        let call_id = call_id
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.state.lock().hops.reset(&call_id);

        self.run_agent_call(AgentCall::single(target, text, thread, call_id), sink)
            .await;
        Ok(())
    }

    async fn handle_agent_call_event(
        &self,
        event: AgentCallEvent,
        sink: &dyn EventSink,
    ) -> Result<(), RouterError> {
        let target: AgentId = event
            .target
            .parse()
            .map_err(|_| RouterError::UnknownAgent(event.target.clone()))?;
        let call = AgentCall {
            target,
            text: event.text,
            thread: event.thread,
            call_id: event
                .call_id
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            session_id: event.session_id.filter(|s| !s.is_empty()),
            generation: None,
        };

        if call.session_id.is_none() {
            let allowed = self.state.lock().hops.try_hop(&call.call_id);
            if !allowed {
                warn!("Hop limit reached for call {}", call.call_id);
                return Ok(());
            }
        }

        self.run_agent_call(call, sink).await;
        Ok(())
    }

    /// Invoke an agent. Boxed because a reply can chain into the next call.
    fn run_agent_call<'a>(&'a self, call: AgentCall, sink: &'a dyn EventSink) -> BoxFuture<'a, ()> {
        async move {
            match call.session_id.clone() {
                Some(session_id) => self.run_session_call(call, session_id, sink).await,
                None => self.run_single_call(call, sink).await,
            }
        }
        .boxed()
    }

    async fn run_single_call(&self, call: AgentCall, sink: &dyn EventSink) {
        let Some(connector) = self.connectors.get(call.target) else {
            sink.publish(OutboundEvent::error(
                RouterError::UnknownAgent(call.target.to_string()).to_string(),
            ))
            .await;
            return;
        };

        let start = Instant::now();
        match connector.send_single(&call.text).await {
            Ok(response) => {
                info!(
                    "Agent {} responded in {}ms",
                    call.target,
                    start.elapsed().as_millis()
                );
                self.handle_single_response(call, response.reply, sink).await;
            }
            Err(e) => {
                error!("Error calling {}: {:#}", call.target, e);
                sink.publish(OutboundEvent::error(format!("Error from {}: {}", call.target, e)))
                    .await;
            }
        }
    }

    async fn handle_single_response(&self, call: AgentCall, reply: AgentReply, sink: &dyn EventSink) {
        let handoff = reply.handoff().cloned();
        let Some(handoff) = handoff else {
            let text = match reply {
                AgentReply::Text(text) => text,
                AgentReply::Structured { message, .. } => message.unwrap_or_default(),
            };
            sink.publish(OutboundEvent::AgentResponse {
                sender: call.target,
                text,
                thread: Some(call.thread),
                round: None,
                is_final: None,
                session_id: None,
                call_id: Some(call.call_id),
                handoff: None,
            })
            .await;
            return;
        };

        let task = handoff.task.clone().unwrap_or_default();
        sink.publish(OutboundEvent::AgentResponse {
            sender: call.target,
            text: format!("[Handing off to {}: {}]", handoff.to, task),
            thread: Some(call.thread.clone()),
            round: None,
            is_final: None,
            session_id: None,
            call_id: Some(call.call_id.clone()),
            handoff: Some(handoff.clone()),
        })
        .await;

        let next = match handoff.target() {
            Some(next) if next != call.target => next,
            Some(_) => {
                debug!("Ignoring self-handoff from {} in single mode", call.target);
                return;
            }
            None => {
                warn!("Ignoring handoff to unknown agent '{}'", handoff.to);
                return;
            }
        };

        let allowed = self.state.lock().hops.try_hop(&call.call_id);
        if !allowed {
            warn!("Hop limit reached for call {}", call.call_id);
            return;
        }

        self.run_agent_call(AgentCall::single(next, task, call.thread, call.call_id), sink)
            .await;
    }

    // ── Collaboration ──

    async fn handle_start(
        &self,
        session_id: Option<String>,
        goal: Option<String>,
        initial_speaker: Option<String>,
        mode: Option<CollaborationMode>,
        max_rounds: Option<u32>,
        sink: &dyn EventSink,
    ) -> Result<(), RouterError> {
        let session_id = session_id.filter(|s| !s.is_empty());
        let goal = goal.filter(|g| !g.trim().is_empty());
        let (Some(session_id), Some(goal)) = (session_id, goal) else {
            return Err(RouterError::MissingCollaborationFields);
        };
        let initial_speaker = match initial_speaker {
            Some(name) => name
                .parse::<AgentId>()
                .map_err(|_| RouterError::InvalidTarget(name.clone()))?,
            None => AgentId::Gpt,
        };
        let mode = mode.unwrap_or_default();

        let generation = {
            let mut state = self.state.lock();
            if state.sessions.is_active(&session_id) {
                return Err(RouterError::SessionActive(session_id));
            }
            if let Some(pending) = state.cleanups.remove(&session_id) {
                debug!("Cancelling pending cleanup for reused session id {}", session_id);
                pending.cancel();
            }
            state.last_generation += 1;
            let generation = state.last_generation;
            state.sessions.insert(
                CollaborationSession::new(
                    session_id.clone(),
                    goal.clone(),
                    mode,
                    initial_speaker,
                    max_rounds,
                )
                .with_generation(generation),
            );
            state.allstop.remove(&session_id);
            generation
        };

        info!(
            "Started {} collaboration {} with {} (goal: {})",
            mode, session_id, initial_speaker, goal
        );
        sink.publish(OutboundEvent::CollaborationStarted {
            session_id: session_id.clone(),
            goal: goal.clone(),
            mode,
            initial_speaker,
        })
        .await;

        self.run_agent_call(
            AgentCall::collaboration(initial_speaker, goal, &session_id, 1).in_generation(generation),
            sink,
        )
        .await;
        Ok(())
    }

    /// Gate a session-scoped call and take a call-depth slot if admitted.
    /// A call pinned to an earlier run of a reused id is rejected.
    fn admit(&self, session_id: &str, pinned: Option<u64>) -> Admission {
        let mut state = self.state.lock();
        if state.allstop.contains(session_id) {
            return Admission::Rejected("stopped");
        }
        let (context, generation) = match state.sessions.get(session_id) {
            Some(session) if pinned.is_some_and(|g| g != session.generation) => {
                return Admission::Rejected("superseded");
            }
            Some(session) if session.is_active() => (
                session.context(self.config.context_window),
                session.generation,
            ),
            _ => return Admission::Rejected("ended"),
        };
        let depth = state.call_depth.get(&generation).copied().unwrap_or(0);
        if depth >= self.config.max_call_depth {
            return Admission::TooDeep(depth);
        }
        state.call_depth.insert(generation, depth + 1);
        Admission::Open {
            context,
            generation,
            guard: CallDepthGuard {
                state: self.state.clone(),
                generation,
            },
        }
    }

    async fn run_session_call(&self, call: AgentCall, session_id: String, sink: &dyn EventSink) {
        let (context, generation, _guard) = match self.admit(&session_id, call.generation) {
            Admission::Open {
                context,
                generation,
                guard,
            } => (context, generation, guard),
            Admission::Rejected(why) => {
                info!("Ignoring agent call for {} session {}", why, session_id);
                return;
            }
            Admission::TooDeep(depth) => {
                error!(
                    "Maximum call depth ({}) exceeded for session {}",
                    depth, session_id
                );
                self.end_session(&session_id, "Maximum call depth exceeded", sink)
                    .await;
                return;
            }
        };

        let Some(connector) = self.connectors.get(call.target) else {
            sink.publish(OutboundEvent::error(
                RouterError::UnknownAgent(call.target.to_string()).to_string(),
            ))
            .await;
            return;
        };

        let start = Instant::now();
        match connector.send_in_collaboration(&call.text, &context).await {
            Ok(response) => {
                info!(
                    "Agent {} responded in {}ms (session {}, round {})",
                    call.target,
                    start.elapsed().as_millis(),
                    session_id,
                    context.round
                );
                self.handle_collaboration_response(&session_id, generation, call.target, response, sink)
                    .await;
            }
            Err(e) => {
                error!("Error calling {} in session {}: {:#}", call.target, session_id, e);
                sink.publish(OutboundEvent::error(format!("Error from {}: {}", call.target, e)))
                    .await;
            }
        }
    }

    async fn handle_collaboration_response(
        &self,
        session_id: &str,
        generation: u64,
        sender: AgentId,
        response: AgentResponse,
        sink: &dyn EventSink,
    ) {
        let (message, handoff, is_final) = response.reply.into_turn();

        let turn = {
            let mut state = self.state.lock();
            if state.allstop.contains(session_id) {
                Turn::Discard("stopped")
            } else {
                match state.sessions.get_mut(session_id) {
                    Some(session) if session.generation != generation => Turn::Discard("superseded"),
                    Some(session) if session.is_active() => {
                        session.total_tokens += response.tokens_used;
                        session.record(sender, message.clone());
                        let max_rounds = session.max_rounds.unwrap_or(self.config.default_max_rounds);
                        Turn::Publish {
                            event: OutboundEvent::AgentResponse {
                                sender,
                                text: message,
                                thread: None,
                                round: Some(session.round),
                                is_final: Some(is_final),
                                session_id: Some(session_id.to_string()),
                                call_id: None,
                                handoff: None,
                            },
                            emergency: policy::emergency_reason(
                                session,
                                session.started.elapsed(),
                                &self.config,
                            ),
                            decision: policy::continuation(
                                session.mode,
                                handoff.is_some(),
                                is_final,
                                session.round,
                                max_rounds,
                            ),
                        }
                    }
                    _ => Turn::Discard("ended"),
                }
            }
        };

        let (emergency, decision) = match turn {
            Turn::Discard(why) => {
                info!("Discarding response for {} session {}", why, session_id);
                return;
            }
            Turn::Publish {
                event,
                emergency,
                decision,
            } => {
                sink.publish(event).await;
                (emergency, decision)
            }
        };

        if let Some(reason) = emergency {
            error!("{} in session {}", reason, session_id);
            self.end_session(session_id, &reason, sink).await;
            return;
        }
        if let Continuation::Stop(reason) = decision {
            self.end_session(session_id, &reason.to_string(), sink).await;
            return;
        }

        let next = self.advance(session_id, generation, sender, handoff.as_ref());
        let (speaker, task, round) = match next {
            Advance::Next {
                speaker,
                task,
                round,
            } => (speaker, task, round),
            Advance::RoundLimit(round) => {
                error!("Round limit exceeded after increment: {}", round);
                self.end_session(session_id, &format!("Round limit exceeded: {}", round), sink)
                    .await;
                return;
            }
            Advance::Stopped => {
                info!("Session {} was stopped before the next turn", session_id);
                return;
            }
        };

        if policy::should_warn(round, self.config.soft_warn_interval) {
            sink.publish(OutboundEvent::notice(format!(
                "Collaboration has been running for {} rounds. Consider saying 'Allstop' if complete.",
                round
            )))
            .await;
        }

        let stopped = self.state.lock().allstop.contains(session_id);
        if stopped {
            info!("Session {} was stopped before next agent call", session_id);
            return;
        }

        info!("Making next agent call for round {} to {}", round, speaker);
        let call = AgentCall::collaboration(speaker, task, session_id, round).in_generation(generation);
        self.run_agent_call(call, sink).await;
    }

    /// Move the session to its next round and pick who speaks
    fn advance(
        &self,
        session_id: &str,
        generation: u64,
        sender: AgentId,
        handoff: Option<&Handoff>,
    ) -> Advance {
        let mut state = self.state.lock();
        if state.allstop.contains(session_id) {
            return Advance::Stopped;
        }
        let Some(session) = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.is_active() && s.generation == generation)
        else {
            return Advance::Stopped;
        };

        session.round += 1;
        if session.round > self.config.max_rounds_emergency {
            return Advance::RoundLimit(session.round);
        }

        let explicit = handoff.and_then(|h| h.target().map(|to| (to, h.task.clone())));
        let (speaker, task) = match explicit {
            Some((to, task)) => (
                to,
                task.filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| session.goal.clone()),
            ),
            None => (sender.other(), session.goal.clone()),
        };
        session.current_speaker = speaker;

        Advance::Next {
            speaker,
            task,
            round: session.round,
        }
    }

    async fn handle_stop(&self, session_id: Option<String>, sink: &dyn EventSink) {
        let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
            warn!("Stop collaboration event missing session_id");
            return;
        };
        info!("Handling stop collaboration for session: {}", session_id);

        let known = self.state.lock().sessions.contains(&session_id);
        if !known {
            warn!("Session {} not found", session_id);
            sink.publish(OutboundEvent::CollaborationEnded {
                session_id,
                reason: "Session not found".to_string(),
            })
            .await;
            return;
        }
        self.end_session(&session_id, "Stopped by user", sink).await;
    }

    async fn allstop_from_text(&self, sink: &dyn EventSink) {
        let active = self.state.lock().sessions.active_ids();
        if active.is_empty() {
            sink.publish(OutboundEvent::notice("No active collaboration session to stop."))
                .await;
            return;
        }
        for session_id in active {
            self.end_session(&session_id, "Allstop command", sink).await;
        }
    }

    /// End a session: mark it, flag in-flight replies for discard, announce, and
    /// schedule removal after the grace window. Returns false if it had already ended.
    async fn end_session(&self, session_id: &str, reason: &str, sink: &dyn EventSink) -> bool {
        let token = {
            let mut state = self.state.lock();
            match state.sessions.get_mut(session_id) {
                Some(session) => {
                    if !session.end() {
                        debug!("Session {} already ended", session_id);
                        return false;
                    }
                    let generation = session.generation;
                    state.call_depth.remove(&generation);
                }
                None => warn!("Session {} not found when trying to end it", session_id),
            }
            state.allstop.insert(session_id.to_string());

            let token = CancellationToken::new();
            if let Some(previous) = state.cleanups.insert(session_id.to_string(), token.clone()) {
                previous.cancel();
            }
            token
        };

        info!("Ending collaboration session {}, reason: {}", session_id, reason);
        sink.publish(OutboundEvent::CollaborationEnded {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        })
        .await;

        self.schedule_cleanup(session_id.to_string(), token);
        true
    }

    fn schedule_cleanup(&self, session_id: String, token: CancellationToken) {
        let state = self.state.clone();
        let grace = self.config.cleanup_grace();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Cleanup for session {} cancelled", session_id);
                }
                _ = tokio::time::sleep(grace) => {
                    let mut state = state.lock();
                    if token.is_cancelled() {
                        return;
                    }
                    state.allstop.remove(&session_id);
                    if state.sessions.get(&session_id).is_some_and(|s| !s.is_active()) {
                        state.sessions.remove(&session_id);
                    }
                    state.cleanups.remove(&session_id);
                    info!("Session {} fully cleaned up", session_id);
                }
            }
        });
    }

    // ── Control surface ──

    /// Summaries of all active sessions, oldest first
    pub fn active_sessions(&self) -> Vec<SessionSummary> {
        let state = self.state.lock();
        state
            .sessions
            .active_ids()
            .iter()
            .filter_map(|id| state.sessions.get(id).map(|s| s.summary()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().sessions.active_ids().len()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.state.lock().sessions.get(session_id).map(|s| s.summary())
    }

    /// Stop one session. Returns false if the id is unknown.
    pub async fn stop_session(&self, session_id: &str, reason: &str, sink: &dyn EventSink) -> bool {
        let known = self.state.lock().sessions.contains(session_id);
        if !known {
            return false;
        }
        self.end_session(session_id, reason, sink).await;
        true
    }

    /// Stop every active session, returning the ids that were stopped
    pub async fn stop_all(&self, reason: &str, sink: &dyn EventSink) -> Vec<String> {
        let active = self.state.lock().sessions.active_ids();
        let mut stopped = Vec::with_capacity(active.len());
        for session_id in active {
            if self.end_session(&session_id, reason, sink).await {
                stopped.push(session_id);
            }
        }
        stopped
    }

    pub fn debug_snapshot(&self) -> RouterSnapshot {
        let state = self.state.lock();
        let mut sessions: Vec<SessionSummary> = state.sessions.all().map(|s| s.summary()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        let mut allstop: Vec<String> = state.allstop.iter().cloned().collect();
        allstop.sort();
        RouterSnapshot { sessions, allstop }
    }

    #[cfg(test)]
    fn call_depth(&self, session_id: &str) -> Option<u32> {
        let state = self.state.lock();
        let generation = state.sessions.get(session_id)?.generation;
        state.call_depth.get(&generation).copied()
    }

    #[cfg(test)]
    fn is_flagged(&self, session_id: &str) -> bool {
        self.state.lock().allstop.contains(session_id)
    }

    #[cfg(test)]
    fn hop_count(&self, call_id: &str) -> Option<u32> {
        self.state.lock().hops.hops(call_id)
    }
}
