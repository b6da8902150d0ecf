//! Prompt construction shared by both connectors

use std::time::Duration;

use crate::agent::AgentId;
use crate::session::{CollaborationMode, SessionContext};

pub(crate) const TEMPERATURE: f32 = 0.7;
pub(crate) const SINGLE_MAX_TOKENS: u32 = 1000;
pub(crate) const COLLABORATION_MAX_TOKENS: u32 = 800;
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Transcript entries quoted back to the model in collaboration mode
const TRANSCRIPT_TAIL: usize = 4;

fn display_name(agent: AgentId) -> &'static str {
    match agent {
        AgentId::Gpt => "ChatGPT",
        AgentId::Claude => "Claude",
    }
}

fn strengths(agent: AgentId) -> &'static str {
    match agent {
        AgentId::Gpt => "structure, editing, organization, analysis, code optimization",
        AgentId::Claude => "creative writing, analysis, synthesis, explanations, brainstorming",
    }
}

/// System prompt for single mode: answer in text, or hand off with strict JSON
pub fn single_system_prompt(agent: AgentId) -> String {
    format!(
        r#"You are one of two assistants in a private room. Only speak when explicitly called.

If you want the other assistant to help, respond **only** with strict JSON (no extra text):
{{ "handoff": {{ "to": "{peer}", "task": "<one sentence>" }} }}

If you are answering yourself, return normal text only (no JSON).
Never cause more than one handoff per message.
Your name is "{me}" for the handoff.to field."#,
        peer = agent.other(),
        me = agent,
    )
}

/// System prompt for collaboration mode: always reply with the turn JSON
pub fn collaboration_system_prompt(agent: AgentId) -> String {
    let peer = display_name(agent.other());
    format!(
        r#"You are {me}, working collaboratively with {peer} on a shared goal.

COLLABORATION RULES:
- Respond with JSON in this exact format:
{{
  "message": "Your response visible to everyone",
  "handoff": {{
    "to": "{peer_id}",
    "task": "Brief instruction for {peer}"
  }},
  "final": false
}}

- "message" (required): Your contribution to the conversation
- "handoff" (optional): Pass control to {peer} with a specific task
- "final" (optional): Set to true if you think the goal is complete

ROLE GUIDANCE:
- You excel at: {strengths}
- Keep responses concise (2-5 sentences) to maintain collaboration flow
- In unbounded mode, build on the previous responses
- If no handoff is needed, omit the "handoff" field ({peer} will take the next turn automatically)

RESPOND ONLY WITH VALID JSON."#,
        me = display_name(agent),
        peer = peer,
        peer_id = agent.other(),
        strengths = strengths(agent),
    )
}

fn mode_line(context: &SessionContext) -> String {
    match (context.mode, context.max_rounds) {
        (CollaborationMode::Bounded, Some(max)) => format!("Mode: Bounded (max {} rounds)", max),
        (CollaborationMode::Bounded, None) => "Mode: Bounded".to_string(),
        (CollaborationMode::Unbounded, _) => "Mode: Unbounded (continues until Allstop)".to_string(),
    }
}

/// User message for a collaboration turn: goal, mode, round, task and recent transcript
pub fn collaboration_user_prompt(task: &str, context: &SessionContext) -> String {
    let mut prompt = format!(
        "GOAL: {}\n{}\nRound: {}\n\nYour task: {}",
        context.goal,
        mode_line(context),
        context.round,
        task
    );

    if !context.transcript.is_empty() {
        let skip = context.transcript.len().saturating_sub(TRANSCRIPT_TAIL);
        let recent: Vec<String> = context
            .transcript
            .iter()
            .skip(skip)
            .map(|line| format!("{}: {}", line.sender, line.message))
            .collect();
        prompt.push_str(&format!(
            "\n\nRecent conversation:\n{}\n\nNow respond to: {}",
            recent.join("\n"),
            task
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ContextLine;

    fn context(mode: CollaborationMode, max_rounds: Option<u32>, lines: usize) -> SessionContext {
        SessionContext {
            goal: "name the cat".to_string(),
            round: 3,
            max_rounds,
            mode,
            transcript: (0..lines)
                .map(|i| ContextLine {
                    sender: if i % 2 == 0 { AgentId::Gpt } else { AgentId::Claude },
                    message: format!("idea {}", i),
                })
                .collect(),
        }
    }

    #[test]
    fn test_single_prompt_names_peer() {
        let prompt = single_system_prompt(AgentId::Claude);
        assert!(prompt.contains(r#""to": "gpt""#));
        assert!(prompt.contains(r#"Your name is "claude""#));
    }

    #[test]
    fn test_collaboration_prompt_names_peer() {
        let prompt = collaboration_system_prompt(AgentId::Gpt);
        assert!(prompt.starts_with("You are ChatGPT, working collaboratively with Claude"));
        assert!(prompt.contains(r#""to": "claude""#));
    }

    #[test]
    fn test_user_prompt_without_transcript() {
        let prompt = collaboration_user_prompt("start", &context(CollaborationMode::Bounded, Some(6), 0));
        assert_eq!(
            prompt,
            "GOAL: name the cat\nMode: Bounded (max 6 rounds)\nRound: 3\n\nYour task: start"
        );
    }

    #[test]
    fn test_user_prompt_quotes_last_four_lines() {
        let prompt =
            collaboration_user_prompt("refine", &context(CollaborationMode::Unbounded, None, 6));
        assert!(prompt.contains("Mode: Unbounded (continues until Allstop)"));
        assert!(!prompt.contains("idea 1"));
        assert!(prompt.contains("gpt: idea 2\nclaude: idea 3\ngpt: idea 4\nclaude: idea 5"));
        assert!(prompt.ends_with("Now respond to: refine"));
    }
}
