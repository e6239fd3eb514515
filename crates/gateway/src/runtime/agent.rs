//! The two-node Agent Runtime: `agent` (react-style tool loop) and
//! `summarize` (overflow handling). Each node returns an explicit tagged
//! transition rather than calling into the next node directly, per the
//! graph-control-flow design: `{update, next_node | terminal}`.

use serde_json::Value;
use uuid::Uuid;

use cx_db::checkpoints::{CheckpointMessage, ConversationState};
use cx_db::models::ThreadConfig;
use cx_domain::tool::{ContentPart, Message, MessageContent, Role};
use cx_providers::ChatRequest;

use crate::runtime::{build_assistant_tool_message, resolve_provider, summarize, tools};
use crate::state::AppState;

/// Parameters that are fixed for the lifetime of one run (one user turn),
/// threaded explicitly into every node instead of read off process-wide
/// globals.
pub struct RunContext<'a> {
    pub state: &'a AppState,
    pub thread_id: Uuid,
    pub run_id: String,
    pub thread_config: ThreadConfig,
}

/// Emitted live while a node executes, for the orchestrator to translate
/// into SSE frames.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Token { text: String },
    ToolStart { name: String, input: Value },
    ToolEnd {
        name: String,
        output: Value,
        artifacts: Vec<cx_artifacts::IngestDescriptor>,
    },
}

pub enum NextNode {
    Agent,
    Summarize,
}

/// The reducer's input: what changed during one node's step. Applied to the
/// `ConversationState` by [`apply_update`] before the checkpointer saves it.
#[derive(Default)]
pub struct StateUpdate {
    pub append_messages: Vec<CheckpointMessage>,
    pub remove_message_ids: Vec<String>,
    /// `Some(n)` sets `token_count` to `n` absolutely; the sentinel `-1`
    /// means "reset to zero" per the checkpointer's reducer contract.
    pub token_count: Option<i64>,
    /// `Some(s)` replaces the running summary.
    pub summary: Option<String>,
}

pub struct NodeOutcome {
    pub update: StateUpdate,
    pub next: Option<NextNode>,
    /// Populated only on a terminal outcome.
    pub final_text: Option<String>,
}

pub fn apply_update(conv: &mut ConversationState, update: StateUpdate) {
    if !update.remove_message_ids.is_empty() {
        conv.messages
            .retain(|m| !update.remove_message_ids.contains(&m.id));
    }
    conv.messages.extend(update.append_messages);

    if let Some(tc) = update.token_count {
        conv.token_count = if tc == -1 { 0 } else { tc };
    }
    if let Some(summary) = update.summary {
        conv.summary = summary;
    }
}

/// **agent node.** Checks the compaction threshold, then either hands off to
/// `summarize` or runs the react tool loop to completion.
pub async fn agent_step(
    ctx: &RunContext<'_>,
    conv: &ConversationState,
    events: &tokio::sync::mpsc::Sender<AgentEvent>,
) -> Result<NodeOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let agent_cfg = &ctx.state.config.agent;

    let effective_window = ctx.thread_config.context_window.unwrap_or(agent_cfg.context_window);
    let threshold = (agent_cfg.compaction_threshold as f64 * effective_window as f64) as i64;

    if conv.token_count >= threshold {
        return Ok(NodeOutcome {
            update: StateUpdate::default(),
            next: Some(NextNode::Summarize),
            final_text: None,
        });
    }

    let (provider, model_override) =
        resolve_provider(ctx.state, ctx.thread_config.model.as_deref())?;
    let model = model_override.or_else(|| Some(agent_cfg.default_model.clone()));
    let temperature = ctx.thread_config.temperature.or(Some(agent_cfg.default_temperature));

    let mut messages = build_system_messages(ctx, conv);
    messages.extend(conv.messages.iter().map(checkpoint_to_domain_message));

    let tool_defs = tools::tool_definitions();

    let mut append = Vec::new();
    let mut last_text = String::new();
    let mut last_input_tokens: Option<i64> = None;

    for _ in 0..agent_cfg.max_tool_loops {
        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature,
            model: model.clone(),
            ..Default::default()
        };

        let resp = provider.chat(&req).await?;

        if let Some(usage) = &resp.usage {
            last_input_tokens = Some(usage.prompt_tokens as i64);
        }
        if !resp.content.is_empty() {
            let _ = events.send(AgentEvent::Token { text: resp.content.clone() }).await;
        }
        last_text = resp.content.clone();

        let assistant_msg = build_assistant_tool_message(&resp.content, &resp.tool_calls);
        let assistant_id = format!("m-{}", Uuid::new_v4());
        append.push(CheckpointMessage {
            id: assistant_id,
            role: Role::Assistant,
            content: assistant_msg.content.clone(),
        });
        messages.push(assistant_msg);

        if resp.tool_calls.is_empty() {
            break;
        }

        for call in &resp.tool_calls {
            let _ = events
                .send(AgentEvent::ToolStart {
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                })
                .await;

            let outcome = tools::dispatch_tool(
                ctx.state,
                ctx.thread_id,
                &ctx.run_id,
                &call.call_id,
                &call.tool_name,
                &call.arguments,
            )
            .await;

            let output_value: Value =
                serde_json::from_str(&outcome.content).unwrap_or(Value::String(outcome.content.clone()));

            let _ = events
                .send(AgentEvent::ToolEnd {
                    name: call.tool_name.clone(),
                    output: output_value,
                    artifacts: outcome.artifacts.clone(),
                })
                .await;

            let tool_msg = Message {
                role: Role::Tool,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_use_id: call.call_id.clone(),
                    content: outcome.content.clone(),
                    is_error: outcome.is_error,
                }]),
            };
            append.push(CheckpointMessage {
                id: format!("m-{}", Uuid::new_v4()),
                role: Role::Tool,
                content: tool_msg.content.clone(),
            });
            messages.push(tool_msg);
        }
    }

    Ok(NodeOutcome {
        update: StateUpdate {
            append_messages: append,
            remove_message_ids: Vec::new(),
            token_count: last_input_tokens,
            summary: None,
        },
        next: None,
        final_text: Some(last_text),
    })
}

/// **summarize node.** Generates a fresh summary, prunes all but the last
/// `keep_last_messages`, resets `token_count`, hands back to `agent`.
pub async fn summarize_step(
    ctx: &RunContext<'_>,
    conv: &ConversationState,
) -> Result<NodeOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let keep_last = ctx.state.config.agent.keep_last_messages;
    let outcome = summarize::summarize(ctx.state, conv, keep_last).await?;

    let keep_ids: std::collections::HashSet<String> = outcome.keep_ids.into_iter().collect();
    let remove_ids = conv
        .messages
        .iter()
        .filter(|m| !keep_ids.contains(&m.id))
        .map(|m| m.id.clone())
        .collect();

    Ok(NodeOutcome {
        update: StateUpdate {
            append_messages: Vec::new(),
            remove_message_ids: remove_ids,
            token_count: Some(-1),
            summary: Some(outcome.summary),
        },
        next: Some(NextNode::Agent),
        final_text: None,
    })
}

fn build_system_messages(ctx: &RunContext<'_>, conv: &ConversationState) -> Vec<Message> {
    let mut prompt = ctx.state.config.agent.system_prompt.clone();
    if let Some(custom) = &ctx.thread_config.system_prompt {
        prompt.push_str("\n\n");
        prompt.push_str(custom);
    }

    let mut out = vec![Message::system(prompt)];
    if !conv.summary.is_empty() {
        out.push(Message::system(format!(
            "Summary of earlier conversation: {}",
            conv.summary
        )));
    }
    out
}

fn checkpoint_to_domain_message(m: &CheckpointMessage) -> Message {
    Message {
        role: m.role,
        content: m.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> CheckpointMessage {
        CheckpointMessage {
            id: id.to_owned(),
            role: Role::User,
            content: MessageContent::Text(id.to_owned()),
        }
    }

    #[test]
    fn append_messages_extends_conversation() {
        let mut conv = ConversationState::default();
        apply_update(
            &mut conv,
            StateUpdate {
                append_messages: vec![msg("a"), msg("b")],
                ..Default::default()
            },
        );
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].id, "a");
    }

    #[test]
    fn remove_message_ids_prunes_before_appending() {
        let mut conv = ConversationState {
            messages: vec![msg("a"), msg("b"), msg("c")],
            ..ConversationState::default()
        };
        apply_update(
            &mut conv,
            StateUpdate {
                remove_message_ids: vec!["a".into(), "c".into()],
                append_messages: vec![msg("d")],
                ..Default::default()
            },
        );
        let ids: Vec<_> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn token_count_sentinel_minus_one_resets_to_zero() {
        let mut conv = ConversationState {
            token_count: 500,
            ..ConversationState::default()
        };
        apply_update(
            &mut conv,
            StateUpdate {
                token_count: Some(-1),
                ..Default::default()
            },
        );
        assert_eq!(conv.token_count, 0);
    }

    #[test]
    fn token_count_none_leaves_existing_value_untouched() {
        let mut conv = ConversationState {
            token_count: 42,
            ..ConversationState::default()
        };
        apply_update(&mut conv, StateUpdate::default());
        assert_eq!(conv.token_count, 42);
    }

    #[test]
    fn summary_replaces_when_present() {
        let mut conv = ConversationState {
            summary: "old".into(),
            ..ConversationState::default()
        };
        apply_update(
            &mut conv,
            StateUpdate {
                summary: Some("new".into()),
                ..Default::default()
            },
        );
        assert_eq!(conv.summary, "new");
    }
}
