//! The Streaming Orchestrator: drives the Agent Runtime for one user turn
//! and translates its events into the SSE frame protocol clients consume.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use cx_db::checkpoints;
use cx_db::messages::{self, NewMessage};
use cx_db::models::MessageRole;
use cx_domain::tool::{Message, MessageContent, Role};
use cx_providers::ChatRequest;

use crate::runtime::agent::{self, AgentEvent, NextNode, RunContext};
use crate::runtime::resolve_titler;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SseFrame {
    #[serde(rename = "context_update")]
    ContextUpdate { tokens_used: i64, max_tokens: i64 },
    #[serde(rename = "token")]
    Token { content: String },
    #[serde(rename = "tool_start")]
    ToolStart { name: String, input: Value },
    #[serde(rename = "tool_end")]
    ToolEnd {
        name: String,
        output: Value,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        artifacts: Vec<ArtifactDescriptorOut>,
    },
    #[serde(rename = "summarizing")]
    Summarizing { status: &'static str },
    #[serde(rename = "title_updated")]
    TitleUpdated { title: String },
    #[serde(rename = "done")]
    Done { message_id: Option<String> },
    #[serde(rename = "error")]
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDescriptorOut {
    pub id: Uuid,
    pub name: String,
    pub mime: String,
    pub size: i64,
    pub url: Option<String>,
}

fn to_descriptors(ingested: Vec<cx_artifacts::IngestDescriptor>) -> Vec<ArtifactDescriptorOut> {
    ingested
        .into_iter()
        .filter_map(|d| match d.outcome {
            cx_artifacts::IngestOutcome::Ok { artifact, download_url } => Some(ArtifactDescriptorOut {
                id: artifact.id,
                name: d.filename,
                mime: artifact.mime,
                size: artifact.size_bytes,
                url: download_url,
            }),
            _ => None,
        })
        .collect()
}

/// Drives one user turn end to end: loads checkpointed state, runs the
/// agent/summarize FSM to completion, persists assistant/tool rows in a
/// short-lived transaction, optionally auto-titles, and streams SSE frames
/// back over `tx` the whole way. Never propagates an error out of this
/// function — every failure becomes an `error` frame.
pub async fn run_turn(state: AppState, thread_id: Uuid, user_message_id: String, tx: mpsc::Sender<SseFrame>) {
    if let Err(e) = run_turn_inner(&state, thread_id, &user_message_id, &tx).await {
        tracing::warn!(thread_id = %thread_id, error = %e, "run aborted");
        let _ = tx.send(SseFrame::Error { error: e.to_string() }).await;
    }
}

async fn run_turn_inner(
    state: &AppState,
    thread_id: Uuid,
    user_message_id: &str,
    tx: &mpsc::Sender<SseFrame>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // At most one run per thread at a time; later turns queue rather than
    // being rejected.
    let _permit = state.thread_locks.acquire(&thread_id.to_string()).await;

    let run_id = Uuid::new_v4().to_string();
    let thread_config = cx_db::threads::get_config(&state.db, thread_id).await?;

    let mut conv = checkpoints::load(&state.db, thread_id).await?;
    let max_tokens = thread_config
        .context_window
        .unwrap_or(state.config.agent.context_window) as i64;
    tx.send(SseFrame::ContextUpdate {
        tokens_used: conv.token_count,
        max_tokens,
    })
    .await
    .ok();

    let (events_tx, mut events_rx) = mpsc::channel::<AgentEvent>(64);
    let ctx = RunContext {
        state,
        thread_id,
        run_id: run_id.clone(),
        thread_config,
    };

    let mut node = NextNode::Agent;
    let mut final_text: Option<String> = None;
    // One entry per completed tool call, in call order: (name, input, output).
    // `agent_step` dispatches tool calls sequentially and awaits each one
    // before starting the next, so a `ToolStart` is always immediately
    // followed by its matching `ToolEnd` with no interleaving.
    let mut tool_accum: Vec<(String, Value, Value)> = Vec::new();
    let mut artifact_accum: Vec<cx_artifacts::IngestDescriptor> = Vec::new();

    loop {
        match node {
            NextNode::Agent => {
                let step = agent::agent_step(&ctx, &conv, &events_tx).await?;
                drain_ready_events(&mut events_rx, tx, &mut tool_accum, &mut artifact_accum).await;
                agent::apply_update(&mut conv, step.update);
                checkpoints::save(&state.db, thread_id, &conv).await?;
                match step.next {
                    Some(NextNode::Summarize) => node = NextNode::Summarize,
                    Some(NextNode::Agent) | None => {
                        final_text = step.final_text;
                        break;
                    }
                }
            }
            NextNode::Summarize => {
                tx.send(SseFrame::Summarizing { status: "start" }).await.ok();
                let step = agent::summarize_step(&ctx, &conv).await?;
                agent::apply_update(&mut conv, step.update);
                checkpoints::save(&state.db, thread_id, &conv).await?;
                tx.send(SseFrame::Summarizing { status: "done" }).await.ok();
                tx.send(SseFrame::ContextUpdate {
                    tokens_used: conv.token_count,
                    max_tokens,
                })
                .await
                .ok();
                node = step.next.unwrap_or(NextNode::Agent);
            }
        }
    }
    drop(events_tx);
    drain_ready_events(&mut events_rx, tx, &mut tool_accum, &mut artifact_accum).await;

    let assistant_message_id = messages::assistant_message_id(user_message_id);

    if let Some(text) = &final_text {
        let mut tx = state.db.begin().await?;

        for (idx, (name, input, output)) in tool_accum.iter().enumerate() {
            let msg_id = messages::tool_message_id(user_message_id, idx);
            messages::insert_tx(
                &mut tx,
                NewMessage {
                    thread_id,
                    message_id: msg_id,
                    role: MessageRole::Tool,
                    content: None,
                    tool_name: Some(name.clone()),
                    tool_input: Some(input.clone()),
                    tool_output: Some(output.clone()),
                    metadata: Some(serde_json::json!({"run_id": run_id})),
                },
            )
            .await?;
        }

        messages::insert_tx(
            &mut tx,
            NewMessage {
                thread_id,
                message_id: assistant_message_id.clone(),
                role: MessageRole::Assistant,
                content: Some(serde_json::json!({"text": text})),
                tool_name: None,
                tool_input: None,
                tool_output: None,
                metadata: Some(serde_json::json!({"run_id": run_id})),
            },
        )
        .await?;

        tx.commit().await?;
    }

    maybe_auto_title(state, thread_id, tx).await;

    tx.send(SseFrame::Done {
        message_id: final_text.as_ref().map(|_| assistant_message_id.clone()),
    })
    .await
    .ok();

    Ok(())
}

/// Drain whatever events a node has queued so far, translating each into an
/// SSE frame and folding tool calls into the persistence accumulators.
/// Nodes run to completion before yielding control back here (today's
/// providers are called non-streaming), so this always empties the channel.
async fn drain_ready_events(
    rx: &mut mpsc::Receiver<AgentEvent>,
    tx: &mpsc::Sender<SseFrame>,
    tool_accum: &mut Vec<(String, Value, Value)>,
    artifact_accum: &mut Vec<cx_artifacts::IngestDescriptor>,
) {
    while let Ok(ev) = rx.try_recv() {
        record_event(ev, tx, tool_accum, artifact_accum).await;
    }
}

async fn record_event(
    ev: AgentEvent,
    tx: &mpsc::Sender<SseFrame>,
    tool_accum: &mut Vec<(String, Value, Value)>,
    artifact_accum: &mut Vec<cx_artifacts::IngestDescriptor>,
) {
    match ev {
        AgentEvent::Token { text } => {
            tx.send(SseFrame::Token { content: text }).await.ok();
        }
        AgentEvent::ToolStart { name, input } => {
            tool_accum.push((name.clone(), input.clone(), Value::Null));
            tx.send(SseFrame::ToolStart { name, input }).await.ok();
        }
        AgentEvent::ToolEnd { name, output, artifacts } => {
            if let Some(last) = tool_accum.last_mut() {
                if last.0 == name {
                    last.2 = output.clone();
                }
            }
            artifact_accum.extend(artifacts.clone());
            tx.send(SseFrame::ToolEnd {
                name,
                output,
                artifacts: to_descriptors(artifacts),
            })
            .await
            .ok();
        }
    }
}

async fn maybe_auto_title(state: &AppState, thread_id: Uuid, tx: &mpsc::Sender<SseFrame>) {
    let Ok(thread) = cx_db::threads::require(&state.db, thread_id).await else {
        return;
    };
    if thread.title != "New chat" {
        return;
    }

    let Ok(history) = messages::list_for_thread(&state.db, thread_id).await else {
        return;
    };
    if history.is_empty() {
        return;
    }

    let Some(provider) = resolve_titler(state) else {
        return;
    };

    let transcript = history
        .iter()
        .take(4)
        .filter_map(|m| m.content.as_ref().map(|c| format!("{:?}: {c}", m.role)))
        .collect::<Vec<_>>()
        .join("\n");

    let req = ChatRequest {
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(format!(
                "Generate a short (3-6 word) title for this conversation. Respond with the \
                 title only, no quotes or punctuation.\n\n{transcript}"
            )),
        }],
        temperature: Some(0.3),
        ..Default::default()
    };

    match provider.chat(&req).await {
        Ok(resp) => {
            let title = resp.content.trim().trim_matches('"').to_string();
            if title.is_empty() {
                return;
            }
            if let Err(e) = cx_db::threads::set_title(&state.db, thread_id, &title).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "failed to persist generated title");
                return;
            }
            tx.send(SseFrame::TitleUpdated { title }).await.ok();
        }
        Err(e) => {
            tracing::warn!(thread_id = %thread_id, error = %e, "title generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent::AgentEvent;

    fn ok_descriptor(filename: &str, thread_id: Uuid) -> cx_artifacts::IngestDescriptor {
        cx_artifacts::IngestDescriptor {
            filename: filename.to_owned(),
            outcome: cx_artifacts::IngestOutcome::Ok {
                artifact: cx_db::models::Artifact {
                    id: Uuid::new_v4(),
                    thread_id,
                    fingerprint: "fp".into(),
                    filename: filename.to_owned(),
                    mime: "text/plain".into(),
                    size_bytes: 10,
                    session_id: "s".into(),
                    run_id: "r".into(),
                    tool_call_id: "tc".into(),
                    metadata: None,
                    created_at: chrono::Utc::now(),
                },
                download_url: Some("/v1/artifacts/x?token=y".into()),
            },
        }
    }

    fn failed_descriptor(filename: &str) -> cx_artifacts::IngestDescriptor {
        cx_artifacts::IngestDescriptor {
            filename: filename.to_owned(),
            outcome: cx_artifacts::IngestOutcome::SizeExceeded { size_bytes: 999, max_bytes: 10 },
        }
    }

    #[test]
    fn to_descriptors_drops_failed_outcomes() {
        let thread_id = Uuid::new_v4();
        let ingested = vec![ok_descriptor("a.txt", thread_id), failed_descriptor("b.bin")];
        let descriptors = to_descriptors(ingested);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "a.txt");
        assert_eq!(descriptors[0].url.as_deref(), Some("/v1/artifacts/x?token=y"));
    }

    #[tokio::test]
    async fn record_event_token_forwards_as_sse_token() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tool_accum = Vec::new();
        let mut artifact_accum = Vec::new();

        record_event(AgentEvent::Token { text: "hi".into() }, &tx, &mut tool_accum, &mut artifact_accum).await;

        match rx.recv().await.unwrap() {
            SseFrame::Token { content } => assert_eq!(content, "hi"),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(tool_accum.is_empty());
    }

    #[tokio::test]
    async fn record_event_pairs_tool_start_and_end() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tool_accum = Vec::new();
        let mut artifact_accum = Vec::new();

        record_event(
            AgentEvent::ToolStart { name: "search".into(), input: serde_json::json!({"q": "rust"}) },
            &tx,
            &mut tool_accum,
            &mut artifact_accum,
        )
        .await;
        record_event(
            AgentEvent::ToolEnd {
                name: "search".into(),
                output: serde_json::json!({"hits": 3}),
                artifacts: vec![],
            },
            &tx,
            &mut tool_accum,
            &mut artifact_accum,
        )
        .await;

        assert_eq!(tool_accum.len(), 1);
        assert_eq!(tool_accum[0].0, "search");
        assert_eq!(tool_accum[0].2, serde_json::json!({"hits": 3}));

        // Drains both frames without panicking on ordering.
        assert!(matches!(rx.recv().await.unwrap(), SseFrame::ToolStart { .. }));
        assert!(matches!(rx.recv().await.unwrap(), SseFrame::ToolEnd { .. }));
    }

    #[tokio::test]
    async fn record_event_collects_artifacts_from_tool_end() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tool_accum = Vec::new();
        let mut artifact_accum = Vec::new();
        let thread_id = Uuid::new_v4();

        record_event(
            AgentEvent::ToolEnd {
                name: "execute_code".into(),
                output: serde_json::json!({}),
                artifacts: vec![ok_descriptor("out.csv", thread_id)],
            },
            &tx,
            &mut tool_accum,
            &mut artifact_accum,
        )
        .await;

        assert_eq!(artifact_accum.len(), 1);
        let _ = rx.recv().await;
    }
}
