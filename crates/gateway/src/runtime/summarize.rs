//! The summarize node: compresses a long-running conversation into a
//! running summary string and prunes the checkpointed message log.

use cx_db::checkpoints::{CheckpointMessage, ConversationState};
use cx_domain::tool::{Message, MessageContent, Role};
use cx_providers::ChatRequest;

use crate::runtime::{resolve_summarizer, truncate_str};
use crate::state::AppState;

const SUMMARY_PROMPT: &str = "You are a conversation summarizer. Summarize the following \
conversation history into a concise summary that preserves: 1. The current goal or task being \
worked on 2. Key decisions made 3. Open questions or threads 4. Important facts learned along \
the way 5. Tool state (sandbox variables, files produced, pending work)\n\nBe concise but \
preserve all actionable context. Write in present tense. Omit greetings and pleasantries. Focus \
on substance.\n\nCONVERSATION:\n{conversation}";

const MAX_LINE_CHARS: usize = 2000;

pub struct SummarizeOutcome {
    pub summary: String,
    pub keep_ids: Vec<String>,
}

/// Run the summarize node: ask the summarizer role for a fresh summary,
/// then compute which message ids survive pruning.
pub async fn summarize(
    state: &AppState,
    conv: &ConversationState,
    keep_last: usize,
) -> Result<SummarizeOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let provider = resolve_summarizer(state).ok_or("no_provider_configured: no LLM providers available")?;

    let conversation_text = build_conversation_text(&conv.messages, &conv.summary);
    let prompt = SUMMARY_PROMPT.replace("{conversation}", &conversation_text);

    let req = ChatRequest {
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(prompt),
        }],
        temperature: Some(0.2),
        ..Default::default()
    };

    let resp = provider.chat(&req).await?;
    let summary = resp.content.trim().to_string();
    let summary = if summary.is_empty() {
        conv.summary.clone()
    } else {
        summary
    };

    let keep_ids = conv
        .messages
        .iter()
        .rev()
        .take(keep_last)
        .map(|m| m.id.clone())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    Ok(SummarizeOutcome { summary, keep_ids })
}

fn build_conversation_text(messages: &[CheckpointMessage], existing_summary: &str) -> String {
    let mut out = String::new();
    if !existing_summary.is_empty() {
        out.push_str("Summary of earlier conversation: ");
        out.push_str(existing_summary);
        out.push('\n');
    }

    for m in messages {
        let role = match m.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        let text = m.content.extract_all_text();
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&truncate_str(&text, MAX_LINE_CHARS));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(id: &str, role: Role, text: &str) -> CheckpointMessage {
        CheckpointMessage {
            id: id.into(),
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    #[test]
    fn build_conversation_text_includes_prior_summary() {
        let text = build_conversation_text(&[], "earlier stuff happened");
        assert!(text.starts_with("Summary of earlier conversation: earlier stuff happened"));
    }

    #[test]
    fn build_conversation_text_lists_messages_in_order() {
        let messages = vec![
            cm("1", Role::User, "hello"),
            cm("2", Role::Assistant, "hi there"),
        ];
        let text = build_conversation_text(&messages, "");
        let user_pos = text.find("User: hello").unwrap();
        let assistant_pos = text.find("Assistant: hi there").unwrap();
        assert!(user_pos < assistant_pos);
    }

    #[test]
    fn build_conversation_text_truncates_long_lines() {
        let long = "x".repeat(5000);
        let messages = vec![cm("1", Role::User, &long)];
        let text = build_conversation_text(&messages, "");
        assert!(text.len() < 5000);
        assert!(text.contains("..."));
    }
}
