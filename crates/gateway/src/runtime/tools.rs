//! Tool definitions exposed to the model, and the dispatcher that runs them.
//!
//! One real tool (`execute_code`, backed by the Session Manager); the rest
//! are black-box callables the model may reach for that this process does
//! not actually implement — they answer with a graceful "not available"
//! result instead of being omitted from the schema.

use serde_json::Value;
use uuid::Uuid;

use cx_domain::tool::ToolDefinition;
use cx_sandbox::ExecResult;

use crate::state::AppState;

pub const EXECUTE_CODE_TOOL: &str = "execute_code";

/// Tool call outcome: the stringified content returned to the model, whether
/// it represents an error, and any artifacts ingested along the way.
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    pub artifacts: Vec<cx_artifacts::IngestDescriptor>,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: EXECUTE_CODE_TOOL.into(),
            description: "Run Python code in a persistent sandboxed session scoped to this \
                conversation. State (variables, imports) carries over between calls. Files \
                written under /session/artifacts are captured as downloadable artifacts."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python source to execute" }
                },
                "required": ["code"]
            }),
        },
        ToolDefinition {
            name: "web.search".into(),
            description: "Search the web for up-to-date information.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "dataset.query".into(),
            description: "Query the dataset catalog for tabular data relevant to the request."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Dataset search query" }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Dispatch one model-requested tool call.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_tool(
    state: &AppState,
    thread_id: Uuid,
    run_id: &str,
    tool_call_id: &str,
    name: &str,
    arguments: &Value,
) -> ToolOutcome {
    match name {
        EXECUTE_CODE_TOOL => dispatch_execute_code(state, thread_id, run_id, tool_call_id, arguments).await,
        other => stub_tool(
            other,
            "This tool is not wired up in this deployment. Use the 'execute_code' tool as a \
             workaround where possible.",
        ),
    }
}

async fn dispatch_execute_code(
    state: &AppState,
    thread_id: Uuid,
    run_id: &str,
    tool_call_id: &str,
    arguments: &Value,
) -> ToolOutcome {
    let code = match arguments.get("code").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => {
            return ToolOutcome {
                content: serde_json::json!({"error": "missing required argument 'code'"})
                    .to_string(),
                is_error: true,
                artifacts: Vec::new(),
            }
        }
    };

    let timeout = std::time::Duration::from_secs(state.config.sandbox.exec_timeout_sec);
    let session_key = thread_id.to_string();

    let result = state
        .sandbox
        .exec(
            &session_key,
            code,
            timeout,
            &state.artifacts,
            thread_id,
            run_id,
            tool_call_id,
        )
        .await;

    match result {
        Ok(ExecResult {
            ok,
            stdout,
            stderr,
            error,
            artifacts,
        }) => ToolOutcome {
            content: serde_json::json!({
                "ok": ok,
                "stdout": stdout,
                "stderr": stderr,
                "error": error,
            })
            .to_string(),
            is_error: !ok,
            artifacts,
        },
        Err(e) => ToolOutcome {
            content: serde_json::json!({"error": e.to_string()}).to_string(),
            is_error: true,
            artifacts: Vec::new(),
        },
    }
}

fn stub_tool(name: &str, message: &str) -> ToolOutcome {
    ToolOutcome {
        content: serde_json::json!({
            "error": format!("Tool '{name}' is not available"),
            "message": message,
        })
        .to_string(),
        is_error: true,
        artifacts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definitions_includes_execute_code() {
        let defs = tool_definitions();
        assert!(defs.iter().any(|d| d.name == EXECUTE_CODE_TOOL));
    }

    #[test]
    fn tool_definitions_require_their_primary_argument() {
        for def in tool_definitions() {
            let required = def.parameters.get("required").and_then(|v| v.as_array());
            assert!(required.is_some_and(|r| !r.is_empty()), "{} has no required args", def.name);
        }
    }

    #[test]
    fn stub_tool_is_always_an_error() {
        let outcome = stub_tool("web.search", "not wired up");
        assert!(outcome.is_error);
        assert!(outcome.artifacts.is_empty());
        let parsed: Value = serde_json::from_str(&outcome.content).unwrap();
        assert_eq!(parsed["error"], "Tool 'web.search' is not available");
    }
}
