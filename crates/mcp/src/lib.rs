//! MCP stdio transport for Ontoscope.
//!
//! Implements the Model Context Protocol JSON-RPC surface: a declarative
//! tool registry plus dispatch into the core orchestrator. The adapter is a
//! thin façade; all analysis lives in `ontoscope-core`.

mod registry;
mod tools;

pub use registry::tool_definitions;
pub use tools::dispatch_tool;

use ontoscope_core::Orchestrator;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "ontoscope";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// JSON-RPC plumbing
// ---------------------------------------------------------------------------

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Map a core error onto a JSON-RPC error code.
fn error_code(e: &ontoscope_core::CoreError) -> i64 {
    use ontoscope_core::CoreError;
    match e {
        CoreError::InvalidRequest(_) => -32602,
        CoreError::NotFound(_) => -32001,
        CoreError::Timeout { .. } => -32002,
        CoreError::ServiceUnavailable(_) => -32003,
        CoreError::Cancelled => -32004,
        _ => -32603,
    }
}

/// Handle one decoded JSON-RPC request. Returns `None` for notifications.
pub async fn handle_message(core: &Arc<Orchestrator>, message: &Value) -> Option<Value> {
    let method = message.get("method").and_then(|m| m.as_str())?;
    let id = message.get("id").cloned();
    // Notifications carry no id and get no response
    let id = match id {
        Some(id) => id,
        None => {
            debug!(method, "notification ignored");
            return None;
        }
    };

    match method {
        "initialize" => Some(rpc_result(
            &id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
            }),
        )),
        "ping" => Some(rpc_result(&id, json!({}))),
        "tools/list" => Some(rpc_result(&id, json!({ "tools": tool_definitions() }))),
        "tools/call" => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            match dispatch_tool(core, name, &args).await {
                Ok(result) => Some(rpc_result(
                    &id,
                    json!({
                        "content": [{ "type": "text", "text": result.to_string() }],
                        "isError": false
                    }),
                )),
                Err(e) => Some(rpc_error(&id, error_code(&e), &e.to_string())),
            }
        }
        other => Some(rpc_error(&id, -32601, &format!("unknown method: {other}"))),
    }
}

/// Run the MCP server over stdio until EOF.
pub async fn run_stdio(core: Arc<Orchestrator>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                continue;
            }
        };
        if let Some(response) = handle_message(&core, &message).await {
            let mut out = response.to_string();
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoscope_core::CoreConfig;

    async fn core() -> Arc<Orchestrator> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export class Widget {}\n").unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.layers.l1.timeout = 1000;
        config.layers.l2.timeout = 2000;
        let core = Orchestrator::init_in_memory(config).await.unwrap();
        // The tempdir must outlive the test; leak it deliberately.
        std::mem::forget(dir);
        core
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let core = core().await;
        let response = handle_message(
            &core,
            &serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["serverInfo"]["name"], "ontoscope");
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn tools_list_contains_canonical_names() {
        let core = core().await;
        let response = handle_message(
            &core,
            &serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        )
        .await
        .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> =
            tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        for expected in [
            "find_definition",
            "find_references",
            "rename_symbol",
            "plan_rename",
            "apply_rename",
            "explore_codebase",
            "build_symbol_map",
            "grep_content",
            "list_files",
            "get_completions",
            "list_symbols",
            "diagnostics",
            "pattern_stats",
            "knowledge_insights",
            "cache_controls",
            "get_snapshot",
            "propose_patch",
            "run_checks",
            "patch_checks_in_snapshot",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let core = core().await;
        let response = handle_message(
            &core,
            &serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_errors() {
        let core = core().await;
        let response = handle_message(
            &core,
            &serde_json::json!({ "jsonrpc": "2.0", "id": 3, "method": "bogus" }),
        )
        .await
        .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn tool_call_round_trip() {
        let core = core().await;
        let response = handle_message(
            &core,
            &serde_json::json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": { "name": "find_definition", "arguments": { "symbol": "Widget" } }
            }),
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["isError"], false);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("a.ts"), "definition payload expected, got {text}");
    }
}
