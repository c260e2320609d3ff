//! Tool dispatch: argument decoding and calls into the core API.

use ontoscope_core::error::{CoreError, CoreResult};
use ontoscope_core::lexical::GrepOptions;
use ontoscope_core::types::{CoreRequest, Location};
use ontoscope_core::{workspace, Orchestrator};
use serde_json::{json, Value};
use std::sync::Arc;

fn str_arg(args: &Value, key: &str) -> CoreResult<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::InvalidRequest(format!("missing required argument: {key}")))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn opt_location(args: &Value) -> Option<Location> {
    let file = args.get("file")?.as_str()?;
    let line = args.get("line").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Some(Location::new(file, line, 0))
}

fn to_value<T: serde::Serialize>(value: &T) -> CoreResult<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::Internal(e.to_string()))
}

/// Execute one named tool against the core. The returned JSON becomes the
/// text content of the MCP tool result.
pub async fn dispatch_tool(
    core: &Arc<Orchestrator>,
    name: &str,
    args: &Value,
) -> CoreResult<Value> {
    match name {
        "find_definition" => {
            let response = core
                .process(CoreRequest::FindDefinition {
                    name: str_arg(args, "symbol")?,
                    location: opt_location(args),
                })
                .await?;
            to_value(&response)
        }
        "find_references" => {
            let response = core
                .process(CoreRequest::FindReferences {
                    name: str_arg(args, "symbol")?,
                    location: opt_location(args),
                })
                .await?;
            to_value(&response)
        }
        "plan_rename" => {
            let response =
                core.plan_rename(&str_arg(args, "from")?, &str_arg(args, "to")?).await?;
            to_value(&response)
        }
        "apply_rename" => {
            let snapshot_id = str_arg(args, "snapshotId")?;
            let check = args.get("check").and_then(|v| v.as_bool()).unwrap_or(true);
            core.apply_rename(&snapshot_id, check).await?;
            Ok(json!({ "applied": true, "snapshotId": snapshot_id }))
        }
        "rename_symbol" => {
            let from = str_arg(args, "from")?;
            let to = str_arg(args, "to")?;
            let response = core.plan_rename(&from, &to).await?;
            let snapshot_id = match &response.data {
                ontoscope_core::ResponseData::RenamePlan { plan } => plan.snapshot_id.clone(),
                _ => None,
            };
            let snapshot_id = snapshot_id
                .ok_or_else(|| CoreError::NotFound(format!("no occurrences of {from}")))?;
            core.apply_rename(&snapshot_id, true).await?;
            // Applied renames train the pattern learner
            let _ = core.pattern_learner().learn_from_rename(&from, &to, "rename_symbol");
            to_value(&response)
        }
        "explore_codebase" => {
            let max_files =
                args.get("maxFiles").and_then(|v| v.as_u64()).unwrap_or(25) as usize;
            let text = workspace::explore(core.config(), max_files)?;
            Ok(json!({ "overview": text }))
        }
        "build_symbol_map" => {
            let summary = core.build_symbol_map().await?;
            to_value(&summary)
        }
        "grep_content" => {
            let opts = GrepOptions {
                regex: args.get("regex").and_then(|v| v.as_bool()).unwrap_or(false),
                case_insensitive: args
                    .get("caseInsensitive")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                max_results: args
                    .get("maxResults")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(200) as usize,
                timeout_ms: 2000,
                ..Default::default()
            };
            let scope = opt_str(args, "scope").unwrap_or_default();
            let result = core
                .lexical_engine()
                .grep(&str_arg(args, "pattern")?, &scope, &opts)
                .await?;
            to_value(&result)
        }
        "list_files" => {
            let glob = opt_str(args, "glob").unwrap_or_else(|| "*".to_string());
            let root = opt_str(args, "root").unwrap_or_default();
            let files = core.lexical_engine().glob(&glob, &root).await?;
            Ok(json!({ "files": files, "count": files.len() }))
        }
        "get_completions" => {
            let response = core
                .process(CoreRequest::Completions {
                    prefix: str_arg(args, "prefix")?,
                    location: opt_location(args),
                })
                .await?;
            to_value(&response)
        }
        "list_symbols" => {
            let path = str_arg(args, "path")?;
            let ast = core.ast_engine().parse_file(&path, false).await?;
            let symbols: Vec<Value> = ast
                .symbols
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "kind": s.kind.to_concept_kind().label(),
                        "startLine": s.start_line,
                        "endLine": s.end_line,
                        "signature": s.signature,
                    })
                })
                .collect();
            Ok(json!({ "path": path, "degraded": ast.degraded, "symbols": symbols }))
        }
        "diagnostics" => {
            let response =
                core.process(CoreRequest::Diagnostics { path: opt_str(args, "path") }).await?;
            to_value(&response)
        }
        "pattern_stats" => {
            let patterns = core.pattern_learner().pattern_stats();
            Ok(json!({ "patterns": patterns, "count": patterns.len() }))
        }
        "knowledge_insights" => {
            let (concepts, representations, relationships) =
                core.concept_graph().store().counts()?;
            let config = std::sync::Arc::clone(core.config());
            let conventions = tokio::task::spawn_blocking(move || {
                ontoscope_core::conventions::mine_conventions(&config)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("convention miner: {e}")))?;
            Ok(json!({
                "concepts": concepts,
                "representations": representations,
                "relationships": relationships,
                "conventions": to_value(&conventions)?,
                "health": to_value(&core.health())?,
            }))
        }
        "cache_controls" => match str_arg(args, "action")?.as_str() {
            "clear" => {
                core.clear_caches();
                Ok(json!({ "cleared": true }))
            }
            "stats" => to_value(&core.health()),
            other => Err(CoreError::InvalidRequest(format!("unknown cache action: {other}"))),
        },
        "get_snapshot" => {
            let id = str_arg(args, "id")?;
            let status = core.snapshot_store().status(&id).await?;
            let diff = core.snapshot_store().overlay_diff(&id).await?;
            Ok(json!({ "status": to_value(&status)?, "diff": diff }))
        }
        "propose_patch" => {
            let id = match opt_str(args, "id") {
                Some(id) => id,
                None => core.snapshot_store().create(&core.workspace_revision()).await?,
            };
            core.snapshot_store()
                .propose_diff(&id, &str_arg(args, "file")?, &str_arg(args, "diff")?)
                .await?;
            Ok(json!({ "snapshotId": id }))
        }
        "run_checks" => {
            let id = str_arg(args, "id")?;
            let commands = command_list(args)?;
            let timeout =
                args.get("timeoutSec").and_then(|v| v.as_u64()).unwrap_or(120);
            let results = core.snapshot_store().run_checks(&id, &commands, timeout).await?;
            to_value(&results)
        }
        "patch_checks_in_snapshot" => {
            let id = match opt_str(args, "id") {
                Some(id) => id,
                None => core.snapshot_store().create(&core.workspace_revision()).await?,
            };
            core.snapshot_store()
                .propose_diff(&id, &str_arg(args, "file")?, &str_arg(args, "diff")?)
                .await?;
            let commands = command_list(args)?;
            let timeout =
                args.get("timeoutSec").and_then(|v| v.as_u64()).unwrap_or(120);
            let results = core.snapshot_store().run_checks(&id, &commands, timeout).await?;
            Ok(json!({ "snapshotId": id, "checks": to_value(&results)? }))
        }
        other => Err(CoreError::InvalidRequest(format!("unknown tool: {other}"))),
    }
}

fn command_list(args: &Value) -> CoreResult<Vec<String>> {
    args.get("commands")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|c| c.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .filter(|list: &Vec<String>| !list.is_empty())
        .ok_or_else(|| CoreError::InvalidRequest("commands must be a non-empty array".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoscope_core::CoreConfig;

    async fn core() -> Arc<Orchestrator> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/user.ts"),
            "export function getUser() {}\nexport function setUser() {}\n",
        )
        .unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.layers.l1.timeout = 1000;
        config.layers.l2.timeout = 2000;
        let core = Orchestrator::init_in_memory(config).await.unwrap();
        std::mem::forget(dir);
        core
    }

    #[tokio::test]
    async fn missing_argument_is_invalid_request() {
        let core = core().await;
        let err = dispatch_tool(&core, "find_definition", &json!({})).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_request() {
        let core = core().await;
        let err = dispatch_tool(&core, "no_such_tool", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("no_such_tool"));
    }

    #[tokio::test]
    async fn list_symbols_returns_declarations() {
        let core = core().await;
        let result =
            dispatch_tool(&core, "list_symbols", &json!({ "path": "src/user.ts" })).await.unwrap();
        let symbols = result["symbols"].as_array().unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0]["name"], "getUser");
    }

    #[tokio::test]
    async fn grep_content_finds_matches() {
        let core = core().await;
        let result =
            dispatch_tool(&core, "grep_content", &json!({ "pattern": "setUser" })).await.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["hits"][0]["file"], "src/user.ts");
    }

    #[tokio::test]
    async fn plan_rename_tool_stages_snapshot() {
        let core = core().await;
        let result = dispatch_tool(
            &core,
            "plan_rename",
            &json!({ "from": "getUser", "to": "fetchUser" }),
        )
        .await
        .unwrap();
        let plan = &result["data"]["plan"];
        assert!(plan["edits"].as_array().unwrap().len() >= 1);
        let snapshot_id = plan["snapshotId"].as_str().unwrap();

        let snapshot =
            dispatch_tool(&core, "get_snapshot", &json!({ "id": snapshot_id })).await.unwrap();
        assert!(snapshot["diff"].as_str().unwrap().contains("fetchUser"));
    }

    #[tokio::test]
    async fn cache_controls_stats_and_clear() {
        let core = core().await;
        let stats = dispatch_tool(&core, "cache_controls", &json!({ "action": "stats" }))
            .await
            .unwrap();
        assert!(stats["layers"].is_array());
        let cleared = dispatch_tool(&core, "cache_controls", &json!({ "action": "clear" }))
            .await
            .unwrap();
        assert_eq!(cleared["cleared"], true);
    }
}
