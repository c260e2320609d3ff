//! Declarative tool catalog exposed over `tools/list`.

use serde_json::{json, Value};

/// The canonical tool registry: name, description, schemas, annotations.
pub fn tool_definitions() -> Value {
    let ro = json!({
        "readOnlyHint": true,
        "destructiveHint": false,
        "idempotentHint": true,
        "openWorldHint": false
    });
    let mutating = json!({
        "readOnlyHint": false,
        "destructiveHint": true,
        "idempotentHint": false,
        "openWorldHint": false
    });
    let additive = json!({
        "readOnlyHint": false,
        "destructiveHint": false,
        "idempotentHint": false,
        "openWorldHint": false
    });

    json!([
        {
            "name": "find_definition",
            "annotations": ro,
            "description": "Locate the definition of a symbol. Runs the full analysis pipeline: lexical candidates, AST verification, concept-graph enrichment. Returns ranked definitions with per-stage timings and a fused confidence.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "symbol": { "type": "string", "description": "Identifier to resolve" },
                    "file": { "type": "string", "description": "File the request originates from (improves ranking)" },
                    "line": { "type": "integer", "description": "0-based line of the request origin" }
                },
                "required": ["symbol"]
            }
        },
        {
            "name": "find_references",
            "annotations": ro,
            "description": "Find all occurrences of a symbol across the workspace, AST-verified where possible.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "symbol": { "type": "string", "description": "Identifier to look up" }
                },
                "required": ["symbol"]
            }
        },
        {
            "name": "rename_symbol",
            "annotations": mutating,
            "description": "Plan AND apply a rename in one step. Requires the ONTOLOGY_APPLY environment flag; the staged snapshot is verified against pre-images before any file is written. Prefer plan_rename + apply_rename for review workflows.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "from": { "type": "string" },
                    "to": { "type": "string" }
                },
                "required": ["from", "to"]
            }
        },
        {
            "name": "plan_rename",
            "annotations": additive,
            "description": "Plan a rename without touching the working tree: concrete edits for every verified occurrence, propagation suggestions (paired accessors, tests, interface members), and a snapshot id holding the staged diff.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "from": { "type": "string" },
                    "to": { "type": "string" }
                },
                "required": ["from", "to"]
            }
        },
        {
            "name": "apply_rename",
            "annotations": mutating,
            "description": "Apply a snapshot produced by plan_rename. Fails when the base revision changed (unless check=false) or when any file no longer matches its recorded pre-image.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "snapshotId": { "type": "string" },
                    "check": { "type": "boolean", "description": "Verify the base revision (default true)" }
                },
                "required": ["snapshotId"]
            }
        },
        {
            "name": "explore_codebase",
            "annotations": ro,
            "description": "Bounded workspace overview: directory layout plus the top symbols per file. Use first when orienting in an unfamiliar repo.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "maxFiles": { "type": "integer", "description": "Max files to outline (default 25)" }
                }
            }
        },
        {
            "name": "build_symbol_map",
            "annotations": additive,
            "description": "Parse the whole workspace and populate the concept graph: concepts, representations, import edges, and name-derived pairings. Run once per workspace (and after large refactors).",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "grep_content",
            "annotations": ro,
            "description": "Bounded content search honoring the ignore lists. Literal by default; set regex=true for patterns.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "scope": { "type": "string", "description": "Path prefix to search under" },
                    "regex": { "type": "boolean" },
                    "caseInsensitive": { "type": "boolean" },
                    "maxResults": { "type": "integer" }
                },
                "required": ["pattern"]
            }
        },
        {
            "name": "list_files",
            "annotations": ro,
            "description": "List workspace files by glob pattern (bounded, default limit 1000).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "glob": { "type": "string", "description": "Glob pattern, e.g. '*.ts' or 'src/**'" },
                    "root": { "type": "string", "description": "Path prefix to restrict the listing" }
                }
            }
        },
        {
            "name": "get_completions",
            "annotations": ro,
            "description": "Identifier completions for a prefix, drawn from AST symbols and known concepts.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prefix": { "type": "string" },
                    "file": { "type": "string" },
                    "line": { "type": "integer" }
                },
                "required": ["prefix"]
            }
        },
        {
            "name": "list_symbols",
            "annotations": ro,
            "description": "All symbols declared in one file, with kinds, ranges, and signatures.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Workspace-relative file path" }
                },
                "required": ["path"]
            }
        },
        {
            "name": "diagnostics",
            "annotations": ro,
            "description": "Syntax and complexity diagnostics for a file (or the current candidate set).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            }
        },
        {
            "name": "pattern_stats",
            "annotations": ro,
            "description": "Learned rename patterns with occurrences, confidence, and activity state.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "knowledge_insights",
            "annotations": ro,
            "description": "Concept-graph statistics and per-layer health: counts, breaker states, cache hit rates.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "cache_controls",
            "annotations": additive,
            "description": "Inspect or clear the query and negative caches.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["stats", "clear"] }
                },
                "required": ["action"]
            }
        },
        {
            "name": "get_snapshot",
            "annotations": ro,
            "description": "Status and staged diff of a snapshot.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        },
        {
            "name": "propose_patch",
            "annotations": additive,
            "description": "Stage a unified diff for one file into a snapshot. The working tree is untouched until apply.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Snapshot id (created when omitted)" },
                    "file": { "type": "string" },
                    "diff": { "type": "string", "description": "Unified diff against the current file content" }
                },
                "required": ["file", "diff"]
            }
        },
        {
            "name": "run_checks",
            "annotations": additive,
            "description": "Run external check commands (build, tests) for a snapshot, recording results in its progress log.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "commands": { "type": "array", "items": { "type": "string" } },
                    "timeoutSec": { "type": "integer", "description": "Per-command timeout (default 120)" }
                },
                "required": ["id", "commands"]
            }
        },
        {
            "name": "patch_checks_in_snapshot",
            "annotations": additive,
            "description": "Stage a diff and run checks in one step: propose_patch followed by run_checks against the same snapshot.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Snapshot id (created when omitted)" },
                    "file": { "type": "string" },
                    "diff": { "type": "string" },
                    "commands": { "type": "array", "items": { "type": "string" } },
                    "timeoutSec": { "type": "integer" }
                },
                "required": ["file", "diff", "commands"]
            }
        }
    ])
}
