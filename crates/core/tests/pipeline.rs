//! End-to-end pipeline tests over real temp workspaces.

use ontoscope_core::types::{CoreRequest, FileEvent, ResponseData};
use ontoscope_core::{CoreConfig, CoreError, Orchestrator};
use std::fs;
use std::path::Path;
use std::sync::Arc;

async fn core_for(dir: &Path) -> Arc<Orchestrator> {
    let mut config = CoreConfig::new(dir.to_path_buf());
    config.layers.l1.timeout = 2000;
    config.layers.l2.timeout = 2000;
    Orchestrator::init_in_memory(config).await.unwrap()
}

fn definitions(response: &ontoscope_core::CoreResponse) -> Vec<&ontoscope_core::FoundSymbol> {
    match &response.data {
        ResponseData::Definitions { symbols } => symbols.iter().collect(),
        other => panic!("expected definitions, got {other:?}"),
    }
}

#[tokio::test]
async fn multi_language_workspace_definitions() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/app.ts"), "export class App {}\n").unwrap();
    fs::write(dir.path().join("src/util.js"), "function formatName(n) { return n; }\n").unwrap();
    fs::write(dir.path().join("src/main.py"), "def run_pipeline():\n    pass\n").unwrap();
    let core = core_for(dir.path()).await;

    for (symbol, file) in [
        ("App", "src/app.ts"),
        ("formatName", "src/util.js"),
        ("run_pipeline", "src/main.py"),
    ] {
        let response = core
            .process(CoreRequest::FindDefinition { name: symbol.into(), location: None })
            .await
            .unwrap();
        let defs = definitions(&response);
        assert!(!defs.is_empty(), "{symbol} should resolve");
        assert_eq!(defs[0].location.uri(), file, "{symbol} resolves to {file}");
        assert!(response.per_stage.l2 > 0.0);
    }
}

#[tokio::test]
async fn textual_match_is_not_a_definition() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("a.ts"),
        "// mentions Widget in a comment\nconst w = makeWidget();\n",
    )
    .unwrap();
    fs::write(dir.path().join("b.ts"), "export class Widget {}\n").unwrap();
    let core = core_for(dir.path()).await;

    let response = core
        .process(CoreRequest::FindDefinition { name: "Widget".into(), location: None })
        .await
        .unwrap();
    let defs = definitions(&response);
    assert_eq!(defs.len(), 1, "only the declaration counts: {defs:?}");
    assert_eq!(defs[0].location.uri(), "b.ts");
}

#[tokio::test]
async fn zero_results_is_success_not_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
    let core = core_for(dir.path()).await;

    let response = core
        .process(CoreRequest::FindDefinition { name: "DoesNotExist".into(), location: None })
        .await
        .unwrap();
    assert!(definitions(&response).is_empty());
    assert!(response.failures.is_empty(), "no layer failed: {:?}", response.failures);
}

#[tokio::test]
async fn references_span_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("def.ts"), "export function helper() {}\n").unwrap();
    fs::write(dir.path().join("use.ts"), "import { helper } from './def';\nhelper();\n").unwrap();
    let core = core_for(dir.path()).await;

    let response = core
        .process(CoreRequest::FindReferences { name: "helper".into(), location: None })
        .await
        .unwrap();
    let ResponseData::References { symbols } = &response.data else {
        panic!("expected references");
    };
    let files: std::collections::HashSet<&str> =
        symbols.iter().map(|s| s.location.uri()).collect();
    assert!(files.contains("def.ts") && files.contains("use.ts"), "{files:?}");
}

#[tokio::test]
async fn rename_plan_round_trip_is_inverse() {
    let dir = tempfile::tempdir().unwrap();
    let original = "export function getUser() {}\nconst a = getUser();\n";
    fs::write(dir.path().join("u.ts"), original).unwrap();
    let core = core_for(dir.path()).await;

    let forward = core.plan_rename("getUser", "fetchUser").await.unwrap();
    let ResponseData::RenamePlan { plan: fwd } = &forward.data else { panic!() };

    // Plan the inverse against a simulated post-apply workspace
    let dir2 = tempfile::tempdir().unwrap();
    fs::write(dir2.path().join("u.ts"), original.replace("getUser", "fetchUser")).unwrap();
    let core2 = core_for(dir2.path()).await;
    let backward = core2.plan_rename("fetchUser", "getUser").await.unwrap();
    let ResponseData::RenamePlan { plan: bwd } = &backward.data else { panic!() };

    assert_eq!(fwd.edits.len(), bwd.edits.len());
    for (f, b) in fwd.edits.iter().zip(bwd.edits.iter()) {
        assert_eq!(f.line, b.line);
        assert_eq!(f.col, b.col);
        assert_eq!(f.old_text, b.new_text);
        assert_eq!(f.new_text, b.old_text);
    }
}

#[tokio::test]
async fn full_rename_apply_flow() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("u.ts"),
        "export function getUser() {}\nconst a = getUser();\n",
    )
    .unwrap();
    let core = core_for(dir.path()).await;

    let response = core.plan_rename("getUser", "fetchUser").await.unwrap();
    let ResponseData::RenamePlan { plan } = &response.data else { panic!() };
    let snapshot_id = plan.snapshot_id.as_deref().expect("snapshot staged");

    // Tree untouched until apply
    assert!(fs::read_to_string(dir.path().join("u.ts")).unwrap().contains("getUser"));

    std::env::set_var(ontoscope_core::snapshot::APPLY_ENV_FLAG, "1");
    core.apply_rename(snapshot_id, true).await.unwrap();
    std::env::remove_var(ontoscope_core::snapshot::APPLY_ENV_FLAG);

    let after = fs::read_to_string(dir.path().join("u.ts")).unwrap();
    assert!(!after.contains("getUser"), "{after}");
    assert_eq!(after.matches("fetchUser").count(), 2);
}

#[tokio::test]
async fn symbol_map_feeds_propagation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("user.ts"),
        "export function getUser() {}\nexport function setUser() {}\nexport function getUserTest() {}\n",
    )
    .unwrap();
    let core = core_for(dir.path()).await;
    let summary = core.build_symbol_map().await.unwrap();
    assert!(summary.relationships > 0, "pairs should be linked: {summary:?}");

    let response = core.plan_rename("getUser", "fetchUser").await.unwrap();
    let ResponseData::RenamePlan { plan } = &response.data else { panic!() };
    let targets: Vec<&str> = plan.suggestions.iter().map(|s| s.target.as_str()).collect();
    assert!(targets.contains(&"setUser"), "paired setter considered: {targets:?}");
    assert!(targets.contains(&"getUserTest"), "test twin considered: {targets:?}");
    let test_suggestion =
        plan.suggestions.iter().find(|s| s.target == "getUserTest").unwrap();
    assert_eq!(test_suggestion.proposal, "fetchUserTest");
    assert!(!test_suggestion.auto_apply);
}

#[tokio::test]
async fn graph_export_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.ts"), "export class Widget {}\nexport function helper() {}\n")
        .unwrap();
    let core = core_for(dir.path()).await;
    core.build_symbol_map().await.unwrap();

    let store = core.concept_graph().store();
    let before = store.export_graph().unwrap();
    store.import_graph(&before).unwrap();
    let after = store.export_graph().unwrap();
    assert_eq!(
        serde_json::to_string(&before).unwrap(),
        serde_json::to_string(&after).unwrap(),
        "import of own export is a no-op"
    );
}

#[tokio::test]
async fn file_events_invalidate_everything() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
    let core = core_for(dir.path()).await;

    // Seed the negative cache with a miss
    let request = CoreRequest::FindDefinition { name: "LateComer".into(), location: None };
    core.process(request.clone()).await.unwrap();
    assert_eq!(core.health().negative_cache_entries, 1);

    // The symbol appears; the event must clear the stale negative entry
    fs::write(dir.path().join("b.ts"), "export class LateComer {}\n").unwrap();
    core.handle_file_event(&FileEvent::Created { path: "b.ts".into() });
    assert_eq!(core.health().negative_cache_entries, 0);

    let response = core.process(request).await.unwrap();
    let defs = definitions(&response);
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].location.uri(), "b.ts");
}

#[tokio::test]
async fn backpressure_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
    let mut config = CoreConfig::new(dir.path().to_path_buf());
    config.performance.max_concurrent_requests = 0;
    let core = Orchestrator::init_in_memory(config).await.unwrap();

    let err = core
        .process(CoreRequest::FindDefinition { name: "x".into(), location: None })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ServiceUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..8 {
        fs::write(
            dir.path().join(format!("m{i}.ts")),
            format!("export class Widget{i} {{}}\n"),
        )
        .unwrap();
    }
    let core = core_for(dir.path()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let core = Arc::clone(&core);
        handles.push(tokio::spawn(async move {
            core.process(CoreRequest::FindDefinition {
                name: format!("Widget{i}"),
                location: None,
            })
            .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let response = handle.await.unwrap().unwrap();
        let defs = definitions(&response);
        assert_eq!(defs.len(), 1, "Widget{i}");
        assert_eq!(defs[0].location.uri(), format!("m{i}.ts"));
    }
}

#[tokio::test]
async fn completions_merge_ast_and_graph() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("a.ts"),
        "export function getUser() {}\nexport function getUserById() {}\n",
    )
    .unwrap();
    let core = core_for(dir.path()).await;
    core.build_symbol_map().await.unwrap();

    let response = core
        .process(CoreRequest::Completions { prefix: "getU".into(), location: None })
        .await
        .unwrap();
    let ResponseData::Completions { items } = &response.data else {
        panic!("expected completions");
    };
    let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
    assert!(labels.contains(&"getUser"), "{labels:?}");
    assert!(labels.contains(&"getUserById"), "{labels:?}");
}
