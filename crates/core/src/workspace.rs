//! Workspace scanning and symbol-map construction.
//!
//! Walks the workspace (honoring the ignore lists), parses every supported
//! file in parallel, and feeds the extracted symbols into the concept graph
//! together with import edges and name-derived pairings. `explore` renders
//! a bounded overview for agent onboarding.

use crate::astx::{self, LanguageId};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::graph::ConceptGraph;
use crate::types::{ConceptKind, RelationshipKind, MAX_FILE_READ};
use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Workspace-relative paths of all supported source files, bounded by size.
pub fn scan_workspace(config: &CoreConfig) -> Vec<String> {
    let root = &config.workspace_root;
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false).follow_links(false);
    for dir in &config.layers.l1.skip_dirs {
        let dir = dir.clone();
        builder.filter_entry(move |entry| entry.file_name().to_string_lossy() != dir);
    }

    let max_size = config.layers.l2.max_file_size.min(MAX_FILE_READ) as u64;
    let mut files = Vec::new();
    for entry in builder.build().flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if LanguageId::from_ext(ext).is_none() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > max_size).unwrap_or(true) {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Symbol map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolMapSummary {
    pub files: usize,
    pub symbols: usize,
    pub concepts: usize,
    pub relationships: usize,
    #[serde(rename = "scanMs")]
    pub scan_ms: u64,
}

fn import_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(?:import\s.*?from\s+['"]([^'"]+)['"]|import\s+['"]([^'"]+)['"]|from\s+(\S+)\s+import|require\(\s*['"]([^'"]+)['"]\s*\))"#)
            .expect("static import pattern")
    })
}

fn imported_specs(content: &str) -> Vec<String> {
    import_pattern()
        .captures_iter(content)
        .filter_map(|caps| {
            (1..=4).find_map(|i| caps.get(i)).map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Resolve a relative import spec to a scanned file, if possible.
fn resolve_import(from: &str, spec: &str, files: &[String]) -> Option<String> {
    if !spec.starts_with('.') {
        return None;
    }
    let base = Path::new(from).parent().unwrap_or_else(|| Path::new(""));
    let joined = base.join(spec);
    let mut normalized: Vec<String> = Vec::new();
    for part in joined.components() {
        match part {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::Normal(p) => normalized.push(p.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    let stem = normalized.join("/");
    for ext in ["ts", "tsx", "js", "jsx", "py"] {
        let candidate = format!("{stem}.{ext}");
        if files.binary_search(&candidate).is_ok() {
            return Some(candidate);
        }
        let index = format!("{stem}/index.{ext}");
        if files.binary_search(&index).is_ok() {
            return Some(index);
        }
    }
    None
}

/// Parse the whole workspace and populate the concept graph: concepts and
/// representations per symbol, `imports` edges between files' module
/// concepts, and name-derived pairings (accessor twins, test suffixes,
/// service/controller) as `dependsOn` edges.
pub fn build_symbol_map(
    config: &Arc<CoreConfig>,
    graph: &ConceptGraph,
) -> CoreResult<SymbolMapSummary> {
    let start = std::time::Instant::now();
    let files = scan_workspace(config);

    // Parse on a bounded pool sized to the CPU count minus one, leaving a
    // core free for the runtime. Ingestion is serialized by the store's
    // writer lock.
    let workers = std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| crate::error::CoreError::Internal(format!("parse pool: {e}")))?;
    let parsed: Vec<(String, String, Vec<astx::AstSymbol>)> = pool.install(|| {
        files
            .par_iter()
            .filter_map(|rel| {
                let ext = rel.rsplit_once('.').map(|(_, e)| e)?;
                let lang = LanguageId::from_ext(ext)?;
                let content = std::fs::read_to_string(config.workspace_root.join(rel)).ok()?;
                let engine = astx::AstEngine::new(Arc::clone(config));
                let ast = engine.parse_code(&content, lang.label()).ok()?;
                Some((rel.clone(), content, ast.symbols))
            })
            .collect()
    });

    let mut symbol_count = 0;
    for (rel, _, symbols) in &parsed {
        symbol_count += graph.ingest_file_symbols(rel, symbols, 0.8)?;
    }

    // Module concepts + import edges
    let mut relationship_count = 0;
    for (rel, content, symbols) in &parsed {
        let module_id = ConceptGraph::concept_id(rel, ConceptKind::Module);
        graph.upsert_concept(&crate::types::Concept {
            id: module_id.clone(),
            canonical_name: rel.clone(),
            kind: ConceptKind::Module,
            confidence: 0.9,
            metadata: Default::default(),
        })?;
        for spec in imported_specs(content) {
            if let Some(target) = resolve_import(rel, &spec, &files) {
                let target_id = ConceptGraph::concept_id(&target, ConceptKind::Module);
                graph.upsert_concept(&crate::types::Concept {
                    id: target_id.clone(),
                    canonical_name: target.clone(),
                    kind: ConceptKind::Module,
                    confidence: 0.9,
                    metadata: Default::default(),
                })?;
                if module_id != target_id {
                    graph.link(&module_id, &target_id, RelationshipKind::Imports, 0.9)?;
                    relationship_count += 1;
                }
            }
        }
        // Module contains its symbols
        for symbol in symbols {
            let sym_id = ConceptGraph::concept_id(&symbol.name, symbol.kind.to_concept_kind());
            graph.link(&module_id, &sym_id, RelationshipKind::Contains, 0.9)?;
            relationship_count += 1;
        }
    }

    relationship_count += link_name_derived_pairs(graph)?;

    let (concepts, _, _) = graph.store().counts()?;
    let summary = SymbolMapSummary {
        files: parsed.len(),
        symbols: symbol_count,
        concepts,
        relationships: relationship_count,
        scan_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        files = summary.files,
        symbols = summary.symbols,
        relationships = summary.relationships,
        time_ms = summary.scan_ms,
        "symbol map built"
    );
    Ok(summary)
}

/// Pairings derivable from names alone: accessor twins (`getX`/`setX`),
/// test suffixes, and service/controller twins become `dependsOn` edges so
/// the propagation planner can reach them.
pub fn link_name_derived_pairs(graph: &ConceptGraph) -> CoreResult<usize> {
    let names = graph.store().concept_names(100_000)?;
    let by_name: std::collections::HashMap<&str, &str> =
        names.iter().map(|(id, name, _, _)| (name.as_str(), id.as_str())).collect();

    let mut linked = 0;
    for (id, name, _, _) in &names {
        let mut counterparts: Vec<String> = Vec::new();
        for (prefix, twin) in [("get", "set"), ("is", "has")] {
            if let Some(prop) = name.strip_prefix(prefix) {
                if prop.starts_with(|c: char| c.is_uppercase()) {
                    counterparts.push(format!("{twin}{prop}"));
                }
            }
        }
        for suffix in ["Test", "Spec", "Tests", "Specs"] {
            counterparts.push(format!("{name}{suffix}"));
        }
        if let Some(stem) = name.strip_suffix("Service") {
            counterparts.push(format!("{stem}Controller"));
        }
        for counterpart in counterparts {
            if let Some(other_id) = by_name.get(counterpart.as_str()) {
                if *other_id != id.as_str()
                    && graph.link(id, other_id, RelationshipKind::DependsOn, 0.7).is_ok()
                {
                    linked += 1;
                }
            }
        }
    }
    debug!(pairs = linked, "name-derived pairs linked");
    Ok(linked)
}

// ---------------------------------------------------------------------------
// Explore
// ---------------------------------------------------------------------------

/// Bounded plain-text overview of the workspace: top directories and the
/// most symbol-dense files.
pub fn explore(config: &Arc<CoreConfig>, max_files: usize) -> CoreResult<String> {
    let files = scan_workspace(config);
    let mut out = String::new();
    out.push_str(&format!("workspace: {}\n", config.workspace_root.display()));
    out.push_str(&format!("source files: {}\n\n", files.len()));

    let mut dirs: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for file in &files {
        let dir = file.rsplit_once('/').map(|(d, _)| d).unwrap_or(".");
        *dirs.entry(dir.to_string()).or_default() += 1;
    }
    for (dir, count) in &dirs {
        out.push_str(&format!("  {dir}/ ({count} files)\n"));
    }

    out.push('\n');
    for rel in files.iter().take(max_files) {
        let content =
            match std::fs::read_to_string(config.workspace_root.join(rel)) {
                Ok(c) => c,
                Err(_) => continue,
            };
        let ext = rel.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let Some(lang) = LanguageId::from_ext(ext) else { continue };
        let engine = astx::AstEngine::new(Arc::clone(config));
        if let Ok(ast) = engine.parse_code(&content, lang.label()) {
            if !ast.symbols.is_empty() {
                out.push_str(&format!("{rel}:\n"));
                for symbol in ast.symbols.iter().take(12) {
                    out.push_str(&format!("  {}\n", symbol.signature));
                }
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::GraphStore;
    use std::fs;

    fn setup(dir: &Path) -> (Arc<CoreConfig>, ConceptGraph) {
        let config = Arc::new(CoreConfig::new(dir.to_path_buf()));
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let graph = ConceptGraph::new(Arc::clone(&config), store);
        (config, graph)
    }

    #[test]
    fn scan_skips_ignored_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/p")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "export class A {}\n").unwrap();
        fs::write(dir.path().join("src/b.md"), "# doc\n").unwrap();
        fs::write(dir.path().join("node_modules/p/c.ts"), "export class C {}\n").unwrap();

        let config = CoreConfig::new(dir.path().to_path_buf());
        assert_eq!(scan_workspace(&config), vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn symbol_map_populates_graph() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/user.ts"),
            "import { log } from './log';\nexport function getUser() {}\nexport function setUser() {}\n",
        )
        .unwrap();
        fs::write(dir.path().join("src/log.ts"), "export function log() {}\n").unwrap();

        let (config, graph) = setup(dir.path());
        let summary = build_symbol_map(&config, &graph).unwrap();
        assert_eq!(summary.files, 2);
        assert!(summary.symbols >= 3);

        let defs = graph.find_definition("getUser").unwrap();
        assert!(!defs.is_empty());
        assert_eq!(defs[0].representations[0].location.uri(), "src/user.ts");
    }

    #[test]
    fn import_edges_link_modules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "import { b } from './b';\n").unwrap();
        fs::write(dir.path().join("b.ts"), "export function b() {}\n").unwrap();

        let (config, graph) = setup(dir.path());
        build_symbol_map(&config, &graph).unwrap();

        let a_id = ConceptGraph::concept_id("a.ts", ConceptKind::Module);
        let edges = graph.relationships(&a_id, Some(RelationshipKind::Imports), Some(1)).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, ConceptGraph::concept_id("b.ts", ConceptKind::Module));
    }

    #[test]
    fn accessor_pairs_get_linked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("u.ts"),
            "export function getUser() {}\nexport function setUser() {}\nexport function getUserTest() {}\n",
        )
        .unwrap();
        let (config, graph) = setup(dir.path());
        build_symbol_map(&config, &graph).unwrap();

        let getter_id = ConceptGraph::concept_id("getUser", ConceptKind::Function);
        let edges =
            graph.relationships(&getter_id, Some(RelationshipKind::DependsOn), Some(1)).unwrap();
        assert!(edges.len() >= 2, "setter and test twin linked: {edges:?}");
    }

    #[test]
    fn import_spec_extraction() {
        let specs = imported_specs(
            "import { a } from './a';\nimport './side';\nfrom .base import thing\nconst x = require('./x');\n",
        );
        assert!(specs.contains(&"./a".to_string()));
        assert!(specs.contains(&"./side".to_string()));
        assert!(specs.contains(&"./x".to_string()));
    }

    #[test]
    fn explore_lists_dirs_and_symbols() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "export class Widget {}\n").unwrap();
        let (config, _) = setup(dir.path());
        let text = explore(&config, 10).unwrap();
        assert!(text.contains("src/ (1 files)"));
        assert!(text.contains("class Widget"));
    }
}
