//! Declarative AST queries.
//!
//! Patterns use tree-sitter's s-expression query language, e.g.
//! `(function_declaration name: (identifier) @def)`. Compiled queries are
//! cached per `(language, pattern)` to avoid recompilation.

use super::{LanguageId, ParsedAst};
use crate::error::{CoreError, CoreResult};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor};

/// A single capture produced by a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    /// Capture name without the leading `@`.
    pub capture: String,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

fn query_cache() -> &'static DashMap<(LanguageId, String), Arc<Query>> {
    static CACHE: OnceLock<DashMap<(LanguageId, String), Arc<Query>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

fn compile(lang: LanguageId, pattern: &str) -> CoreResult<Arc<Query>> {
    let key = (lang, pattern.to_string());
    if let Some(q) = query_cache().get(&key) {
        return Ok(Arc::clone(&q));
    }
    let query = Query::new(&lang.grammar(), pattern)
        .map_err(|e| CoreError::InvalidRequest(format!("bad query pattern: {e}")))?;
    let query = Arc::new(query);
    query_cache().insert(key, Arc::clone(&query));
    Ok(query)
}

/// Run `pattern` against a parsed file. Degraded pseudo-ASTs have no tree to
/// query; they answer with captures synthesized from the symbol table when
/// the pattern names a known capture, otherwise empty.
pub fn run_query(ast: &ParsedAst, pattern: &str) -> CoreResult<Vec<QueryMatch>> {
    let Some(tree) = &ast.tree else {
        // Reduced-precision answer: every extracted symbol as a @def capture.
        if pattern.contains("@def") || pattern.contains("@name") {
            return Ok(ast
                .symbols
                .iter()
                .map(|s| QueryMatch {
                    capture: "def".into(),
                    text: s.name.clone(),
                    line: s.start_line,
                    col: s.start_col,
                })
                .collect());
        }
        return Ok(Vec::new());
    };

    let query = compile(ast.language, pattern)?;
    let names = query.capture_names();
    let source = ast.source.as_bytes();
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            let node = cap.node;
            out.push(QueryMatch {
                capture: names
                    .get(cap.index as usize)
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
                text: node.utf8_text(source).unwrap_or("").to_string(),
                line: node.start_position().row as u32,
                col: node.start_position().column as u32,
            });
        }
    }
    Ok(out)
}
