//! Structural complexity metrics.
//!
//! Cyclomatic: 1 + decision nodes (branches, loops, catch, ternary,
//! short-circuit operators). Cognitive: decision nodes weighted by nesting
//! depth, +1 per short-circuit operator, +1 per else-chained if. Nesting:
//! maximum block depth inside function bodies.

use super::LanguageId;
use serde::Serialize;
use tree_sitter::{Node, Tree};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ComplexityReport {
    pub cyclomatic: u32,
    pub cognitive: u32,
    pub nesting: u32,
    pub lines: u32,
}

fn is_decision(kind: &str, lang: LanguageId) -> bool {
    match lang {
        LanguageId::Python => matches!(
            kind,
            "if_statement"
                | "elif_clause"
                | "for_statement"
                | "while_statement"
                | "except_clause"
                | "conditional_expression"
        ),
        _ => matches!(
            kind,
            "if_statement"
                | "switch_case"
                | "for_statement"
                | "for_in_statement"
                | "while_statement"
                | "do_statement"
                | "catch_clause"
                | "ternary_expression"
        ),
    }
}

/// Nesting constructs contribute depth to the cognitive weighting.
fn is_nesting(kind: &str, lang: LanguageId) -> bool {
    is_decision(kind, lang) && kind != "ternary_expression" && kind != "conditional_expression"
}

fn short_circuit_count(node: &Node, source: &[u8], lang: LanguageId) -> u32 {
    match lang {
        LanguageId::Python => {
            if node.kind() == "boolean_operator" {
                1
            } else {
                0
            }
        }
        _ => {
            if node.kind() == "binary_expression" {
                if let Some(op) = node.child_by_field_name("operator") {
                    let text = op.utf8_text(source).unwrap_or("");
                    if matches!(text, "&&" | "||" | "??") {
                        return 1;
                    }
                }
            }
            0
        }
    }
}

/// True for an `if` hanging off an `else` (TS/JS `else if`, Python `elif`).
fn is_else_chained(node: &Node, lang: LanguageId) -> bool {
    match lang {
        LanguageId::Python => node.kind() == "elif_clause",
        _ => {
            node.kind() == "if_statement"
                && node
                    .parent()
                    .map(|p| p.kind() == "else_clause")
                    .unwrap_or(false)
        }
    }
}

fn is_block(kind: &str, lang: LanguageId) -> bool {
    match lang {
        LanguageId::Python => kind == "block",
        _ => kind == "statement_block",
    }
}

fn is_function(kind: &str, lang: LanguageId) -> bool {
    match lang {
        LanguageId::Python => kind == "function_definition",
        _ => matches!(
            kind,
            "function_declaration"
                | "function_expression"
                | "arrow_function"
                | "method_definition"
                | "generator_function_declaration"
        ),
    }
}

struct Walker<'a> {
    source: &'a [u8],
    lang: LanguageId,
    cyclomatic: u32,
    cognitive: u32,
    max_nesting: u32,
}

impl Walker<'_> {
    fn walk(&mut self, node: Node, decision_depth: u32, block_depth: u32, in_function: bool) {
        let kind = node.kind();
        let mut next_decision = decision_depth;
        let mut next_block = block_depth;
        let mut next_in_function = in_function;

        if is_function(kind, self.lang) {
            next_in_function = true;
            next_block = 0;
        }
        if in_function && is_block(kind, self.lang) {
            next_block = block_depth + 1;
            self.max_nesting = self.max_nesting.max(next_block);
        }

        if is_decision(kind, self.lang) {
            self.cyclomatic += 1;
            self.cognitive += 1 + decision_depth;
            if is_else_chained(&node, self.lang) {
                self.cognitive += 1;
            }
            if is_nesting(kind, self.lang) {
                next_decision = decision_depth + 1;
            }
        }

        let sc = short_circuit_count(&node, self.source, self.lang);
        self.cyclomatic += sc;
        self.cognitive += sc;

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, next_decision, next_block, next_in_function);
        }
    }
}

/// Analyze a native parse tree.
pub(crate) fn analyze_tree(tree: &Tree, source: &str, lang: LanguageId) -> ComplexityReport {
    let mut walker = Walker {
        source: source.as_bytes(),
        lang,
        cyclomatic: 1,
        cognitive: 0,
        max_nesting: 0,
    };
    walker.walk(tree.root_node(), 0, 0, false);
    ComplexityReport {
        cyclomatic: walker.cyclomatic,
        cognitive: walker.cognitive,
        nesting: walker.max_nesting,
        lines: source.lines().count() as u32,
    }
}

/// Keyword-counting estimate for degraded parses.
pub(crate) fn analyze_degraded(source: &str) -> ComplexityReport {
    let mut cyclomatic = 1u32;
    let mut nesting = 0u32;
    let mut depth: i32 = 0;
    for line in source.lines() {
        let t = line.trim();
        for kw in ["if ", "if(", "elif ", "for ", "for(", "while ", "while(", "case ", "catch", "except"] {
            if t.starts_with(kw) || t.contains(&format!(" {kw}")) {
                cyclomatic += 1;
                break;
            }
        }
        cyclomatic += t.matches("&&").count() as u32 + t.matches("||").count() as u32;
        depth += t.matches('{').count() as i32 - t.matches('}').count() as i32;
        nesting = nesting.max(depth.max(0) as u32);
    }
    ComplexityReport {
        cyclomatic,
        cognitive: cyclomatic.saturating_sub(1),
        nesting,
        lines: source.lines().count() as u32,
    }
}
