//! Workspace convention detection.
//!
//! Scans the source set and reports the dominant identifier styles, accessor
//! pairing coverage, and test-file coverage. The report seeds the pattern
//! learner's expectations and surfaces through the insights tooling: a
//! rename that fights the dominant style is worth flagging before it spreads.

use crate::astx::{self, AstSymbolKind, LanguageId};
use crate::config::CoreConfig;
use crate::patterns::NameStyle;
use crate::workspace::scan_workspace;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConventionReport {
    pub naming: NamingReport,
    pub accessors: AccessorReport,
    pub testing: TestingReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NamingReport {
    #[serde(rename = "camelFunctions")]
    pub camel_functions: usize,
    #[serde(rename = "snakeFunctions")]
    pub snake_functions: usize,
    #[serde(rename = "pascalTypes")]
    pub pascal_types: usize,
    /// Dominant function style, when one clearly wins.
    pub style: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccessorReport {
    pub getters: usize,
    pub setters: usize,
    /// Getters with a matching `set` twin.
    pub paired: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestingReport {
    #[serde(rename = "testFiles")]
    pub test_files: usize,
    #[serde(rename = "sourceFiles")]
    pub source_files: usize,
    #[serde(rename = "suffixedSymbols")]
    pub suffixed_symbols: usize,
}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

fn is_test_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("test") || lower.contains("spec") || lower.contains("__tests__")
}

/// Mine conventions from every supported source file.
pub fn mine_conventions(config: &Arc<CoreConfig>) -> ConventionReport {
    let files = scan_workspace(config);
    let mut report = ConventionReport::default();
    let mut getter_props: BTreeSet<String> = BTreeSet::new();
    let mut setter_props: BTreeSet<String> = BTreeSet::new();

    for rel in &files {
        if is_test_path(rel) {
            report.testing.test_files += 1;
        } else {
            report.testing.source_files += 1;
        }
        let ext = rel.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let Some(lang) = LanguageId::from_ext(ext) else { continue };
        let Ok(content) = std::fs::read_to_string(config.workspace_root.join(rel)) else {
            continue;
        };
        let engine = astx::AstEngine::new(Arc::clone(config));
        let Ok(ast) = engine.parse_code(&content, lang.label()) else { continue };

        for symbol in &ast.symbols {
            match symbol.kind {
                AstSymbolKind::Function | AstSymbolKind::Method => {
                    match NameStyle::of(&symbol.name) {
                        Some(NameStyle::Camel) => report.naming.camel_functions += 1,
                        Some(NameStyle::Snake) => report.naming.snake_functions += 1,
                        _ => {}
                    }
                    if let Some(prop) = symbol.name.strip_prefix("get") {
                        if prop.starts_with(|c: char| c.is_uppercase()) {
                            report.accessors.getters += 1;
                            getter_props.insert(prop.to_string());
                        }
                    }
                    if let Some(prop) = symbol.name.strip_prefix("set") {
                        if prop.starts_with(|c: char| c.is_uppercase()) {
                            report.accessors.setters += 1;
                            setter_props.insert(prop.to_string());
                        }
                    }
                    for suffix in ["Test", "Spec", "Tests", "Specs"] {
                        if symbol.name.ends_with(suffix) {
                            report.testing.suffixed_symbols += 1;
                            break;
                        }
                    }
                }
                AstSymbolKind::Class | AstSymbolKind::Interface | AstSymbolKind::TypeAlias => {
                    if NameStyle::of(&symbol.name) == Some(NameStyle::Pascal) {
                        report.naming.pascal_types += 1;
                    }
                }
                _ => {}
            }
        }
    }

    report.accessors.paired = getter_props.intersection(&setter_props).count();

    report.naming.style = if report.naming.camel_functions > report.naming.snake_functions * 3 {
        "camelCase".into()
    } else if report.naming.snake_functions > report.naming.camel_functions * 3 {
        "snake_case".into()
    } else if report.naming.camel_functions + report.naming.snake_functions == 0 {
        "none detected".into()
    } else {
        "mixed".into()
    };
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(dir: &std::path::Path) -> Arc<CoreConfig> {
        Arc::new(CoreConfig::new(dir.to_path_buf()))
    }

    #[test]
    fn empty_workspace_detects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let report = mine_conventions(&config_for(dir.path()));
        assert_eq!(report.naming.style, "none detected");
        assert_eq!(report.accessors.getters, 0);
    }

    #[test]
    fn camel_dominance_detected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.ts"),
            "export function getUser() {}\nexport function setUser() {}\nexport function fetchData() {}\nexport function parseInput() {}\n",
        )
        .unwrap();
        let report = mine_conventions(&config_for(dir.path()));
        assert_eq!(report.naming.style, "camelCase");
        assert_eq!(report.accessors.getters, 1);
        assert_eq!(report.accessors.setters, 1);
        assert_eq!(report.accessors.paired, 1);
    }

    #[test]
    fn python_snake_detected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("m.py"),
            "def load_config():\n    pass\n\ndef run_pipeline():\n    pass\n\ndef parse_args():\n    pass\n\ndef read_input():\n    pass\n",
        )
        .unwrap();
        let report = mine_conventions(&config_for(dir.path()));
        assert_eq!(report.naming.style, "snake_case");
    }

    #[test]
    fn test_files_counted_separately() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.ts"), "export function run() {}\n").unwrap();
        fs::write(dir.path().join("app.test.ts"), "export function runTest() {}\n").unwrap();
        let report = mine_conventions(&config_for(dir.path()));
        assert_eq!(report.testing.test_files, 1);
        assert_eq!(report.testing.source_files, 1);
        assert_eq!(report.testing.suffixed_symbols, 1);
    }
}
