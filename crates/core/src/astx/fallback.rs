//! Regex pseudo-AST for when a native grammar is unavailable.
//!
//! Tagged patterns recover definitions, classes, and assignments at reduced
//! precision. The resulting symbol table satisfies the same interface as a
//! native parse; callers see `degraded = true` and score accordingly.

use super::{AstSymbol, AstSymbolKind, LanguageId};
use regex::Regex;
use std::sync::OnceLock;

struct TaggedPattern {
    regex: Regex,
    kind: AstSymbolKind,
}

fn brace_patterns() -> &'static Vec<TaggedPattern> {
    static PATTERNS: OnceLock<Vec<TaggedPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)").unwrap(),
                kind: AstSymbolKind::Class,
            },
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][\w$]*)").unwrap(),
                kind: AstSymbolKind::Interface,
            },
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)").unwrap(),
                kind: AstSymbolKind::Function,
            },
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:export\s+)?type\s+([A-Za-z_$][\w$]*)\s*=").unwrap(),
                kind: AstSymbolKind::TypeAlias,
            },
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=").unwrap(),
                kind: AstSymbolKind::Variable,
            },
        ]
    })
}

fn python_patterns() -> &'static Vec<TaggedPattern> {
    static PATTERNS: OnceLock<Vec<TaggedPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            TaggedPattern {
                regex: Regex::new(r"^\s*class\s+([A-Za-z_]\w*)").unwrap(),
                kind: AstSymbolKind::Class,
            },
            TaggedPattern {
                regex: Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap(),
                kind: AstSymbolKind::Function,
            },
            TaggedPattern {
                regex: Regex::new(r"^([A-Za-z_]\w*)\s*=\s*\S").unwrap(),
                kind: AstSymbolKind::Variable,
            },
        ]
    })
}

/// Build a pseudo symbol table by line scanning.
pub(crate) fn extract_symbols(text: &str, lang: LanguageId) -> Vec<AstSymbol> {
    let patterns = match lang {
        LanguageId::Python => python_patterns(),
        _ => brace_patterns(),
    };
    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        for pat in patterns {
            if let Some(caps) = pat.regex.captures(line) {
                if let Some(m) = caps.get(1) {
                    let indented = line.starts_with(' ') || line.starts_with('\t');
                    let kind = if pat.kind == AstSymbolKind::Function && indented {
                        AstSymbolKind::Method
                    } else {
                        pat.kind
                    };
                    out.push(AstSymbol {
                        name: m.as_str().to_string(),
                        kind,
                        start_line: line_no as u32,
                        start_col: m.start() as u32,
                        end_line: line_no as u32,
                        signature: line.trim().trim_end_matches('{').trim().to_string(),
                    });
                    break;
                }
            }
        }
    }
    out
}

/// Identifier occurrences by word-boundary scan, 0-based `(line, col)`.
pub(crate) fn find_identifier_occurrences(text: &str, symbol: &str) -> Vec<(u32, u32)> {
    let pattern = match Regex::new(&format!(r"\b{}\b", regex::escape(symbol))) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        for m in pattern.find_iter(line) {
            out.push((line_no as u32, m.start() as u32));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_typescript_declarations() {
        let src = "export class TestClass {\n  run() {}\n}\nexport function helper() {}\nconst LIMIT = 10;\n";
        let symbols = extract_symbols(src, LanguageId::TypeScript);
        let names: Vec<(&str, AstSymbolKind)> =
            symbols.iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert!(names.contains(&("TestClass", AstSymbolKind::Class)));
        assert!(names.contains(&("helper", AstSymbolKind::Function)));
        assert!(names.contains(&("LIMIT", AstSymbolKind::Variable)));
    }

    #[test]
    fn recovers_python_defs() {
        let src = "class Config:\n    def load(self):\n        pass\n\ndef main():\n    pass\n";
        let symbols = extract_symbols(src, LanguageId::Python);
        assert!(symbols.iter().any(|s| s.name == "Config" && s.kind == AstSymbolKind::Class));
        assert!(symbols.iter().any(|s| s.name == "load" && s.kind == AstSymbolKind::Method));
        assert!(symbols.iter().any(|s| s.name == "main" && s.kind == AstSymbolKind::Function));
    }

    #[test]
    fn occurrences_respect_word_boundaries() {
        let occ = find_identifier_occurrences("foo fooBar foo\nfoo", "foo");
        assert_eq!(occ, vec![(0, 0), (0, 11), (1, 0)]);
    }

    #[test]
    fn column_points_at_name() {
        let symbols = extract_symbols("export class Widget {}\n", LanguageId::TypeScript);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].start_col, 13);
    }
}
