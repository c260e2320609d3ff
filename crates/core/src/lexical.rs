//! Layer 1 — bounded lexical search over the workspace.
//!
//! Fast content grep, glob, and directory listing honoring the ignore lists,
//! with a TTL result cache and the bloom-filter negative cache for repeated
//! misses. Scans stream hits into a bounded collector and stop at the stage
//! deadline rather than stalling the pipeline.

use crate::bloom::NegativeCache;
use crate::cache::{SearchCache, SEARCH_TTL_CONTENT, SEARCH_TTL_LISTING};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::layer::{Layer, LayerMetrics, MetricsCell, StageContext};
use crate::types::{
    CoreRequest, FoundSymbol, LayerId, LayerOutcome, Range, MAX_FILE_READ,
};
use async_trait::async_trait;
use ignore::overrides::OverrideBuilder;
use ignore::{WalkBuilder, WalkState};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Files,
    Content,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepOptions {
    pub output_mode: OutputMode,
    /// Context lines around each hit (content mode only).
    pub context: usize,
    pub max_results: usize,
    pub timeout_ms: u64,
    /// Treat the pattern as a raw regex instead of a literal identifier.
    pub regex: bool,
    pub case_insensitive: bool,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::Content,
            context: 0,
            max_results: 500,
            timeout_ms: 5,
            regex: false,
            case_insensitive: false,
        }
    }
}

/// A single content match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepHit {
    pub file: String,
    /// 0-based line number.
    pub line: u32,
    pub text: String,
    /// 0-based column of the match start.
    pub column: u32,
    /// Surrounding lines when the query asked for context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrepResult {
    pub hits: Vec<GrepHit>,
    /// Distinct files containing at least one hit.
    pub files: Vec<String>,
    pub count: usize,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    pub truncated: bool,
}

/// Directory entry for `ls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    pub size: u64,
}

/// Aggregate produced by `process` for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexicalReport {
    pub exact: Vec<GrepHit>,
    pub fuzzy: Vec<GrepHit>,
    /// Conceptual matches are supplied by the graph layer, never here.
    pub conceptual: Vec<String>,
    #[serde(rename = "searchTime")]
    pub search_time_ms: f64,
    #[serde(rename = "toolsUsed")]
    pub tools_used: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct LexicalEngine {
    config: Arc<CoreConfig>,
    cache: SearchCache<GrepResult>,
    bloom: Arc<NegativeCache>,
    metrics: MetricsCell,
}

impl LexicalEngine {
    pub fn new(config: Arc<CoreConfig>, bloom: Arc<NegativeCache>) -> Self {
        Self { config, cache: SearchCache::new(), bloom, metrics: MetricsCell::default() }
    }

    fn cache_key(pattern: &str, scope: &str, opts: &GrepOptions) -> String {
        format!(
            "{pattern}\u{1}{scope}\u{1}{:?}\u{1}{}\u{1}{}\u{1}{}\u{1}{}",
            opts.output_mode, opts.regex, opts.case_insensitive, opts.max_results, opts.context
        )
    }

    fn walk_builder(&self, scope: &str) -> CoreResult<WalkBuilder> {
        let root = self.config.workspace_root.clone();
        let mut builder = WalkBuilder::new(&root);
        builder.hidden(false).follow_links(false);
        for dir in &self.config.layers.l1.skip_dirs {
            let dir = dir.clone();
            builder.filter_entry(move |entry| entry.file_name().to_string_lossy() != dir);
        }
        if !scope.is_empty() {
            let mut overrides = OverrideBuilder::new(&root);
            let scope = scope.trim_end_matches('/');
            overrides
                .add(scope)
                .map_err(|e| CoreError::InvalidRequest(format!("bad scope glob: {e}")))?;
            overrides
                .add(&format!("{scope}/**"))
                .map_err(|e| CoreError::InvalidRequest(format!("bad scope glob: {e}")))?;
            let overrides = overrides
                .build()
                .map_err(|e| CoreError::InvalidRequest(format!("bad scope glob: {e}")))?;
            builder.overrides(overrides);
        }
        Ok(builder)
    }

    /// Content search. Streams hits from the walker into a bounded collector
    /// and returns partial results with `timed_out=true` when the budget
    /// expires.
    pub async fn grep(
        &self,
        pattern: &str,
        scope: &str,
        opts: &GrepOptions,
    ) -> CoreResult<GrepResult> {
        let key = Self::cache_key(pattern, scope, opts);
        if self.config.cache.enabled {
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }
        }

        let source = if opts.regex {
            pattern.to_string()
        } else {
            format!(r"\b{}\b", regex::escape(pattern))
        };
        let matcher = RegexBuilder::new(&source)
            .case_insensitive(opts.case_insensitive)
            .build()
            .map_err(|e| CoreError::InvalidRequest(format!("bad pattern: {e}")))?;

        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms.max(1));
        let max_results = opts.max_results;
        let context = opts.context;
        let root = self.config.workspace_root.clone();
        let parallel = self.config.layers.l1.optimization.parallel_search;
        let builder = self.walk_builder(scope)?;

        let result = tokio::task::spawn_blocking(move || {
            run_grep(builder, &root, &matcher, max_results, context, deadline, parallel)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("search worker: {e}")))?;

        let mut result = match result {
            Ok(r) => r,
            // An unreadable scope yields empty results, not an error
            Err(_) => GrepResult::default(),
        };
        match opts.output_mode {
            OutputMode::Content => {}
            OutputMode::Files | OutputMode::Count => result.hits.clear(),
        }

        if self.config.cache.enabled {
            self.cache.put(key, result.clone(), SEARCH_TTL_CONTENT);
        }
        Ok(result)
    }

    /// File discovery by glob pattern, bounded.
    pub async fn glob(&self, pattern: &str, root: &str) -> CoreResult<Vec<String>> {
        let key = format!("{pattern}\u{1}{root}\u{1}glob");
        if self.config.cache.enabled {
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached.files);
            }
        }
        let workspace = self.config.workspace_root.clone();
        let max = self.config.layers.l1.max_results;
        let mut overrides = OverrideBuilder::new(&workspace);
        overrides
            .add(pattern)
            .map_err(|e| CoreError::InvalidRequest(format!("bad glob: {e}")))?;
        let overrides = overrides
            .build()
            .map_err(|e| CoreError::InvalidRequest(format!("bad glob: {e}")))?;
        let mut builder = self.walk_builder("")?;
        builder.overrides(overrides);
        let walk = builder.build();
        let prefix = root.trim_end_matches('/').to_string();

        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in walk.flatten() {
                if files.len() >= max {
                    break;
                }
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    if let Ok(rel) = entry.path().strip_prefix(&workspace) {
                        let rel = rel.to_string_lossy().replace('\\', "/");
                        if prefix.is_empty() || rel.starts_with(&prefix) {
                            files.push(rel);
                        }
                    }
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| CoreError::Internal(format!("glob worker: {e}")))?;

        if self.config.cache.enabled {
            let cached = GrepResult { files: files.clone(), ..Default::default() };
            self.cache.put(key, cached, SEARCH_TTL_LISTING);
        }
        Ok(files)
    }

    /// Directory listing. Invalid paths yield an empty listing.
    pub async fn ls(&self, path: &str) -> CoreResult<Vec<DirEntry>> {
        let target = if path.is_empty() {
            self.config.workspace_root.clone()
        } else {
            self.config.workspace_root.join(path)
        };
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&target).await {
            Ok(d) => d,
            Err(_) => return Ok(entries),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Pipeline entry point: identifier search with negative caching.
    ///
    /// A bloom hit (corroborated by the exact miss set) short-circuits with
    /// zero results; a real search that comes back empty seeds the cache.
    pub async fn process_query(
        &self,
        identifier: &str,
        scope: &str,
        cancel_check: impl Fn() -> CoreResult<()>,
    ) -> CoreResult<LexicalReport> {
        let start = Instant::now();
        let mut report = LexicalReport::default();

        let bloom_enabled = self.config.layers.l1.optimization.bloom_filter;
        if bloom_enabled && self.bloom.contains(identifier, scope) {
            report.tools_used.push("bloomFilter".into());
            report.search_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug!(identifier, scope, "negative cache hit");
            return Ok(report);
        }

        cancel_check()?;

        let opts = GrepOptions {
            timeout_ms: self.config.layers.l1.timeout,
            max_results: self.config.layers.l1.max_results,
            ..Default::default()
        };
        let exact = self.grep(identifier, scope, &opts).await?;
        report.tools_used.push("grep".into());

        cancel_check()?;

        // Case-insensitive pass only when the exact pass found nothing
        if exact.hits.is_empty() && !exact.timed_out {
            let fuzzy_opts = GrepOptions { case_insensitive: true, ..opts.clone() };
            let fuzzy = self.grep(identifier, scope, &fuzzy_opts).await?;
            if fuzzy.hits.is_empty() && !fuzzy.timed_out && bloom_enabled {
                // Both passes ran end-to-end and found nothing: seed the
                // negative cache.
                self.bloom.insert(identifier, scope);
            }
            report.fuzzy = fuzzy.hits;
        }
        report.exact = exact.hits;
        report.search_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(report)
    }

    /// Drop cached results touching `path` and stale bloom entries.
    pub fn invalidate_path(&self, path: &str) {
        self.cache.invalidate_path(path);
        self.bloom.invalidate_path(path);
    }
}

// ---------------------------------------------------------------------------
// Walker internals
// ---------------------------------------------------------------------------

fn scan_file(
    path: &Path,
    root: &Path,
    matcher: &regex::Regex,
    sink: &mpsc::Sender<GrepHit>,
    found: &AtomicUsize,
    max_results: usize,
    context: usize,
    deadline: Instant,
) -> bool {
    let meta = match path.metadata() {
        Ok(m) => m,
        Err(_) => return true,
    };
    if meta.len() as usize > MAX_FILE_READ {
        return true;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return true, // binary or unreadable
    };
    let rel = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| path.to_string_lossy().into_owned());

    let lines: Vec<&str> = content.lines().collect();
    for (line_no, line) in lines.iter().enumerate() {
        if Instant::now() >= deadline {
            return false;
        }
        if let Some(m) = matcher.find(line) {
            if found.fetch_add(1, Ordering::Relaxed) >= max_results {
                return false;
            }
            let ctx = if context > 0 {
                let lo = line_no.saturating_sub(context);
                let hi = (line_no + context + 1).min(lines.len());
                lines[lo..hi].iter().map(|l| l.to_string()).collect()
            } else {
                Vec::new()
            };
            let hit = GrepHit {
                file: rel.clone(),
                line: line_no as u32,
                text: line.to_string(),
                column: m.start() as u32,
                context: ctx,
            };
            if sink.send(hit).is_err() {
                return false;
            }
        }
    }
    true
}

fn run_grep(
    builder: WalkBuilder,
    root: &Path,
    matcher: &regex::Regex,
    max_results: usize,
    context: usize,
    deadline: Instant,
    parallel: bool,
) -> CoreResult<GrepResult> {
    let (tx, rx) = mpsc::channel::<GrepHit>();
    let found = AtomicUsize::new(0);
    let mut timed_out = false;

    if parallel {
        let walker = builder.build_parallel();
        walker.run(|| {
            let tx = tx.clone();
            let found = &found;
            Box::new(move |entry| {
                if Instant::now() >= deadline {
                    return WalkState::Quit;
                }
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return WalkState::Continue,
                };
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    return WalkState::Continue;
                }
                if scan_file(entry.path(), root, matcher, &tx, found, max_results, context, deadline) {
                    WalkState::Continue
                } else {
                    WalkState::Quit
                }
            })
        });
    } else {
        for entry in builder.build().flatten() {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if !scan_file(entry.path(), root, matcher, &tx, &found, max_results, context, deadline) {
                break;
            }
        }
    }
    drop(tx);

    let mut hits: Vec<GrepHit> = rx.into_iter().collect();
    hits.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
    let truncated = found.load(Ordering::Relaxed) > max_results;
    if Instant::now() >= deadline {
        timed_out = true;
    }

    let mut files: Vec<String> = hits.iter().map(|h| h.file.clone()).collect();
    files.dedup();
    let count = hits.len();
    Ok(GrepResult { hits, files, count, timed_out, truncated })
}

// ---------------------------------------------------------------------------
// Layer impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Layer for LexicalEngine {
    fn id(&self) -> LayerId {
        LayerId::L1
    }

    fn applies_to(&self, request: &CoreRequest) -> bool {
        !matches!(request, CoreRequest::Diagnostics { .. } | CoreRequest::PlanPropagation { .. })
    }

    async fn process(&self, ctx: &StageContext, acc: &mut LayerOutcome) -> CoreResult<()> {
        let start = Instant::now();
        let Some(subject) = ctx.request.subject().map(|s| s.to_string()) else {
            return Ok(());
        };
        let scope = ctx
            .request
            .location()
            .and_then(|loc| loc.uri.rsplit_once('/').map(|(dir, _)| dir.to_string()))
            .unwrap_or_default();

        // Completions search by prefix, not whole identifier: candidates
        // only, no bloom seeding.
        if matches!(ctx.request, CoreRequest::Completions { .. }) {
            let opts = GrepOptions {
                regex: true,
                timeout_ms: self.config.layers.l1.timeout,
                max_results: self.config.layers.l1.max_results,
                ..Default::default()
            };
            let pattern = format!(r"\b{}\w*", regex::escape(&subject));
            let result = self
                .grep(&pattern, &scope, &opts)
                .await
                .inspect_err(|e| self.metrics.record_failure(e))?;
            acc.note_tool("grep");
            for file in result.files {
                if !acc.candidate_files.contains(&file) {
                    acc.candidate_files.push(file);
                }
            }
            self.metrics.record_invocation(start.elapsed().as_millis() as u64);
            return Ok(());
        }

        let report = self
            .process_query(&subject, &scope, || ctx.check_cancelled())
            .await
            .inspect_err(|e| self.metrics.record_failure(e))?;

        for tool in &report.tools_used {
            acc.note_tool(tool);
        }
        for hit in report.exact.iter().chain(report.fuzzy.iter()) {
            if !acc.candidate_files.contains(&hit.file) {
                acc.candidate_files.push(hit.file.clone());
            }
            acc.matches.push(FoundSymbol {
                name: subject.clone(),
                location: Range::on_line(&hit.file, hit.line, hit.column, subject.len() as u32),
                kind: None,
                confidence: if report.fuzzy.contains(hit) { 0.4 } else { 0.6 },
                source: LayerId::L1,
                context: Some(hit.text.clone()),
                is_definition: false,
            });
        }
        // A corroborated negative-cache hit means there is nothing to find.
        if report.tools_used.iter().any(|t| t == "bloomFilter") {
            acc.sufficient = true;
        }
        self.metrics.record_invocation(start.elapsed().as_millis() as u64);
        Ok(())
    }

    fn metrics(&self) -> LayerMetrics {
        self.metrics.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine_for(dir: &Path) -> LexicalEngine {
        let mut config = CoreConfig::new(dir.to_path_buf());
        config.layers.l1.timeout = 1000;
        LexicalEngine::new(Arc::new(config), Arc::new(NegativeCache::new()))
    }

    #[tokio::test]
    async fn grep_finds_identifier() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/foo.ts"),
            "export class AsyncEnhancedGrep {}\nconst x = 1;\n",
        )
        .unwrap();
        let engine = engine_for(dir.path());
        let opts = GrepOptions { timeout_ms: 1000, ..Default::default() };
        let result = engine.grep("AsyncEnhancedGrep", "", &opts).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].file, "src/foo.ts");
        assert_eq!(result.hits[0].line, 0);
        assert_eq!(result.hits[0].column, 13);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn grep_respects_word_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let fooBar = 1;\nlet foo = 2;\n").unwrap();
        let engine = engine_for(dir.path());
        let opts = GrepOptions { timeout_ms: 1000, ..Default::default() };
        let result = engine.grep("foo", "", &opts).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].line, 1);
    }

    #[tokio::test]
    async fn grep_context_and_output_modes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "before\nconst target = 1;\nafter\n").unwrap();
        let engine = engine_for(dir.path());

        let opts = GrepOptions { context: 1, timeout_ms: 1000, ..Default::default() };
        let result = engine.grep("target", "", &opts).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(
            result.hits[0].context,
            vec!["before".to_string(), "const target = 1;".to_string(), "after".to_string()]
        );

        let opts = GrepOptions {
            output_mode: OutputMode::Files,
            timeout_ms: 1000,
            ..Default::default()
        };
        let result = engine.grep("target", "", &opts).await.unwrap();
        assert!(result.hits.is_empty());
        assert_eq!(result.files, vec!["a.ts".to_string()]);
        assert_eq!(result.count, 1);
    }

    #[tokio::test]
    async fn grep_skips_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "var target = 1;\n").unwrap();
        fs::write(dir.path().join("app.js"), "var target = 2;\n").unwrap();
        let engine = engine_for(dir.path());
        let opts = GrepOptions { timeout_ms: 1000, ..Default::default() };
        let result = engine.grep("target", "", &opts).await.unwrap();
        assert_eq!(result.files, vec!["app.js".to_string()]);
    }

    #[tokio::test]
    async fn empty_search_seeds_negative_cache_and_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
        let engine = engine_for(dir.path());

        let first = engine.process_query("ZqXmNvBcDfGh", "", || Ok(())).await.unwrap();
        assert!(first.exact.is_empty() && first.fuzzy.is_empty());
        assert!(!first.tools_used.iter().any(|t| t == "bloomFilter"));

        let second = engine.process_query("ZqXmNvBcDfGh", "", || Ok(())).await.unwrap();
        assert!(second.exact.is_empty());
        assert!(second.tools_used.iter().any(|t| t == "bloomFilter"));
    }

    #[tokio::test]
    async fn first_search_with_results_does_not_seed_bloom() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "class Widget {}\n").unwrap();
        let engine = engine_for(dir.path());
        let report = engine.process_query("Widget", "", || Ok(())).await.unwrap();
        assert_eq!(report.exact.len(), 1);
        assert!(!engine.bloom.contains("Widget", ""));
    }

    #[tokio::test]
    async fn file_change_invalidates_negative_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
        let engine = engine_for(dir.path());
        engine.process_query("NewClass", "", || Ok(())).await.unwrap();
        assert!(engine.bloom.contains("NewClass", ""));

        fs::write(dir.path().join("b.ts"), "class NewClass {}\n").unwrap();
        engine.invalidate_path("b.ts");

        let report = engine.process_query("NewClass", "", || Ok(())).await.unwrap();
        assert_eq!(report.exact.len(), 1, "fresh definition must be found after invalidation");
    }

    #[tokio::test]
    async fn glob_bounded_listing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "").unwrap();
        fs::write(dir.path().join("src/b.ts"), "").unwrap();
        fs::write(dir.path().join("src/c.py"), "").unwrap();
        let engine = engine_for(dir.path());
        let files = engine.glob("*.ts", "").await.unwrap();
        assert_eq!(files, vec!["src/a.ts".to_string(), "src/b.ts".to_string()]);
    }

    #[tokio::test]
    async fn ls_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("file.ts"), "x").unwrap();
        let engine = engine_for(dir.path());
        let entries = engine.ls("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));
        assert!(entries.iter().any(|e| e.name == "file.ts" && !e.is_dir));
    }

    #[tokio::test]
    async fn ls_invalid_path_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let entries = engine.ls("no/such/dir").await.unwrap();
        assert!(entries.is_empty());
    }
}
