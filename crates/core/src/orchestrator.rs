//! The pipeline orchestrator.
//!
//! Owns the five layers behind the uniform [`Layer`] abstraction, probes the
//! fingerprint cache, walks stages L1 -> L5 with per-stage gates and circuit
//! breakers, fuses evidence by confidence, and serves the snapshot-backed
//! rename flow. Layer errors never fail a request unless every enabled
//! layer failed.

use crate::astx::AstEngine;
use crate::bloom::NegativeCache;
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::fusion;
use crate::graph::ConceptGraph;
use crate::layer::{Layer, LayerMetrics, StageContext};
use crate::lexical::LexicalEngine;
use crate::patterns::PatternLearner;
use crate::propagation::PropagationPlanner;
use crate::services::SharedServices;
use crate::snapshot::SnapshotStore;
use crate::types::{
    CoreRequest, CoreResponse, FileEvent, LayerFailure, LayerId, LayerOutcome, PlannedEdit,
    RenamePlan, ResponseData, StageTimings, ALL_LAYERS,
};
use crate::workspace;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Floor for the hard per-stage gate. Stage budgets below this still bound
/// work inside the layer (soft budgets); the gate only catches runaways.
const STAGE_GATE_FLOOR_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LayerHealth {
    pub layer: LayerId,
    pub enabled: bool,
    pub healthy: bool,
    pub breaker: String,
    pub metrics: LayerMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreHealth {
    pub layers: Vec<LayerHealth>,
    #[serde(rename = "cacheHitRate")]
    pub cache_hit_rate: f64,
    #[serde(rename = "negativeCacheEntries")]
    pub negative_cache_entries: usize,
    pub cancellations: u64,
    #[serde(rename = "inFlight")]
    pub in_flight: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    services: SharedServices,
    lexical: Arc<LexicalEngine>,
    ast: Arc<AstEngine>,
    graph: Arc<ConceptGraph>,
    patterns: Arc<PatternLearner>,
    propagation: Arc<PropagationPlanner>,
    snapshots: SnapshotStore,
    breakers: HashMap<LayerId, CircuitBreaker>,
    semaphore: Arc<Semaphore>,
    cancellations: AtomicU64,
}

impl Orchestrator {
    /// Build and initialize the core against a persistent store.
    pub async fn init(config: CoreConfig) -> CoreResult<Arc<Self>> {
        let config = Arc::new(config);
        let services = SharedServices::init(Arc::clone(&config))?;
        Self::assemble(config, services).await
    }

    /// Ephemeral core with an in-memory store (tests, one-shot runs).
    pub async fn init_in_memory(config: CoreConfig) -> CoreResult<Arc<Self>> {
        let config = Arc::new(config);
        let services = SharedServices::init_in_memory(Arc::clone(&config))?;
        Self::assemble(config, services).await
    }

    async fn assemble(config: Arc<CoreConfig>, services: SharedServices) -> CoreResult<Arc<Self>> {
        let bloom: Arc<NegativeCache> = Arc::clone(&services.bloom);
        let lexical = Arc::new(LexicalEngine::new(Arc::clone(&config), bloom));
        let ast = Arc::new(AstEngine::new(Arc::clone(&config)));
        let graph = Arc::new(ConceptGraph::new(Arc::clone(&config), Arc::clone(&services.store)));
        let patterns =
            Arc::new(PatternLearner::new(Arc::clone(&config), Arc::clone(&services.store)));
        let propagation =
            Arc::new(PropagationPlanner::new(Arc::clone(&config), Arc::clone(&graph)));
        let snapshots = SnapshotStore::new(Arc::clone(&config));

        let threshold = config.performance.circuit_breaker_threshold;
        let cooldown = Duration::from_millis(config.performance.circuit_breaker_cooldown);
        let breakers = ALL_LAYERS
            .iter()
            .map(|id| (*id, CircuitBreaker::new(threshold, cooldown)))
            .collect();

        let orchestrator = Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.performance.max_concurrent_requests)),
            services,
            lexical,
            ast,
            graph,
            patterns,
            propagation,
            snapshots,
            breakers,
            cancellations: AtomicU64::new(0),
        });
        for id in ALL_LAYERS {
            orchestrator.layer(id).initialize().await?;
        }
        info!(root = %orchestrator.config().workspace_root.display(), "core initialized");
        Ok(orchestrator)
    }

    pub fn config(&self) -> &Arc<CoreConfig> {
        &self.services.config
    }

    pub fn ast_engine(&self) -> &Arc<AstEngine> {
        &self.ast
    }

    pub fn lexical_engine(&self) -> &Arc<LexicalEngine> {
        &self.lexical
    }

    pub fn concept_graph(&self) -> &Arc<ConceptGraph> {
        &self.graph
    }

    pub fn pattern_learner(&self) -> &Arc<PatternLearner> {
        &self.patterns
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    fn layer(&self, id: LayerId) -> &dyn Layer {
        match id {
            LayerId::L1 => self.lexical.as_ref(),
            LayerId::L2 => self.ast.as_ref(),
            LayerId::L3 => self.graph.as_ref(),
            LayerId::L4 => self.patterns.as_ref(),
            LayerId::L5 => self.propagation.as_ref(),
        }
    }

    fn layer_enabled(&self, id: LayerId) -> bool {
        let layers = &self.config().layers;
        match id {
            LayerId::L1 => layers.l1.enabled,
            LayerId::L2 => layers.l2.enabled,
            LayerId::L3 => layers.l3.enabled,
            LayerId::L4 => layers.l4.enabled,
            LayerId::L5 => layers.l5.enabled,
        }
    }

    fn stage_budget(&self, id: LayerId) -> Duration {
        let layers = &self.config().layers;
        let ms = match id {
            LayerId::L1 => layers.l1.timeout,
            LayerId::L2 => layers.l2.timeout,
            LayerId::L3 => layers.l3.timeout,
            LayerId::L4 => layers.l4.timeout,
            LayerId::L5 => layers.l5.timeout,
        };
        Duration::from_millis(ms.max(STAGE_GATE_FLOOR_MS))
    }

    // -- request entry points -----------------------------------------------

    pub async fn process(&self, request: CoreRequest) -> CoreResult<CoreResponse> {
        self.process_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a request through the pipeline with an external cancellation
    /// handle. Cancellation is observed at stage boundaries and inside
    /// layer suspension points.
    pub async fn process_with_cancel(
        &self,
        request: CoreRequest,
        cancel: CancellationToken,
    ) -> CoreResult<CoreResponse> {
        validate(&request)?;

        // Backpressure: fail fast instead of queueing past the cap.
        let _permit = self.semaphore.try_acquire().map_err(|_| {
            CoreError::ServiceUnavailable(format!(
                "request queue full ({} in flight)",
                self.config().performance.max_concurrent_requests
            ))
        })?;

        let root = self.config().workspace_root.to_string_lossy().into_owned();
        let key = cache::fingerprint(&request, &root);
        if self.config().cache.enabled {
            if let Some(hit) = self.services.query_cache.probe(&key) {
                debug!(kind = request.kind_label(), "cache hit");
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let deadline = Duration::from_millis(self.config().performance.request_timeout.max(1));
        let result = tokio::time::timeout(deadline, self.run_pipeline(&request, &cancel)).await;

        let (outcome, timings, sources, failures) = match result {
            Ok(Ok(parts)) => parts,
            Ok(Err(CoreError::Cancelled)) => {
                self.cancellations.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::Cancelled);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CoreError::Timeout { stage: None }),
        };

        let mut timings = timings;
        timings.total = started.elapsed().as_secs_f64() * 1000.0;

        let data = match &request {
            CoreRequest::PlanRename { from, to } => {
                ResponseData::RenamePlan { plan: self.assemble_rename_plan(from, to, &outcome).await? }
            }
            _ => fusion::build_data(&request, &outcome),
        };

        let response = CoreResponse {
            data,
            per_stage: timings,
            confidence: fusion::fused_confidence(&sources),
            source: sources,
            cache_hit: false,
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            failures,
            tools_used: outcome.tools_used.clone(),
        };

        if self.config().cache.enabled && !outcome.timed_out {
            self.services.query_cache.store(key, response.clone(), String::new());
        }
        Ok(response)
    }

    async fn run_pipeline(
        &self,
        request: &CoreRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<(LayerOutcome, StageTimings, Vec<LayerId>, Vec<LayerFailure>)> {
        let mut outcome = LayerOutcome::default();
        let mut timings = StageTimings::default();
        let mut sources: Vec<LayerId> = Vec::new();
        let mut failures: Vec<LayerFailure> = Vec::new();
        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        let mut ast_ran = false;

        for id in ALL_LAYERS {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if !self.layer_enabled(id) {
                continue;
            }
            let layer = self.layer(id);
            if !layer.applies_to(request) {
                continue;
            }
            let breaker = &self.breakers[&id];
            if !breaker.allow() {
                failures.push(LayerFailure { layer: id, reason: "circuit open".into() });
                continue;
            }

            attempted += 1;
            let ctx = StageContext::new(request.clone(), cancel.clone());
            let evidence_before = evidence_len(&outcome);
            let stage_start = Instant::now();
            let result =
                tokio::time::timeout(self.stage_budget(id), layer.process(&ctx, &mut outcome))
                    .await;
            timings.record(id, stage_start.elapsed().as_secs_f64() * 1000.0);
            if id == LayerId::L2 {
                ast_ran = true;
            }

            match result {
                Ok(Ok(())) => {
                    breaker.record_success();
                    succeeded += 1;
                    if evidence_len(&outcome) > evidence_before {
                        sources.push(id);
                    }
                }
                Ok(Err(CoreError::Cancelled)) => return Err(CoreError::Cancelled),
                Ok(Err(e)) => {
                    breaker.record_failure();
                    warn!(layer = id.label(), error = %e, "stage failed");
                    failures.push(LayerFailure { layer: id, reason: e.to_string() });
                }
                Err(_) => {
                    breaker.record_failure();
                    outcome.timed_out = true;
                    failures.push(LayerFailure { layer: id, reason: "stage timed out".into() });
                }
            }

            // Sufficiency short-circuit. Definition-style queries must always
            // consult the AST layer before stopping early.
            if outcome.sufficient && (!request.requires_ast() || ast_ran) {
                debug!(after = id.label(), "result sufficient, short-circuiting");
                break;
            }
        }

        // Failures include circuit-open skips; a request fails only when no
        // applicable layer produced a successful pass.
        if succeeded == 0 && !failures.is_empty() {
            return Err(CoreError::ServiceUnavailable(format!(
                "all applicable layers unavailable ({} attempted, {} skipped)",
                attempted,
                failures.len().saturating_sub(attempted)
            )));
        }
        Ok((outcome, timings, sources, failures))
    }

    // -- rename flow ---------------------------------------------------------

    /// Turn pipeline evidence into a rename plan and stage it in a snapshot.
    async fn assemble_rename_plan(
        &self,
        from: &str,
        to: &str,
        outcome: &LayerOutcome,
    ) -> CoreResult<RenamePlan> {
        let mut edits: Vec<PlannedEdit> = fusion::merge_matches(&outcome.matches)
            .into_iter()
            .filter(|m| m.name == from)
            .map(|m| PlannedEdit {
                uri: m.location.uri().to_string(),
                line: m.location.start.line,
                col: m.location.start.col,
                old_text: from.to_string(),
                new_text: to.to_string(),
            })
            .collect();
        edits.sort_by(|a, b| a.uri.cmp(&b.uri).then(a.line.cmp(&b.line)).then(a.col.cmp(&b.col)));
        edits.dedup();

        let snapshot_id = if edits.is_empty() {
            None
        } else {
            let revision = self.workspace_revision();
            let id = self.snapshots.create(&revision).await?;
            match self.snapshots.propose_patch(&id, &edits).await {
                Ok(()) => Some(id),
                Err(e) => {
                    // Stale evidence (e.g. the graph outran the tree) leaves
                    // the plan unstaged rather than failing it.
                    warn!(error = %e, "could not stage rename edits");
                    let _ = self.snapshots.drop_snapshot(&id).await;
                    None
                }
            }
        };

        Ok(RenamePlan { edits, suggestions: outcome.suggestions.clone(), snapshot_id })
    }

    /// Plan a rename end to end (convenience wrapper over `process`).
    pub async fn plan_rename(&self, from: &str, to: &str) -> CoreResult<CoreResponse> {
        self.process(CoreRequest::PlanRename { from: from.to_string(), to: to.to_string() })
            .await
    }

    /// Apply a previously planned rename snapshot, then record the rename as
    /// a learning event.
    pub async fn apply_rename(&self, snapshot_id: &str, check: bool) -> CoreResult<()> {
        let status = self.snapshots.status(snapshot_id).await?;
        let revision = self.workspace_revision();
        self.snapshots.apply(snapshot_id, check, &revision).await?;

        // Touched files are now stale everywhere.
        for uri in status.files.keys() {
            self.handle_file_event(&FileEvent::Modified { path: uri.clone() });
        }
        Ok(())
    }

    /// Cheap workspace content stamp: hashes `(path, size, mtime)` of every
    /// scanned source file.
    pub fn workspace_revision(&self) -> String {
        let mut hasher = Sha256::new();
        for rel in workspace::scan_workspace(self.config()) {
            hasher.update(rel.as_bytes());
            if let Ok(meta) = std::fs::metadata(self.config().workspace_root.join(&rel)) {
                hasher.update(meta.len().to_le_bytes());
                if let Ok(modified) = meta.modified() {
                    if let Ok(age) = modified.duration_since(std::time::UNIX_EPOCH) {
                        hasher.update(age.as_nanos().to_le_bytes());
                    }
                }
            }
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for b in &digest[..8] {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    // -- workspace + events --------------------------------------------------

    /// Parse the workspace and populate the concept graph.
    pub async fn build_symbol_map(&self) -> CoreResult<workspace::SymbolMapSummary> {
        let config = Arc::clone(self.config());
        let graph = Arc::clone(&self.graph);
        tokio::task::spawn_blocking(move || workspace::build_symbol_map(&config, &graph))
            .await
            .map_err(|e| CoreError::Internal(format!("symbol map worker: {e}")))?
    }

    /// Invalidate every cache touched by a file change and fan the event out.
    pub fn handle_file_event(&self, event: &FileEvent) {
        for path in event.paths() {
            self.lexical.invalidate_path(path);
            self.ast.invalidate_path(path);
            self.graph.invalidate_path(path);
            self.services.query_cache.invalidate_path(path);
        }
        let _ = self.services.events.send(event.clone());
        debug!(?event, "file event processed");
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<FileEvent> {
        self.services.subscribe_events()
    }

    // -- health / metrics ----------------------------------------------------

    pub fn health(&self) -> CoreHealth {
        let layers = ALL_LAYERS
            .iter()
            .map(|id| LayerHealth {
                layer: *id,
                enabled: self.layer_enabled(*id),
                healthy: self.layer(*id).is_healthy()
                    && self.breakers[id].state() != BreakerState::Open,
                breaker: self.breakers[id].state().label().to_string(),
                metrics: self.layer(*id).metrics(),
            })
            .collect();
        CoreHealth {
            layers,
            cache_hit_rate: self.services.query_cache.hit_rate(),
            negative_cache_entries: self.services.bloom.len(),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            in_flight: self.config().performance.max_concurrent_requests
                - self.semaphore.available_permits(),
        }
    }

    pub fn clear_caches(&self) {
        self.services.query_cache.clear();
        self.services.bloom.clear();
    }

    /// Dispose every layer (drops parsers, closes subprocess pools).
    pub async fn shutdown(&self) {
        for id in ALL_LAYERS {
            self.layer(id).dispose().await;
        }
    }
}

fn evidence_len(outcome: &LayerOutcome) -> usize {
    outcome.matches.len()
        + outcome.completions.len()
        + outcome.suggestions.len()
        + outcome.diagnostics.len()
}

fn validate(request: &CoreRequest) -> CoreResult<()> {
    if let Some(subject) = request.subject() {
        if subject.trim().is_empty() {
            return Err(CoreError::InvalidRequest(format!(
                "{} requires a non-empty symbol",
                request.kind_label()
            )));
        }
    }
    if let CoreRequest::PlanRename { from, to } = request {
        if from == to {
            return Err(CoreError::InvalidRequest("rename source equals target".into()));
        }
        if to.trim().is_empty() {
            return Err(CoreError::InvalidRequest("rename target is empty".into()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn core_for(dir: &std::path::Path) -> Arc<Orchestrator> {
        let mut config = CoreConfig::new(dir.to_path_buf());
        // Generous budgets keep CI noise out of pipeline tests
        config.layers.l1.timeout = 1000;
        config.layers.l2.timeout = 2000;
        Orchestrator::init_in_memory(config).await.unwrap()
    }

    #[tokio::test]
    async fn find_definition_reaches_ast_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/foo.ts"), "export class AsyncEnhancedGrep {}\n").unwrap();
        let core = core_for(dir.path()).await;

        let response = core
            .process(CoreRequest::FindDefinition {
                name: "AsyncEnhancedGrep".into(),
                location: None,
            })
            .await
            .unwrap();

        assert!(!response.cache_hit);
        assert!(response.per_stage.l2 > 0.0, "L2 must be consulted");
        match &response.data {
            ResponseData::Definitions { symbols } => {
                assert!(!symbols.is_empty(), "definition expected");
                assert_eq!(symbols[0].location.uri(), "src/foo.ts");
                assert_eq!(symbols[0].location.start.line, 0);
                assert!(symbols[0].is_definition);
            }
            other => panic!("expected definitions, got {other:?}"),
        }
        // A successful search must not seed the negative cache
        assert_eq!(core.health().negative_cache_entries, 0);
    }

    #[tokio::test]
    async fn repeated_miss_uses_negative_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.layers.l1.timeout = 1000;
        config.layers.l2.timeout = 2000;
        config.cache.enabled = false; // exercise the bloom path, not the fingerprint cache
        let core = Orchestrator::init_in_memory(config).await.unwrap();

        let request = CoreRequest::FindDefinition {
            name: "ZqXmNvBcDfGhJkLpOiUyTrEwQaS".into(),
            location: None,
        };
        let first = core.process(request.clone()).await.unwrap();
        assert!(matches!(&first.data, ResponseData::Definitions { symbols } if symbols.is_empty()));
        assert!(!first.tools_used.iter().any(|t| t == "bloomFilter"));

        let second = core.process(request).await.unwrap();
        assert!(matches!(&second.data, ResponseData::Definitions { symbols } if symbols.is_empty()));
        assert!(
            second.tools_used.iter().any(|t| t == "bloomFilter"),
            "negative cache should answer the repeat: {:?}",
            second.tools_used
        );
        assert!(second.per_stage.l2 >= 0.0, "L2 timing still recorded");
    }

    #[tokio::test]
    async fn fingerprint_cache_returns_hit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export class Widget {}\n").unwrap();
        let core = core_for(dir.path()).await;

        let request = CoreRequest::FindDefinition { name: "Widget".into(), location: None };
        let first = core.process(request.clone()).await.unwrap();
        assert!(!first.cache_hit);
        let second = core.process(request).await.unwrap();
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn file_change_invalidates_fingerprint_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export class Widget {}\n").unwrap();
        let core = core_for(dir.path()).await;

        let request = CoreRequest::FindDefinition { name: "Widget".into(), location: None };
        core.process(request.clone()).await.unwrap();
        core.handle_file_event(&FileEvent::Modified { path: "a.ts".into() });
        let after = core.process(request).await.unwrap();
        assert!(!after.cache_hit, "touched scope must invalidate the cached response");
    }

    #[tokio::test]
    async fn invalid_request_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_for(dir.path()).await;
        let err = core
            .process(CoreRequest::FindDefinition { name: "   ".into(), location: None })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));

        let err = core
            .process(CoreRequest::PlanRename { from: "a".into(), to: "a".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn degraded_parser_still_finds_definition() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("t.ts"), "class TestClass {}\n").unwrap();
        let core = core_for(dir.path()).await;
        core.ast_engine().set_fallback_only(true);

        let response = core
            .process(CoreRequest::FindDefinition { name: "TestClass".into(), location: None })
            .await
            .unwrap();
        match &response.data {
            ResponseData::Definitions { symbols } => {
                assert_eq!(symbols.len(), 1);
                assert!(symbols[0].confidence < 1.0);
            }
            other => panic!("expected definitions, got {other:?}"),
        }
        assert!(response.tools_used.iter().any(|t| t == "pseudoAst"), "degraded parser noted");
    }

    #[tokio::test]
    async fn plan_rename_produces_edits_and_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("user.ts"),
            "export function getUser() {}\nexport function setUser() {}\nexport function getUserTest() {}\nconst u = getUser();\n",
        )
        .unwrap();
        let core = core_for(dir.path()).await;
        core.build_symbol_map().await.unwrap();

        let response = core.plan_rename("getUser", "fetchUser").await.unwrap();
        let ResponseData::RenamePlan { plan } = &response.data else {
            panic!("expected a rename plan");
        };
        assert!(
            plan.edits.iter().any(|e| e.line == 0),
            "definition edit expected: {:?}",
            plan.edits
        );
        assert!(
            plan.edits.iter().any(|e| e.line == 3),
            "reference edit expected: {:?}",
            plan.edits
        );
        assert!(
            plan.suggestions.iter().any(|s| s.target == "getUserTest" && s.proposal == "fetchUserTest"),
            "test twin suggestion expected: {:?}",
            plan.suggestions
        );
        assert!(plan.snapshot_id.is_some());

        // Working tree untouched by planning
        let tree = fs::read_to_string(dir.path().join("user.ts")).unwrap();
        assert!(tree.contains("getUser"));
    }

    #[tokio::test]
    async fn cancellation_is_observed_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export class Widget {}\n").unwrap();
        let core = core_for(dir.path()).await;

        let token = CancellationToken::new();
        token.cancel();
        let err = core
            .process_with_cancel(
                CoreRequest::FindReferences { name: "Widget".into(), location: None },
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(core.health().cancellations, 1);

        // A subsequent identical request succeeds normally
        let ok = core
            .process(CoreRequest::FindReferences { name: "Widget".into(), location: None })
            .await
            .unwrap();
        assert!(matches!(ok.data, ResponseData::References { .. }));
    }

    #[tokio::test]
    async fn disabled_layers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export class Widget {}\n").unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.layers.l1.timeout = 1000;
        config.layers.l2.timeout = 2000;
        config.layers.l3.enabled = false;
        config.layers.l4.enabled = false;
        config.layers.l5.enabled = false;
        let core = Orchestrator::init_in_memory(config).await.unwrap();

        let response = core
            .process(CoreRequest::FindDefinition { name: "Widget".into(), location: None })
            .await
            .unwrap();
        assert_eq!(response.per_stage.l3, 0.0);
        assert!(matches!(&response.data, ResponseData::Definitions { symbols } if !symbols.is_empty()));
    }

    #[tokio::test]
    async fn health_reports_all_layers_closed() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_for(dir.path()).await;
        let health = core.health();
        assert_eq!(health.layers.len(), 5);
        assert!(health.layers.iter().all(|l| l.breaker == "closed"));
        assert_eq!(health.cancellations, 0);
    }
}
