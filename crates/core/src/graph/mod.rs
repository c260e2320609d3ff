//! Layer 3 — the persistent concept graph.
//!
//! Concepts, symbol representations, and typed relationships live in the
//! embedded database under `.ontology/`. Lookup supports exact,
//! case-insensitive, canonical, and fuzzy resolution, ranked by
//! `confidence x nameSimilarity x recency`. Traversal is bounded by depth
//! and an edge cap.

pub mod similarity;
pub mod store;

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::layer::{Layer, LayerMetrics, MetricsCell, StageContext};
use crate::types::{
    Concept, ConceptKind, CoreRequest, FoundSymbol, LayerId, LayerOutcome, Location, Range,
    Relationship, RelationshipKind, SymbolRepresentation,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use store::GraphStore;
use tracing::debug;

/// Hard cap on edges returned by a traversal.
const TRAVERSAL_EDGE_CAP: usize = 500;

/// Line window for `concepts_near`.
const NEAR_WINDOW: u32 = 10;

// ---------------------------------------------------------------------------
// Ranked lookup result
// ---------------------------------------------------------------------------

/// A concept matched by name lookup, with its live representations.
#[derive(Debug, Clone)]
pub struct ConceptMatch {
    pub concept: Concept,
    pub representations: Vec<SymbolRepresentation>,
    /// `confidence x nameSimilarity x recency`.
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ConceptGraph {
    config: Arc<CoreConfig>,
    store: Arc<GraphStore>,
    metrics: MetricsCell,
}

impl ConceptGraph {
    pub fn new(config: Arc<CoreConfig>, store: Arc<GraphStore>) -> Self {
        Self { config, store, metrics: MetricsCell::default() }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Upsert a concept (id stable across runs: derived from canonical name
    /// and kind when the caller has no explicit identity).
    pub fn upsert_concept(&self, concept: &Concept) -> CoreResult<()> {
        self.store.upsert_concept(concept)
    }

    pub fn upsert_representation(&self, rep: &SymbolRepresentation) -> CoreResult<()> {
        self.store.upsert_representation(rep)
    }

    pub fn link(
        &self,
        source: &str,
        target: &str,
        kind: RelationshipKind,
        confidence: f64,
    ) -> CoreResult<()> {
        self.store.link(source, target, kind, confidence)
    }

    /// Deterministic concept id for a `(canonical name, kind)` pair.
    pub fn concept_id(name: &str, kind: ConceptKind) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(format!("{}\u{1}{}", name, kind.label()).as_bytes());
        let mut out = String::with_capacity(24);
        for b in &digest[..12] {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    fn recency_factor(age_days: f64) -> f64 {
        0.5 + 0.5 * (-age_days / 30.0).exp()
    }

    /// Ranked lookup: exact and case-insensitive matches first, then a fuzzy
    /// scan over recent concepts. Representations lacking a resolvable URI
    /// are dropped.
    pub fn find_definition(&self, name: &str) -> CoreResult<Vec<ConceptMatch>> {
        let threshold = self.config.layers.l3.fuzzy_threshold;
        let concept_floor = self.config.layers.l3.concept_threshold;
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for (concept, age_days) in self.store.concepts_by_name(name)? {
            if concept.confidence < concept_floor {
                continue;
            }
            let similarity = similarity::name_similarity(name, &concept.canonical_name, threshold);
            let score = concept.confidence * similarity * Self::recency_factor(age_days);
            seen.insert(concept.id.clone());
            out.push((concept, score));
        }

        // Fuzzy scan over the bounded recent-concept set
        let scan_limit = self.config.layers.l3.cache_size;
        for (id, candidate_name, confidence, age_days) in self.store.concept_names(scan_limit)? {
            if seen.contains(&id) || confidence < concept_floor {
                continue;
            }
            let similarity = similarity::name_similarity(name, &candidate_name, threshold);
            if similarity <= 0.0 {
                continue;
            }
            if let Some(concept) = self.store.get_concept(&id)? {
                let score = confidence * similarity * Self::recency_factor(age_days);
                out.push((concept, score));
            }
        }

        let mut matches = Vec::new();
        for (concept, score) in out {
            let representations: Vec<SymbolRepresentation> = self
                .store
                .representations_of(&concept.id)?
                .into_iter()
                // A representation without a URI is not a definition.
                .filter(|r| !r.location.uri().is_empty())
                .collect();
            matches.push(ConceptMatch { concept, representations, score });
        }
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    /// Bounded BFS over relationship edges from `concept_id`.
    pub fn relationships(
        &self,
        concept_id: &str,
        kind: Option<RelationshipKind>,
        depth: Option<usize>,
    ) -> CoreResult<Vec<Relationship>> {
        let max_depth = depth.unwrap_or(self.config.layers.l3.relationship_depth);
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut edges = Vec::new();

        visited.insert(concept_id.to_string());
        queue.push_back((concept_id.to_string(), 0));

        while let Some((current, level)) = queue.pop_front() {
            if level >= max_depth {
                continue;
            }
            for edge in self.store.edges_of(&current, kind)? {
                if edges.len() >= TRAVERSAL_EDGE_CAP {
                    debug!(cap = TRAVERSAL_EDGE_CAP, "traversal edge cap reached");
                    return Ok(edges);
                }
                let neighbor =
                    if edge.source == current { edge.target.clone() } else { edge.source.clone() };
                edges.push(edge);
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor, level + 1));
                }
            }
        }
        Ok(edges)
    }

    /// Concepts with a representation near the given location.
    pub fn concepts_near(&self, location: &Location) -> CoreResult<Vec<Concept>> {
        self.store.concepts_near(&location.uri, location.line, NEAR_WINDOW)
    }

    /// Ingest a file's extracted symbols: upsert concepts and atomically
    /// replace each concept's representations for that file.
    pub fn ingest_file_symbols(
        &self,
        uri: &str,
        symbols: &[crate::astx::AstSymbol],
        source_confidence: f64,
    ) -> CoreResult<usize> {
        let mut count = 0;
        let mut by_concept: std::collections::BTreeMap<String, Vec<SymbolRepresentation>> =
            std::collections::BTreeMap::new();
        for sym in symbols {
            let kind = sym.kind.to_concept_kind();
            let id = Self::concept_id(&sym.name, kind);
            self.store.upsert_concept(&Concept {
                id: id.clone(),
                canonical_name: sym.name.clone(),
                kind,
                confidence: source_confidence,
                metadata: Default::default(),
            })?;
            by_concept.entry(id.clone()).or_default().push(SymbolRepresentation {
                concept_id: id,
                name: sym.name.clone(),
                location: Range {
                    start: Location::new(uri, sym.start_line, sym.start_col),
                    end: Location::new(uri, sym.end_line, sym.start_col + sym.name.len() as u32),
                },
                occurrences: 1,
                context: sym.signature.clone(),
            });
            count += 1;
        }
        for (concept_id, reps) in &by_concept {
            self.store.replace_representations(concept_id, uri, reps)?;
        }
        Ok(count)
    }

    /// A file changed: its representations are stale until reparse.
    pub fn invalidate_path(&self, path: &str) {
        if let Err(e) = self.store.mark_stale(path) {
            debug!(path, error = %e, "stale marking failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Layer impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Layer for ConceptGraph {
    fn id(&self) -> LayerId {
        LayerId::L3
    }

    fn applies_to(&self, request: &CoreRequest) -> bool {
        !matches!(request, CoreRequest::Diagnostics { .. })
    }

    async fn process(&self, ctx: &StageContext, acc: &mut LayerOutcome) -> CoreResult<()> {
        let start = Instant::now();
        ctx.check_cancelled()?;
        acc.note_tool("conceptGraph");

        let Some(subject) = ctx.request.subject().map(|s| s.to_string()) else {
            return Ok(());
        };

        let result = self.find_definition(&subject);
        let matches = match result {
            Ok(m) => m,
            Err(e) => {
                self.metrics.record_failure(&e);
                return Err(e);
            }
        };

        let wants_completions = matches!(ctx.request, CoreRequest::Completions { .. });
        for cm in &matches {
            if wants_completions {
                acc.completions.push(crate::types::CompletionItem {
                    label: cm.concept.canonical_name.clone(),
                    kind: Some(cm.concept.kind),
                    detail: None,
                    confidence: cm.score.min(1.0),
                });
                continue;
            }
            for rep in &cm.representations {
                acc.matches.push(FoundSymbol {
                    name: rep.name.clone(),
                    location: rep.location.clone(),
                    kind: Some(cm.concept.kind),
                    confidence: cm.score.min(1.0),
                    source: LayerId::L3,
                    context: if rep.context.is_empty() { None } else { Some(rep.context.clone()) },
                    is_definition: true,
                });
                if !acc.candidate_files.contains(&rep.location.uri().to_string()) {
                    acc.candidate_files.push(rep.location.uri().to_string());
                }
            }
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
