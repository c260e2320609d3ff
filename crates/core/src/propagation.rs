//! Layer 5 — change propagation across the concept graph.
//!
//! A confirmed change is spread to related concepts by an ordered rule set:
//! paired accessors, interface members, test files, service/controller
//! twins, and naming conventions. The planner walks relationship edges out
//! to `maxDepth` with a strict visited set (a concept reached once is never
//! re-expanded) and a global suggestion cap. Suggestions at or above the
//! auto-apply threshold are marked `autoApply`.

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::graph::ConceptGraph;
use crate::layer::{Layer, LayerMetrics, MetricsCell, StageContext};
use crate::patterns::PatternTemplate;
use crate::types::{
    Change, Concept, CoreRequest, LayerId, LayerOutcome, Suggestion, SuggestionKind,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Rule trait
// ---------------------------------------------------------------------------

pub trait PropagationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u8;

    /// Whether this rule has anything to say about the change itself.
    fn matches(&self, change: &Change) -> bool;

    /// Whether the change can spread to this particular target.
    fn can_propagate(&self, change: &Change, target: &Concept) -> bool;

    /// New name for the target, or `None` when the rule does not transform
    /// it. Returning the unchanged name is valid: the target was considered.
    fn transform(&self, target_name: &str, change: &Change) -> Option<String>;

    /// Suggestion kind and confidence for a produced proposal.
    fn kind(&self) -> SuggestionKind;
    fn confidence(&self) -> f64;

    /// Candidate names to probe when the source has no graph edges yet.
    fn seed_names(&self, change: &Change) -> Vec<String> {
        let _ = change;
        Vec::new()
    }

    fn apply(&self, change: &Change, target: &Concept) -> Option<Suggestion> {
        let proposal = self.transform(&target.canonical_name, change)?;
        let changed = proposal != target.canonical_name;
        Some(Suggestion {
            kind: self.kind(),
            target: target.canonical_name.clone(),
            proposal,
            confidence: if changed { self.confidence() } else { self.confidence() * 0.6 },
            reason: format!("{} rule", self.name()),
            auto_apply: false,
            evidence: vec![format!("rule:{}", self.name())],
        })
    }
}

// ---------------------------------------------------------------------------
// Accessor prefixes shared by rules
// ---------------------------------------------------------------------------

const ACCESSOR_PREFIXES: [&str; 4] = ["get", "set", "is", "has"];
const TEST_SUFFIXES: [&str; 4] = ["Test", "Spec", "Tests", "Specs"];

fn accessor_parts(name: &str) -> Option<(&'static str, &str)> {
    for prefix in ACCESSOR_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.starts_with(|c: char| c.is_uppercase()) {
                return Some((prefix, rest));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Rule 1 — getter/setter sync (priority 8)
// ---------------------------------------------------------------------------

pub struct GetterSetterSync;

impl PropagationRule for GetterSetterSync {
    fn name(&self) -> &'static str {
        "getterSetterSync"
    }
    fn priority(&self) -> u8 {
        8
    }
    fn kind(&self) -> SuggestionKind {
        SuggestionKind::SyncPair
    }
    fn confidence(&self) -> f64 {
        0.85
    }

    fn matches(&self, change: &Change) -> bool {
        change.new_name().is_some() && accessor_parts(&change.identifier).is_some()
    }

    fn can_propagate(&self, change: &Change, target: &Concept) -> bool {
        let Some((src_prefix, src_prop)) = accessor_parts(&change.identifier) else {
            return false;
        };
        match accessor_parts(&target.canonical_name) {
            Some((prefix, prop)) => prefix != src_prefix && prop == src_prop,
            None => false,
        }
    }

    fn transform(&self, target_name: &str, change: &Change) -> Option<String> {
        let (_, old_prop) = accessor_parts(&change.identifier)?;
        let (target_prefix, _) = accessor_parts(target_name)?;
        // If the new name keeps an accessor shape the property may have
        // changed; otherwise the pairing property is unchanged.
        let new_prop = change
            .new_name()
            .and_then(accessor_parts)
            .map(|(_, p)| p)
            .unwrap_or(old_prop);
        Some(format!("{target_prefix}{new_prop}"))
    }

    fn seed_names(&self, change: &Change) -> Vec<String> {
        match accessor_parts(&change.identifier) {
            Some((prefix, prop)) => ACCESSOR_PREFIXES
                .iter()
                .filter(|p| **p != prefix)
                .map(|p| format!("{p}{prop}"))
                .collect(),
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule 2 — interface <-> implementation (priority 9)
// ---------------------------------------------------------------------------

pub struct InterfaceImplementationSync;

impl PropagationRule for InterfaceImplementationSync {
    fn name(&self) -> &'static str {
        "interfaceImplementation"
    }
    fn priority(&self) -> u8 {
        9
    }
    fn kind(&self) -> SuggestionKind {
        SuggestionKind::InterfaceMember
    }
    fn confidence(&self) -> f64 {
        0.9
    }

    fn matches(&self, change: &Change) -> bool {
        change.new_name().is_some()
    }

    fn can_propagate(&self, change: &Change, target: &Concept) -> bool {
        // The planner feeds us graph-reachable targets; the member-name
        // match is the propagation criterion.
        target.canonical_name == change.identifier
            || target
                .metadata
                .get("implements")
                .map(|v| v == &change.identifier)
                .unwrap_or(false)
    }

    fn transform(&self, target_name: &str, change: &Change) -> Option<String> {
        if target_name == change.identifier {
            change.new_name().map(|s| s.to_string())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Rule 3 — test-file sync (priority 6)
// ---------------------------------------------------------------------------

pub struct TestFileSync;

impl PropagationRule for TestFileSync {
    fn name(&self) -> &'static str {
        "testFileSync"
    }
    fn priority(&self) -> u8 {
        6
    }
    fn kind(&self) -> SuggestionKind {
        SuggestionKind::TestSync
    }
    fn confidence(&self) -> f64 {
        0.75
    }

    fn matches(&self, change: &Change) -> bool {
        change.new_name().is_some()
    }

    fn can_propagate(&self, change: &Change, target: &Concept) -> bool {
        TEST_SUFFIXES
            .iter()
            .any(|suffix| target.canonical_name == format!("{}{suffix}", change.identifier))
    }

    fn transform(&self, target_name: &str, change: &Change) -> Option<String> {
        let new_name = change.new_name()?;
        for suffix in TEST_SUFFIXES {
            if let Some(stem) = target_name.strip_suffix(suffix) {
                if stem == change.identifier {
                    return Some(format!("{new_name}{suffix}"));
                }
            }
        }
        None
    }

    fn seed_names(&self, change: &Change) -> Vec<String> {
        TEST_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{suffix}", change.identifier))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Rule 4 — service/controller pair (priority 7)
// ---------------------------------------------------------------------------

pub struct ServiceControllerPair;

fn twin_suffix(name: &str) -> Option<(&str, &'static str)> {
    if let Some(stem) = name.strip_suffix("Service") {
        return Some((stem, "Controller"));
    }
    if let Some(stem) = name.strip_suffix("Controller") {
        return Some((stem, "Service"));
    }
    None
}

impl PropagationRule for ServiceControllerPair {
    fn name(&self) -> &'static str {
        "serviceControllerPair"
    }
    fn priority(&self) -> u8 {
        7
    }
    fn kind(&self) -> SuggestionKind {
        SuggestionKind::SyncPair
    }
    fn confidence(&self) -> f64 {
        0.7
    }

    fn matches(&self, change: &Change) -> bool {
        change.new_name().is_some() && twin_suffix(&change.identifier).is_some()
    }

    fn can_propagate(&self, change: &Change, target: &Concept) -> bool {
        match twin_suffix(&change.identifier) {
            Some((stem, twin)) => target.canonical_name == format!("{stem}{twin}"),
            None => false,
        }
    }

    fn transform(&self, target_name: &str, change: &Change) -> Option<String> {
        let (_, twin) = twin_suffix(&change.identifier)?;
        let new_name = change.new_name()?;
        let (new_stem, _) = twin_suffix(new_name)?;
        if target_name.ends_with(twin) {
            Some(format!("{new_stem}{twin}"))
        } else {
            None
        }
    }

    fn seed_names(&self, change: &Change) -> Vec<String> {
        match twin_suffix(&change.identifier) {
            Some((stem, twin)) => vec![format!("{stem}{twin}")],
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule 5 — naming-convention consistency (priority 4)
// ---------------------------------------------------------------------------

pub struct NamingConventionConsistency;

impl PropagationRule for NamingConventionConsistency {
    fn name(&self) -> &'static str {
        "namingConvention"
    }
    fn priority(&self) -> u8 {
        4
    }
    fn kind(&self) -> SuggestionKind {
        SuggestionKind::Convention
    }
    fn confidence(&self) -> f64 {
        0.6
    }

    fn matches(&self, change: &Change) -> bool {
        change
            .new_name()
            .and_then(|to| PatternTemplate::detect(&change.identifier, to))
            .is_some()
    }

    fn can_propagate(&self, change: &Change, target: &Concept) -> bool {
        self.transform(&target.canonical_name, change)
            .map(|t| t != target.canonical_name)
            .unwrap_or(false)
    }

    fn transform(&self, target_name: &str, change: &Change) -> Option<String> {
        let to = change.new_name()?;
        let template = PatternTemplate::detect(&change.identifier, to)?;
        template.apply(target_name)
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub fn built_in_rules() -> Vec<Box<dyn PropagationRule>> {
    // Kept in priority order for readability; selection sorts anyway.
    vec![
        Box::new(InterfaceImplementationSync),
        Box::new(GetterSetterSync),
        Box::new(ServiceControllerPair),
        Box::new(TestFileSync),
        Box::new(NamingConventionConsistency),
    ]
}

pub struct PropagationPlanner {
    config: Arc<CoreConfig>,
    graph: Arc<ConceptGraph>,
    rules: Vec<Box<dyn PropagationRule>>,
    metrics: MetricsCell,
}

impl PropagationPlanner {
    pub fn new(config: Arc<CoreConfig>, graph: Arc<ConceptGraph>) -> Self {
        Self { config, graph, rules: built_in_rules(), metrics: MetricsCell::default() }
    }

    /// Register an additional rule (extensibility point).
    pub fn add_rule(&mut self, rule: Box<dyn PropagationRule>) {
        self.rules.push(rule);
    }

    /// Emit suggestions for a confirmed change. Bounded by depth, a strict
    /// visited set, and the suggestion cap.
    pub fn plan(&self, change: &Change) -> CoreResult<Vec<Suggestion>> {
        let max_suggestions = self.config.layers.l5.max_suggestions;
        let auto_threshold = self.config.layers.l5.auto_apply_threshold;
        let max_depth = self.config.layers.l5.max_depth;

        let applicable: Vec<&dyn PropagationRule> = self
            .rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| r.matches(change))
            .collect();
        if applicable.is_empty() {
            return Ok(Vec::new());
        }

        // Resolve the source concept, then walk its neighborhood.
        let source_id = match &change.source_concept_id {
            Some(id) => Some(id.clone()),
            None => self
                .graph
                .store()
                .concepts_by_name(&change.identifier)?
                .first()
                .map(|(c, _)| c.id.clone()),
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut targets: Vec<Concept> = Vec::new();

        if let Some(source_id) = &source_id {
            visited.insert(source_id.clone());
            for edge in self.graph.relationships(source_id, None, Some(max_depth))? {
                for endpoint in [&edge.source, &edge.target] {
                    if visited.insert(endpoint.clone()) {
                        if let Some(concept) = self.graph.store().get_concept(endpoint)? {
                            targets.push(concept);
                        }
                    }
                }
            }
        }

        // Cold graph: probe rule-derived counterpart names directly.
        if targets.is_empty() {
            let mut seeds: Vec<String> = Vec::new();
            for rule in &applicable {
                seeds.extend(rule.seed_names(change));
            }
            for name in seeds {
                for (concept, _) in self.graph.store().concepts_by_name(&name)? {
                    if visited.insert(concept.id.clone()) {
                        targets.push(concept);
                    }
                }
            }
        }

        let mut suggestions = Vec::new();
        for target in &targets {
            if suggestions.len() >= max_suggestions {
                debug!(cap = max_suggestions, "suggestion cap reached");
                break;
            }
            // Highest-priority matching rule wins for each target.
            let rule = applicable
                .iter()
                .copied()
                .filter(|r| r.can_propagate(change, target))
                .max_by_key(|r| r.priority());
            if let Some(rule) = rule {
                if let Some(mut suggestion) = rule.apply(change, target) {
                    suggestion.auto_apply = suggestion.confidence >= auto_threshold;
                    suggestions.push(suggestion);
                }
            }
        }
        suggestions.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(suggestions)
    }
}

// ---------------------------------------------------------------------------
// Layer impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Layer for PropagationPlanner {
    fn id(&self) -> LayerId {
        LayerId::L5
    }

    fn applies_to(&self, request: &CoreRequest) -> bool {
        matches!(
            request,
            CoreRequest::PlanRename { .. } | CoreRequest::PlanPropagation { .. }
        )
    }

    async fn process(&self, ctx: &StageContext, acc: &mut LayerOutcome) -> CoreResult<()> {
        let start = Instant::now();
        ctx.check_cancelled()?;
        acc.note_tool("propagation");

        let change = match &ctx.request {
            CoreRequest::PlanRename { from, to } => Change::rename(from.clone(), to.clone()),
            CoreRequest::PlanPropagation { change } => change.clone(),
            _ => return Ok(()),
        };

        match self.plan(&change) {
            Ok(suggestions) => {
                acc.suggestions.extend(suggestions);
                self.metrics.record_invocation(start.elapsed().as_millis() as u64);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure(&e);
                Err(e)
            }
        }
    }

    fn metrics(&self) -> LayerMetrics {
        self.metrics.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
