use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum file size (in bytes) that will be read into memory.
pub const MAX_FILE_READ: usize = 512 * 1024;

/// Directory under the workspace root holding all persisted state.
pub const STATE_DIR: &str = ".ontology";

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A 0-based position within a file identified by its workspace-relative URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub line: u32,
    pub col: u32,
}

impl Location {
    pub fn new(uri: impl Into<String>, line: u32, col: u32) -> Self {
        Self { uri: uri.into(), line, col }
    }
}

/// A span between two locations in the same file. `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Location,
    pub end: Location,
}

impl Range {
    /// Single-line range covering `[col, col+len)` on `line`.
    pub fn on_line(uri: &str, line: u32, col: u32, len: u32) -> Self {
        Self {
            start: Location::new(uri, line, col),
            end: Location::new(uri, line, col + len),
        }
    }

    pub fn uri(&self) -> &str {
        &self.start.uri
    }
}

// ---------------------------------------------------------------------------
// Concepts and relationships
// ---------------------------------------------------------------------------

/// The kind of a semantic concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptKind {
    Class,
    Function,
    Variable,
    Module,
    Interface,
    Type,
    Namespace,
    Package,
}

impl ConceptKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConceptKind::Class => "class",
            ConceptKind::Function => "function",
            ConceptKind::Variable => "variable",
            ConceptKind::Module => "module",
            ConceptKind::Interface => "interface",
            ConceptKind::Type => "type",
            ConceptKind::Namespace => "namespace",
            ConceptKind::Package => "package",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(ConceptKind::Class),
            "function" => Some(ConceptKind::Function),
            "variable" => Some(ConceptKind::Variable),
            "module" => Some(ConceptKind::Module),
            "interface" => Some(ConceptKind::Interface),
            "type" => Some(ConceptKind::Type),
            "namespace" => Some(ConceptKind::Namespace),
            "package" => Some(ConceptKind::Package),
            _ => None,
        }
    }
}

/// A semantic concept: the identity behind one or more textual representations.
///
/// `id` is stable across runs; `canonical_name` is the preferred identifier
/// form (non-empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    #[serde(rename = "canonicalName")]
    pub canonical_name: String,
    pub kind: ConceptKind,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A concrete textual occurrence of a concept at a location.
///
/// `(concept_id, uri, range)` is unique; `occurrences >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRepresentation {
    #[serde(rename = "conceptId")]
    pub concept_id: String,
    pub name: String,
    pub location: Range,
    pub occurrences: u32,
    /// The source line the representation appears on.
    pub context: String,
}

/// Typed edge between two concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    Uses,
    Extends,
    Implements,
    Imports,
    Contains,
    DependsOn,
}

impl RelationshipKind {
    pub fn label(&self) -> &'static str {
        match self {
            RelationshipKind::Uses => "uses",
            RelationshipKind::Extends => "extends",
            RelationshipKind::Implements => "implements",
            RelationshipKind::Imports => "imports",
            RelationshipKind::Contains => "contains",
            RelationshipKind::DependsOn => "dependsOn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uses" => Some(RelationshipKind::Uses),
            "extends" => Some(RelationshipKind::Extends),
            "implements" => Some(RelationshipKind::Implements),
            "imports" => Some(RelationshipKind::Imports),
            "contains" => Some(RelationshipKind::Contains),
            "dependsOn" => Some(RelationshipKind::DependsOn),
            _ => None,
        }
    }
}

/// Directed relationship between two concepts. Self-loops are only valid for
/// `Contains`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub kind: RelationshipKind,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Changes and suggestions
// ---------------------------------------------------------------------------

/// A confirmed or proposed modification to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeKind {
    Rename { to: String },
    Move { to: String },
    Signature,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub identifier: String,
    #[serde(rename = "sourceConceptId")]
    pub source_concept_id: Option<String>,
    pub location: Option<Location>,
}

impl Change {
    pub fn rename(identifier: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Rename { to: to.into() },
            identifier: identifier.into(),
            source_concept_id: None,
            location: None,
        }
    }

    /// The proposed new name, when this change carries one.
    pub fn new_name(&self) -> Option<&str> {
        match &self.kind {
            ChangeKind::Rename { to } | ChangeKind::Move { to } => Some(to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionKind {
    Rename,
    SyncPair,
    TestSync,
    Convention,
    InterfaceMember,
}

/// A proposed follow-up change produced by pattern prediction or propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    /// Name or concept id the suggestion targets.
    pub target: String,
    pub proposal: String,
    pub confidence: f64,
    pub reason: String,
    #[serde(rename = "autoApply")]
    pub auto_apply: bool,
    #[serde(default)]
    pub evidence: Vec<String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// The typed request surface accepted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CoreRequest {
    FindDefinition { name: String, location: Option<Location> },
    FindReferences { name: String, location: Option<Location> },
    FindImplementations { name: String },
    Hover { name: String, location: Option<Location> },
    Completions { prefix: String, location: Option<Location> },
    Diagnostics { path: Option<String> },
    PlanRename { from: String, to: String },
    PlanPropagation { change: Change },
}

impl CoreRequest {
    pub fn kind_label(&self) -> &'static str {
        match self {
            CoreRequest::FindDefinition { .. } => "findDefinition",
            CoreRequest::FindReferences { .. } => "findReferences",
            CoreRequest::FindImplementations { .. } => "findImplementations",
            CoreRequest::Hover { .. } => "hover",
            CoreRequest::Completions { .. } => "completions",
            CoreRequest::Diagnostics { .. } => "diagnostics",
            CoreRequest::PlanRename { .. } => "planRename",
            CoreRequest::PlanPropagation { .. } => "planPropagation",
        }
    }

    /// The identifier the request is about, when there is one.
    pub fn subject(&self) -> Option<&str> {
        match self {
            CoreRequest::FindDefinition { name, .. }
            | CoreRequest::FindReferences { name, .. }
            | CoreRequest::FindImplementations { name }
            | CoreRequest::Hover { name, .. } => Some(name),
            CoreRequest::Completions { prefix, .. } => Some(prefix),
            CoreRequest::PlanRename { from, .. } => Some(from),
            CoreRequest::PlanPropagation { change } => Some(&change.identifier),
            CoreRequest::Diagnostics { .. } => None,
        }
    }

    /// The location hint attached to the request, if any. Used for
    /// proximity-based ranking of fused definitions.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CoreRequest::FindDefinition { location, .. }
            | CoreRequest::FindReferences { location, .. }
            | CoreRequest::Hover { location, .. }
            | CoreRequest::Completions { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    /// Definition-style queries must always reach the AST layer so true
    /// declarations can be distinguished from textual matches.
    pub fn requires_ast(&self) -> bool {
        matches!(
            self,
            CoreRequest::FindDefinition { .. } | CoreRequest::FindImplementations { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Layer identity and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerId {
    L1,
    L2,
    L3,
    L4,
    L5,
}

pub const ALL_LAYERS: [LayerId; 5] =
    [LayerId::L1, LayerId::L2, LayerId::L3, LayerId::L4, LayerId::L5];

impl LayerId {
    pub fn label(&self) -> &'static str {
        match self {
            LayerId::L1 => "lexical",
            LayerId::L2 => "ast",
            LayerId::L3 => "concepts",
            LayerId::L4 => "patterns",
            LayerId::L5 => "propagation",
        }
    }
}

/// A symbol match produced by one of the layers, before fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundSymbol {
    pub name: String,
    pub location: Range,
    pub kind: Option<ConceptKind>,
    pub confidence: f64,
    pub source: LayerId,
    /// The source line containing the match, when available.
    pub context: Option<String>,
    /// True when the producing layer verified this is a declaration rather
    /// than a textual occurrence.
    #[serde(rename = "isDefinition")]
    pub is_definition: bool,
}

/// A completion candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<ConceptKind>,
    pub detail: Option<String>,
    pub confidence: f64,
}

/// A single planned text edit within one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedEdit {
    pub uri: String,
    pub line: u32,
    pub col: u32,
    #[serde(rename = "oldText")]
    pub old_text: String,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// The outcome of `planRename`: concrete edits plus related suggestions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenamePlan {
    pub edits: Vec<PlannedEdit>,
    pub suggestions: Vec<Suggestion>,
    /// Snapshot holding the staged edits, when one was created.
    #[serde(rename = "snapshotId")]
    pub snapshot_id: Option<String>,
}

/// Accumulated pipeline state handed from stage to stage.
#[derive(Debug, Clone, Default)]
pub struct LayerOutcome {
    /// Candidate files discovered so far (L1 feeds these to L2).
    pub candidate_files: Vec<String>,
    pub matches: Vec<FoundSymbol>,
    pub completions: Vec<CompletionItem>,
    pub suggestions: Vec<Suggestion>,
    pub diagnostics: Vec<DiagnosticEntry>,
    /// Names of internal tools that contributed (diagnostic surface).
    pub tools_used: Vec<String>,
    /// Set by a stage when its result alone satisfies the query.
    pub sufficient: bool,
    /// True when a stage truncated work to honor its budget.
    pub timed_out: bool,
}

impl LayerOutcome {
    pub fn note_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Wall-clock milliseconds spent in each stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub l4: f64,
    pub l5: f64,
    pub total: f64,
}

impl StageTimings {
    pub fn record(&mut self, layer: LayerId, ms: f64) {
        match layer {
            LayerId::L1 => self.l1 += ms,
            LayerId::L2 => self.l2 += ms,
            LayerId::L3 => self.l3 += ms,
            LayerId::L4 => self.l4 += ms,
            LayerId::L5 => self.l5 += ms,
        }
    }
}

/// Why a layer contributed nothing to a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerFailure {
    pub layer: LayerId,
    pub reason: String,
}

/// Payload variants for [`CoreResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponseData {
    Definitions { symbols: Vec<FoundSymbol> },
    References { symbols: Vec<FoundSymbol> },
    Completions { items: Vec<CompletionItem> },
    Diagnostics { entries: Vec<DiagnosticEntry> },
    RenamePlan { plan: RenamePlan },
    Suggestions { suggestions: Vec<Suggestion> },
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub uri: String,
    pub line: u32,
    pub message: String,
    pub severity: String,
}

/// Fused response returned by the orchestrator for every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreResponse {
    pub data: ResponseData,
    #[serde(rename = "perStageTimings")]
    pub per_stage: StageTimings,
    /// Layers that contributed evidence.
    pub source: Vec<LayerId>,
    pub confidence: f64,
    #[serde(rename = "cacheHit")]
    pub cache_hit: bool,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: i64,
    /// Per-layer failures, for partial results.
    #[serde(default)]
    pub failures: Vec<LayerFailure>,
    /// Internal tools that contributed (e.g. "bloomFilter", "grep").
    #[serde(default, rename = "toolsUsed")]
    pub tools_used: Vec<String>,
}

// ---------------------------------------------------------------------------
// File events
// ---------------------------------------------------------------------------

/// A workspace file change consumed from the adapter or the OS watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileEvent {
    Created { path: String },
    Modified { path: String },
    Deleted { path: String },
    Renamed { from: String, to: String },
}

impl FileEvent {
    /// Paths touched by this event.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            FileEvent::Created { path }
            | FileEvent::Modified { path }
            | FileEvent::Deleted { path } => vec![path],
            FileEvent::Renamed { from, to } => vec![from, to],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_kind_round_trips() {
        for kind in [
            RelationshipKind::Uses,
            RelationshipKind::Extends,
            RelationshipKind::Implements,
            RelationshipKind::Imports,
            RelationshipKind::Contains,
            RelationshipKind::DependsOn,
        ] {
            assert_eq!(RelationshipKind::parse(kind.label()), Some(kind));
        }
        assert_eq!(RelationshipKind::parse("bogus"), None);
    }

    #[test]
    fn concept_kind_round_trips() {
        for kind in [ConceptKind::Class, ConceptKind::Function, ConceptKind::Package] {
            assert_eq!(ConceptKind::parse(kind.label()), Some(kind));
        }
    }

    #[test]
    fn definition_requests_require_ast() {
        let req = CoreRequest::FindDefinition { name: "Foo".into(), location: None };
        assert!(req.requires_ast());
        let req = CoreRequest::FindReferences { name: "Foo".into(), location: None };
        assert!(!req.requires_ast());
    }

    #[test]
    fn change_new_name() {
        let c = Change::rename("getUser", "fetchUser");
        assert_eq!(c.new_name(), Some("fetchUser"));
        let c = Change {
            kind: ChangeKind::Delete,
            identifier: "x".into(),
            source_concept_id: None,
            location: None,
        };
        assert_eq!(c.new_name(), None);
    }

    #[test]
    fn stage_timings_accumulate() {
        let mut t = StageTimings::default();
        t.record(LayerId::L2, 12.5);
        t.record(LayerId::L2, 2.5);
        assert!((t.l2 - 15.0).abs() < f64::EPSILON);
        assert_eq!(t.l1, 0.0);
    }

    #[test]
    fn range_on_line() {
        let r = Range::on_line("src/a.ts", 4, 2, 7);
        assert_eq!(r.start.line, 4);
        assert_eq!(r.end.col, 9);
        assert_eq!(r.uri(), "src/a.ts");
    }
}
