//! Ontoscope core — a layered code-intelligence pipeline.
//!
//! Answers symbol-oriented queries (definitions, references, rename with
//! propagation, completions, diagnostics) over a multi-language workspace by
//! composing five evidence layers under per-stage budgets: lexical search,
//! tree-sitter ASTs, a persistent concept graph, a rename-pattern learner,
//! and a change-propagation planner. Results fuse by confidence; mutations
//! go through the transactional snapshot store. Protocol adapters live in
//! the sibling `ontoscope-mcp` and `ontoscope-cli` crates.

pub mod astx;
pub mod bloom;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod conventions;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod layer;
pub mod lexical;
pub mod orchestrator;
pub mod patterns;
pub mod propagation;
pub mod services;
pub mod snapshot;
pub mod types;
pub mod watch;
pub mod workspace;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use orchestrator::Orchestrator;
pub use types::{
    Change, ChangeKind, Concept, ConceptKind, CoreRequest, CoreResponse, FileEvent, FoundSymbol,
    LayerId, Location, Range, Relationship, RelationshipKind, RenamePlan, ResponseData,
    Suggestion, SuggestionKind, SymbolRepresentation,
};
