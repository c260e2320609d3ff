//! Confidence fusion across layer results.
//!
//! Duplicate locations reported by several layers merge into one symbol
//! whose confidence is the max of the individuals plus a small bonus per
//! corroborating layer, capped at 1.0. The fused request confidence starts
//! at 0.5 and grows by a weighted bonus per contributing layer.
//! Definitions sort by confidence, then proximity to the request location.

use crate::types::{
    CoreRequest, FoundSymbol, LayerId, LayerOutcome, Location, ResponseData,
};
use std::collections::BTreeMap;

/// Base confidence before any layer contributes.
const BASE_CONFIDENCE: f64 = 0.5;

/// Additive bonus per extra layer corroborating the same location.
const CORROBORATION_BONUS: f64 = 0.05;

/// Per-layer contribution scale.
const LAYER_BONUS_SCALE: f64 = 0.1;

pub fn layer_weight(layer: LayerId) -> f64 {
    match layer {
        LayerId::L1 => 1.0,
        LayerId::L2 => 1.2,
        LayerId::L3 => 1.5,
        LayerId::L4 => 1.3,
        LayerId::L5 => 1.4,
    }
}

/// Fused request confidence for the set of contributing layers.
pub fn fused_confidence(sources: &[LayerId]) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    for layer in sources {
        confidence += LAYER_BONUS_SCALE * layer_weight(*layer);
    }
    confidence.min(1.0)
}

/// Merge matches that point at the same location across layers.
pub fn merge_matches(matches: &[FoundSymbol]) -> Vec<FoundSymbol> {
    let mut merged: BTreeMap<(String, u32, u32), FoundSymbol> = BTreeMap::new();
    let mut corroborators: BTreeMap<(String, u32, u32), Vec<LayerId>> = BTreeMap::new();

    for m in matches {
        let key = (
            m.location.uri().to_string(),
            m.location.start.line,
            m.location.start.col,
        );
        let layers = corroborators.entry(key.clone()).or_default();
        if !layers.contains(&m.source) {
            layers.push(m.source);
        }
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(m.confidence);
                existing.is_definition |= m.is_definition;
                if existing.kind.is_none() {
                    existing.kind = m.kind;
                }
                if existing.context.is_none() {
                    existing.context = m.context.clone();
                }
            }
            None => {
                merged.insert(key, m.clone());
            }
        }
    }

    let mut out: Vec<FoundSymbol> = merged
        .into_iter()
        .map(|(key, mut symbol)| {
            let extra = corroborators.get(&key).map(|l| l.len().saturating_sub(1)).unwrap_or(0);
            symbol.confidence =
                (symbol.confidence + CORROBORATION_BONUS * extra as f64).min(1.0);
            symbol
        })
        .collect();
    out.sort_by(|a, b| {
        b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

/// Stable sort of definitions by confidence, then proximity to `origin`.
pub fn sort_definitions(symbols: &mut [FoundSymbol], origin: Option<&Location>) {
    symbols.sort_by(|a, b| {
        let by_conf = b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal);
        if by_conf != std::cmp::Ordering::Equal {
            return by_conf;
        }
        match origin {
            Some(origin) => proximity(a, origin).cmp(&proximity(b, origin)),
            None => std::cmp::Ordering::Equal,
        }
    });
}

fn proximity(symbol: &FoundSymbol, origin: &Location) -> u64 {
    if symbol.location.uri() == origin.uri {
        symbol.location.start.line.abs_diff(origin.line) as u64
    } else {
        // Different file: strictly farther than anything in-file
        u64::MAX
    }
}

/// Build the response payload for a completed pipeline pass.
pub fn build_data(request: &CoreRequest, outcome: &LayerOutcome) -> ResponseData {
    match request {
        CoreRequest::FindDefinition { .. } | CoreRequest::FindImplementations { .. } => {
            let mut symbols: Vec<FoundSymbol> = merge_matches(&outcome.matches)
                .into_iter()
                .filter(|m| m.is_definition)
                .collect();
            sort_definitions(&mut symbols, request.location());
            ResponseData::Definitions { symbols }
        }
        CoreRequest::FindReferences { .. } | CoreRequest::Hover { .. } => {
            ResponseData::References { symbols: merge_matches(&outcome.matches) }
        }
        CoreRequest::Completions { .. } => {
            let mut items = outcome.completions.clone();
            items.sort_by(|a, b| {
                b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
            });
            // Highest-confidence entry wins per label
            let mut seen = std::collections::HashSet::new();
            items.retain(|item| seen.insert(item.label.clone()));
            ResponseData::Completions { items }
        }
        CoreRequest::Diagnostics { .. } => {
            ResponseData::Diagnostics { entries: outcome.diagnostics.clone() }
        }
        CoreRequest::PlanRename { .. } => {
            // The orchestrator turns references + suggestions into a plan;
            // fusion only carries them through.
            ResponseData::Suggestions { suggestions: outcome.suggestions.clone() }
        }
        CoreRequest::PlanPropagation { .. } => {
            ResponseData::Suggestions { suggestions: outcome.suggestions.clone() }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
