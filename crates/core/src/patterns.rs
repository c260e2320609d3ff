//! Layer 4 — rename pattern learning.
//!
//! Observed renames are generalized into templated substitutions (prefix
//! swap, suffix swap, case change) with a rolling confidence: exponential
//! moving average on feedback, decaying with time since last use. A pattern
//! becomes active after `learningThreshold` corroborating observations;
//! predictions are only emitted above `confidenceThreshold`.

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::graph::store::GraphStore;
use crate::layer::{Layer, LayerMetrics, MetricsCell, StageContext};
use crate::types::{CoreRequest, LayerId, LayerOutcome, Suggestion, SuggestionKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

/// EMA step applied on positive/negative feedback.
const LEARNING_ALPHA: f64 = 0.1;
/// A pattern demoted below this confidence goes inactive.
const DEMOTION_FLOOR: f64 = 0.3;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Identifier casing styles recognized by case-change templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameStyle {
    Camel,
    Pascal,
    Snake,
    ScreamingSnake,
}

impl NameStyle {
    pub fn label(&self) -> &'static str {
        match self {
            NameStyle::Camel => "camelCase",
            NameStyle::Pascal => "PascalCase",
            NameStyle::Snake => "snake_case",
            NameStyle::ScreamingSnake => "SCREAMING_SNAKE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "camelCase" => Some(NameStyle::Camel),
            "PascalCase" => Some(NameStyle::Pascal),
            "snake_case" => Some(NameStyle::Snake),
            "SCREAMING_SNAKE" => Some(NameStyle::ScreamingSnake),
            _ => None,
        }
    }

    pub fn of(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        let has_underscore = name.contains('_');
        let all_upper = name.chars().all(|c| !c.is_lowercase());
        let starts_upper = name.starts_with(|c: char| c.is_uppercase());
        if has_underscore && all_upper {
            Some(NameStyle::ScreamingSnake)
        } else if has_underscore {
            Some(NameStyle::Snake)
        } else if starts_upper {
            Some(NameStyle::Pascal)
        } else if name.chars().any(|c| c.is_uppercase()) {
            Some(NameStyle::Camel)
        } else {
            // All-lowercase single word: ambiguous, treat as camel
            Some(NameStyle::Camel)
        }
    }

    pub fn render(&self, tokens: &[String]) -> String {
        match self {
            NameStyle::Camel => {
                let mut out = String::new();
                for (i, t) in tokens.iter().enumerate() {
                    if i == 0 {
                        out.push_str(t);
                    } else {
                        out.push_str(&capitalize(t));
                    }
                }
                out
            }
            NameStyle::Pascal => tokens.iter().map(|t| capitalize(t)).collect(),
            NameStyle::Snake => tokens.join("_"),
            NameStyle::ScreamingSnake => tokens
                .iter()
                .map(|t| t.to_uppercase())
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A templated substitution, e.g. `get*` -> `fetch*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatternTemplate {
    PrefixSwap { from: String, to: String },
    SuffixSwap { from: String, to: String },
    CaseChange { from: NameStyle, to: NameStyle },
}

impl PatternTemplate {
    /// Detect the template relating `old` to `new`, if any.
    pub fn detect(old: &str, new: &str) -> Option<Self> {
        if old == new || old.is_empty() || new.is_empty() {
            return None;
        }

        // Case change: identical token streams, different style
        let old_tokens = crate::graph::similarity::split_tokens(old);
        let new_tokens = crate::graph::similarity::split_tokens(new);
        if old_tokens == new_tokens {
            let (from, to) = (NameStyle::of(old)?, NameStyle::of(new)?);
            if from != to {
                return Some(PatternTemplate::CaseChange { from, to });
            }
            return None;
        }

        let old_b: Vec<char> = old.chars().collect();
        let new_b: Vec<char> = new.chars().collect();

        // Prefix swap: shared tail (snapped to a token boundary), differing head
        let mut common_suffix = old_b
            .iter()
            .rev()
            .zip(new_b.iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        while common_suffix > 0 {
            let start = old_b[old_b.len() - common_suffix];
            if start.is_uppercase() || start == '_' {
                break;
            }
            common_suffix -= 1;
        }
        if common_suffix > 0 {
            let old_head: String = old_b[..old_b.len() - common_suffix].iter().collect();
            let new_head: String = new_b[..new_b.len() - common_suffix].iter().collect();
            if !old_head.is_empty() && !new_head.is_empty() && old_head != new_head {
                return Some(PatternTemplate::PrefixSwap { from: old_head, to: new_head });
            }
        }

        // Suffix swap: shared head, differing tail starting at a token boundary
        let mut common_prefix =
            old_b.iter().zip(new_b.iter()).take_while(|(a, b)| a == b).count();
        while common_prefix > 0 {
            let boundary = old_b
                .get(common_prefix)
                .or_else(|| new_b.get(common_prefix))
                .map(|c| c.is_uppercase() || *c == '_')
                .unwrap_or(false);
            if boundary {
                break;
            }
            common_prefix -= 1;
        }
        if common_prefix > 0 {
            let old_tail: String = old_b[common_prefix..].iter().collect();
            let new_tail: String = new_b[common_prefix..].iter().collect();
            if old_tail != new_tail && !(old_tail.is_empty() && new_tail.is_empty()) {
                return Some(PatternTemplate::SuffixSwap { from: old_tail, to: new_tail });
            }
        }
        None
    }

    /// Apply the template to an identifier, or `None` when it doesn't match.
    pub fn apply(&self, identifier: &str) -> Option<String> {
        match self {
            PatternTemplate::PrefixSwap { from, to } => identifier
                .strip_prefix(from.as_str())
                .map(|rest| format!("{to}{rest}")),
            PatternTemplate::SuffixSwap { from, to } => identifier
                .strip_suffix(from.as_str())
                .map(|rest| format!("{rest}{to}")),
            PatternTemplate::CaseChange { from, to } => {
                if NameStyle::of(identifier) != Some(*from) {
                    return None;
                }
                let tokens = crate::graph::similarity::split_tokens(identifier);
                if tokens.is_empty() {
                    return None;
                }
                Some(to.render(&tokens))
            }
        }
    }

    /// True when the template could transform this identifier.
    pub fn matches(&self, identifier: &str) -> bool {
        self.apply(identifier).is_some()
    }

    /// Storage triple `(kind, from, to)`.
    pub fn parts(&self) -> (&'static str, String, String) {
        match self {
            PatternTemplate::PrefixSwap { from, to } => ("prefix", from.clone(), to.clone()),
            PatternTemplate::SuffixSwap { from, to } => ("suffix", from.clone(), to.clone()),
            PatternTemplate::CaseChange { from, to } => {
                ("case", from.label().to_string(), to.label().to_string())
            }
        }
    }

    pub fn from_parts(kind: &str, from: &str, to: &str) -> Self {
        match kind {
            "suffix" => PatternTemplate::SuffixSwap { from: from.into(), to: to.into() },
            "case" => PatternTemplate::CaseChange {
                from: NameStyle::parse(from).unwrap_or(NameStyle::Camel),
                to: NameStyle::parse(to).unwrap_or(NameStyle::Snake),
            },
            _ => PatternTemplate::PrefixSwap { from: from.into(), to: to.into() },
        }
    }

    pub fn display(&self) -> String {
        match self {
            PatternTemplate::PrefixSwap { from, to } => format!("{from}* -> {to}*"),
            PatternTemplate::SuffixSwap { from, to } => format!("*{from} -> *{to}"),
            PatternTemplate::CaseChange { from, to } => {
                format!("{} -> {}", from.label(), to.label())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// A learned rename pattern with rolling confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenamePattern {
    pub id: String,
    pub name: String,
    pub template: PatternTemplate,
    pub category: String,
    pub occurrences: u32,
    pub confidence: f64,
    #[serde(rename = "lastUsed")]
    pub last_used: DateTime<Utc>,
    #[serde(rename = "decayRate")]
    pub decay_rate: f64,
    pub active: bool,
}

impl RenamePattern {
    /// Confidence after applying time decay since `last_used`.
    pub fn decayed_confidence(&self, now: DateTime<Utc>) -> f64 {
        let days = (now - self.last_used).num_seconds().max(0) as f64 / 86_400.0;
        self.confidence * (1.0 - self.decay_rate).powf(days)
    }
}

/// Outcome of one learning event.
#[derive(Debug, Clone, Serialize)]
pub struct LearningResult {
    #[serde(rename = "patternId")]
    pub pattern_id: String,
    /// Confidence change applied by this observation.
    pub delta: f64,
}

/// A predicted rename for an identifier.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub suggested: String,
    pub confidence: f64,
    #[serde(rename = "patternId")]
    pub pattern_id: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Learner
// ---------------------------------------------------------------------------

pub struct PatternLearner {
    config: Arc<CoreConfig>,
    store: Arc<GraphStore>,
    patterns: RwLock<Vec<RenamePattern>>,
    metrics: MetricsCell,
}

impl PatternLearner {
    pub fn new(config: Arc<CoreConfig>, store: Arc<GraphStore>) -> Self {
        let patterns = store.load_patterns().unwrap_or_default();
        Self { config, store, patterns: RwLock::new(patterns), metrics: MetricsCell::default() }
    }

    /// Record an observed rename, updating or creating the matching pattern.
    pub fn learn_from_rename(
        &self,
        old_name: &str,
        new_name: &str,
        context: &str,
    ) -> CoreResult<LearningResult> {
        let template = PatternTemplate::detect(old_name, new_name).ok_or_else(|| {
            CoreError::InvalidRequest(format!("no learnable pattern in {old_name} -> {new_name}"))
        })?;

        let threshold = self.config.layers.l4.learning_threshold;
        let mut patterns = self.patterns.write().unwrap_or_else(|e| e.into_inner());

        if let Some(pattern) = patterns.iter_mut().find(|p| p.template == template) {
            let before = pattern.confidence;
            pattern.occurrences += 1;
            pattern.confidence += LEARNING_ALPHA * (1.0 - pattern.confidence);
            pattern.last_used = Utc::now();
            pattern.active = pattern.occurrences >= threshold;
            self.store.save_pattern(pattern)?;
            debug!(pattern = %pattern.template.display(), confidence = pattern.confidence, "pattern reinforced");
            return Ok(LearningResult {
                pattern_id: pattern.id.clone(),
                delta: pattern.confidence - before,
            });
        }

        let pattern = RenamePattern {
            id: uuid::Uuid::new_v4().to_string(),
            name: template.display(),
            template,
            category: category_of(context),
            occurrences: 1,
            confidence: 0.5,
            last_used: Utc::now(),
            decay_rate: self.config.layers.l4.decay_rate,
            active: threshold <= 1,
        };
        self.store.save_pattern(&pattern)?;
        let result = LearningResult { pattern_id: pattern.id.clone(), delta: 0.5 };
        patterns.push(pattern);

        // Keep the pattern set bounded: evict the weakest
        let max = self.config.layers.l4.max_patterns;
        if patterns.len() > max {
            patterns.sort_by(|a, b| {
                b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
            });
            for evicted in patterns.split_off(max) {
                self.store.delete_pattern(&evicted.id)?;
            }
        }
        Ok(result)
    }

    /// Negative feedback: a suggestion from this pattern was rejected.
    pub fn record_rejection(&self, pattern_id: &str) -> CoreResult<LearningResult> {
        let mut patterns = self.patterns.write().unwrap_or_else(|e| e.into_inner());
        let pattern = patterns
            .iter_mut()
            .find(|p| p.id == pattern_id)
            .ok_or_else(|| CoreError::NotFound(format!("pattern {pattern_id}")))?;
        let before = pattern.confidence;
        pattern.confidence *= 1.0 - LEARNING_ALPHA;
        if pattern.confidence < DEMOTION_FLOOR {
            pattern.active = false;
        }
        self.store.save_pattern(pattern)?;
        Ok(LearningResult { pattern_id: pattern.id.clone(), delta: pattern.confidence - before })
    }

    /// Ordered predictions for the likely rename of `identifier`.
    pub fn predict_next_rename(&self, identifier: &str, _context: &str) -> Vec<Prediction> {
        let now = Utc::now();
        let threshold = self.config.layers.l4.confidence_threshold;
        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Prediction> = patterns
            .iter()
            .filter(|p| p.active)
            .filter_map(|p| {
                let confidence = p.decayed_confidence(now);
                if confidence < threshold {
                    return None;
                }
                let suggested = p.template.apply(identifier)?;
                Some(Prediction {
                    suggested,
                    confidence,
                    pattern_id: p.id.clone(),
                    reason: format!("learned pattern {}", p.template.display()),
                })
            })
            .collect();
        out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    /// Apply a known pattern to an identifier.
    pub fn apply_pattern(&self, pattern: &RenamePattern, identifier: &str) -> Option<String> {
        pattern.template.apply(identifier)
    }

    /// Patterns whose template matches `identifier`, above the floor.
    pub fn find_applicable_patterns(&self, identifier: &str) -> Vec<RenamePattern> {
        let now = Utc::now();
        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        patterns
            .iter()
            .filter(|p| p.template.matches(identifier) && p.decayed_confidence(now) >= DEMOTION_FLOOR)
            .cloned()
            .collect()
    }

    pub fn pattern_stats(&self) -> Vec<RenamePattern> {
        self.patterns.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn category_of(context: &str) -> String {
    if context.is_empty() {
        "rename".to_string()
    } else {
        context.to_string()
    }
}

// ---------------------------------------------------------------------------
// Layer impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Layer for PatternLearner {
    fn id(&self) -> LayerId {
        LayerId::L4
    }

    fn applies_to(&self, request: &CoreRequest) -> bool {
        matches!(
            request,
            CoreRequest::PlanRename { .. }
                | CoreRequest::Completions { .. }
                | CoreRequest::PlanPropagation { .. }
        )
    }

    async fn process(&self, ctx: &StageContext, acc: &mut LayerOutcome) -> CoreResult<()> {
        let start = Instant::now();
        ctx.check_cancelled()?;
        acc.note_tool("patterns");
        match &ctx.request {
            CoreRequest::PlanRename { from, .. } | CoreRequest::Completions { prefix: from, .. } => {
                for prediction in self.predict_next_rename(from, "") {
                    acc.suggestions.push(Suggestion {
                        kind: SuggestionKind::Rename,
                        target: from.clone(),
                        proposal: prediction.suggested,
                        confidence: prediction.confidence,
                        reason: prediction.reason,
                        auto_apply: false,
                        evidence: vec![format!("pattern:{}", prediction.pattern_id)],
                    });
                }
            }
            CoreRequest::PlanPropagation { change } => {
                if let Some(to) = change.new_name() {
                    // An explicitly confirmed change is a learning event.
                    let _ = self.learn_from_rename(&change.identifier, to, "propagation");
                }
            }
            _ => {}
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

    fn learner() -> PatternLearner {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        PatternLearner::new(Arc::new(CoreConfig::default()), store)
    }

    #[test]
    fn detects_prefix_swap() {
        let t = PatternTemplate::detect("getUser", "fetchUser").unwrap();
        assert_eq!(t, PatternTemplate::PrefixSwap { from: "get".into(), to: "fetch".into() });
        assert_eq!(t.apply("getAccount").as_deref(), Some("fetchAccount"));
        assert_eq!(t.apply("setAccount"), None);
    }

    #[test]
    fn detects_suffix_swap() {
        let t = PatternTemplate::detect("UserRepo", "UserRepository").unwrap();
        assert_eq!(
            t,
            PatternTemplate::SuffixSwap { from: "Repo".into(), to: "Repository".into() }
        );
        assert_eq!(t.apply("AccountRepo").as_deref(), Some("AccountRepository"));
    }

    #[test]
    fn detects_case_change() {
        let t = PatternTemplate::detect("getUserById", "get_user_by_id").unwrap();
        assert_eq!(
            t,
            PatternTemplate::CaseChange { from: NameStyle::Camel, to: NameStyle::Snake }
        );
        assert_eq!(t.apply("parseConfigFile").as_deref(), Some("parse_config_file"));
        assert_eq!(t.apply("already_snake"), None);
    }

    #[test]
    fn identical_names_have_no_template() {
        assert!(PatternTemplate::detect("same", "same").is_none());
    }

    #[test]
    fn template_round_trips_through_parts() {
        for t in [
            PatternTemplate::PrefixSwap { from: "get".into(), to: "fetch".into() },
            PatternTemplate::SuffixSwap { from: "Repo".into(), to: "Repository".into() },
            PatternTemplate::CaseChange { from: NameStyle::Pascal, to: NameStyle::Snake },
        ] {
            let (kind, from, to) = t.parts();
            assert_eq!(PatternTemplate::from_parts(kind, &from, &to), t);
        }
    }

    #[test]
    fn pattern_activates_after_threshold() {
        let l = learner();
        l.learn_from_rename("getUser", "fetchUser", "").unwrap();
        l.learn_from_rename("getAccount", "fetchAccount", "").unwrap();
        assert!(
            l.predict_next_rename("getOrder", "").is_empty(),
            "inactive pattern must not predict"
        );
        l.learn_from_rename("getOrder", "fetchOrder", "").unwrap();

        let predictions = l.predict_next_rename("getInvoice", "");
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].suggested, "fetchInvoice");
        assert!(predictions[0].confidence >= 0.7, "confidence {}", predictions[0].confidence);
    }

    #[test]
    fn confidence_grows_by_ema() {
        let l = learner();
        let first = l.learn_from_rename("getUser", "fetchUser", "").unwrap();
        assert!((first.delta - 0.5).abs() < 1e-9);
        let second = l.learn_from_rename("getAccount", "fetchAccount", "").unwrap();
        // 0.5 + 0.1 * (1 - 0.5) = 0.55
        assert!((second.delta - 0.05).abs() < 1e-9, "delta {}", second.delta);
    }

    #[test]
    fn rejection_reduces_and_demotes() {
        let l = learner();
        let result = l.learn_from_rename("getUser", "fetchUser", "").unwrap();
        for _ in 0..10 {
            l.record_rejection(&result.pattern_id).unwrap();
        }
        let stats = l.pattern_stats();
        let p = stats.iter().find(|p| p.id == result.pattern_id).unwrap();
        assert!(p.confidence < DEMOTION_FLOOR);
        assert!(!p.active);
    }

    #[test]
    fn patterns_persist_across_instances() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let config = Arc::new(CoreConfig::default());
        let l = PatternLearner::new(Arc::clone(&config), Arc::clone(&store));
        for (a, b) in [("getA", "fetchA"), ("getB", "fetchB"), ("getC", "fetchC")] {
            l.learn_from_rename(a, b, "").unwrap();
        }
        let reloaded = PatternLearner::new(config, store);
        let predictions = reloaded.predict_next_rename("getD", "");
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].suggested, "fetchD");
    }

    #[test]
    fn decay_reduces_confidence_over_time() {
        let mut p = RenamePattern {
            id: "p".into(),
            name: "t".into(),
            template: PatternTemplate::PrefixSwap { from: "a".into(), to: "b".into() },
            category: "rename".into(),
            occurrences: 5,
            confidence: 0.9,
            last_used: Utc::now() - chrono::Duration::days(30),
            decay_rate: 0.02,
            active: true,
        };
        let decayed = p.decayed_confidence(Utc::now());
        assert!(decayed < 0.9 * 0.6, "30 days at 2%/day should halve-ish: {decayed}");
        p.last_used = Utc::now();
        assert!((p.decayed_confidence(Utc::now()) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn name_style_detection() {
        assert_eq!(NameStyle::of("getUser"), Some(NameStyle::Camel));
        assert_eq!(NameStyle::of("GetUser"), Some(NameStyle::Pascal));
        assert_eq!(NameStyle::of("get_user"), Some(NameStyle::Snake));
        assert_eq!(NameStyle::of("GET_USER"), Some(NameStyle::ScreamingSnake));
    }
}
