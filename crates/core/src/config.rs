//! Typed core configuration, loaded from `.ontology.toml` at the workspace
//! root. Every field has a default; unknown keys are ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

// ---------------------------------------------------------------------------
// Per-layer configuration
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L1Config {
    pub enabled: bool,
    /// Stage latency budget in milliseconds.
    pub timeout: u64,
    pub max_results: usize,
    pub optimization: L1Optimization,
    /// Directory names excluded from every walk, in addition to ignore files.
    pub skip_dirs: Vec<String>,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 5,
            max_results: 1000,
            optimization: L1Optimization::default(),
            skip_dirs: ["node_modules", ".git", "dist", "coverage", "target", "build", ".next"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L1Optimization {
    pub bloom_filter: bool,
    pub frequency_cache: bool,
    pub parallel_search: bool,
}

impl Default for L1Optimization {
    fn default() -> Self {
        Self { bloom_filter: true, frequency_cache: true, parallel_search: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L2Config {
    pub enabled: bool,
    pub timeout: u64,
    pub languages: Vec<String>,
    pub max_file_size: usize,
    /// Per-file parse timeout in milliseconds.
    pub parse_timeout: u64,
    /// Upper bound on candidate files parsed per pipeline query.
    pub max_files: usize,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 50,
            languages: ["typescript", "javascript", "python"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: crate::types::MAX_FILE_READ,
            parse_timeout: 1000,
            max_files: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L3Config {
    pub enabled: bool,
    pub timeout: u64,
    /// Database path relative to the state dir. Empty = `ontology.db`.
    pub db_path: String,
    pub cache_size: usize,
    /// Minimum confidence for a concept to appear in results.
    pub concept_threshold: f64,
    pub relationship_depth: usize,
    /// Fuzzy name-similarity floor.
    pub fuzzy_threshold: f64,
}

impl Default for L3Config {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 10,
            db_path: String::new(),
            cache_size: 1000,
            concept_threshold: 0.3,
            relationship_depth: 3,
            fuzzy_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L4Config {
    pub enabled: bool,
    pub timeout: u64,
    /// Corroborating observations before a pattern becomes active.
    pub learning_threshold: u32,
    /// Minimum confidence for emitting a prediction.
    pub confidence_threshold: f64,
    pub max_patterns: usize,
    /// Confidence decay factor per day since last use.
    pub decay_rate: f64,
}

impl Default for L4Config {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 10,
            learning_threshold: 3,
            confidence_threshold: 0.7,
            max_patterns: 500,
            decay_rate: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct L5Config {
    pub enabled: bool,
    pub timeout: u64,
    pub max_depth: usize,
    /// Confidence above which a suggestion may be applied unconfirmed.
    pub auto_apply_threshold: f64,
    pub propagation_timeout: u64,
    pub max_suggestions: usize,
}

impl Default for L5Config {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 20,
            max_depth: 3,
            auto_apply_threshold: 0.8,
            propagation_timeout: 20,
            max_suggestions: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayersConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub l3: L3Config,
    pub l4: L4Config,
    pub l5: L5Config,
}

// ---------------------------------------------------------------------------
// Performance / cache / monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    /// End-to-end target latency in milliseconds.
    pub target_latency: u64,
    pub max_concurrent_requests: usize,
    /// Total per-request deadline in milliseconds.
    pub request_timeout: u64,
    /// Consecutive failures before a layer's breaker opens.
    pub circuit_breaker_threshold: u32,
    /// Breaker cooldown before a half-open probe, in milliseconds.
    pub circuit_breaker_cooldown: u64,
    pub health_check_interval: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_latency: 100,
            max_concurrent_requests: 100,
            request_timeout: 3000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: 30_000,
            health_check_interval: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheMemoryConfig {
    pub max_size: usize,
    /// Entry TTL in seconds.
    pub ttl: u64,
}

impl Default for CacheMemoryConfig {
    fn default() -> Self {
        Self { max_size: 500, ttl: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub strategy: CacheStrategy,
    pub memory: CacheMemoryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, strategy: CacheStrategy::Memory, memory: CacheMemoryConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub metrics_interval: u64,
    pub log_level: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enabled: true, metrics_interval: 60_000, log_level: "info".into() }
    }
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Complete runtime configuration for the analysis core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    #[serde(skip)]
    pub workspace_root: PathBuf,
    pub layers: LayersConfig,
    pub performance: PerformanceConfig,
    pub cache: CacheConfig,
    pub monitoring: MonitoringConfig,
}

impl CoreConfig {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root, ..Self::default() }
    }

    /// Load configuration for a workspace: `.ontology.toml` if present,
    /// otherwise defaults. A malformed file falls back to defaults with a
    /// warning rather than failing init.
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_root.join(".ontology.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<CoreConfig>(&text) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "bad config, using defaults");
                    CoreConfig::default()
                }
            },
            Err(_) => CoreConfig::default(),
        };
        config.workspace_root = workspace_root.to_path_buf();
        debug!(root = %workspace_root.display(), "config loaded");
        config
    }

    /// Absolute path of the state directory (`<workspace>/.ontology`).
    pub fn state_dir(&self) -> PathBuf {
        self.workspace_root.join(crate::types::STATE_DIR)
    }

    /// Absolute path of the embedded database.
    pub fn db_path(&self) -> PathBuf {
        if self.layers.l3.db_path.is_empty() {
            self.state_dir().join("ontology.db")
        } else {
            self.state_dir().join(&self.layers.l3.db_path)
        }
    }

    /// Absolute path of the snapshot directory.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir().join("snapshots")
    }

    pub fn enabled_layers(&self) -> Vec<crate::types::LayerId> {
        use crate::types::LayerId;
        let mut out = Vec::new();
        if self.layers.l1.enabled {
            out.push(LayerId::L1);
        }
        if self.layers.l2.enabled {
            out.push(LayerId::L2);
        }
        if self.layers.l3.enabled {
            out.push(LayerId::L3);
        }
        if self.layers.l4.enabled {
            out.push(LayerId::L4);
        }
        if self.layers.l5.enabled {
            out.push(LayerId::L5);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = CoreConfig::default();
        assert!(c.layers.l1.enabled);
        assert_eq!(c.layers.l2.max_files, 100);
        assert_eq!(c.layers.l4.learning_threshold, 3);
        assert!((c.layers.l4.confidence_threshold - 0.7).abs() < 1e-9);
        assert_eq!(c.layers.l5.max_depth, 3);
        assert!((c.layers.l5.auto_apply_threshold - 0.8).abs() < 1e-9);
        assert_eq!(c.performance.max_concurrent_requests, 100);
        assert_eq!(c.performance.request_timeout, 3000);
    }

    #[test]
    fn parses_partial_toml() {
        let text = r#"
[layers.l2]
maxFiles = 25
languages = ["python"]

[performance]
maxConcurrentRequests = 10
"#;
        let c: CoreConfig = toml::from_str(text).unwrap();
        assert_eq!(c.layers.l2.max_files, 25);
        assert_eq!(c.layers.l2.languages, vec!["python".to_string()]);
        assert_eq!(c.performance.max_concurrent_requests, 10);
        // Untouched sections keep defaults
        assert_eq!(c.layers.l5.max_suggestions, 500);
        assert!(c.cache.enabled);
    }

    #[test]
    fn load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = CoreConfig::load(dir.path());
        assert_eq!(c.workspace_root, dir.path());
        assert_eq!(c.db_path(), dir.path().join(".ontology/ontology.db"));
    }

    #[test]
    fn skip_dirs_include_defaults() {
        let c = L1Config::default();
        assert!(c.skip_dirs.iter().any(|d| d == "node_modules"));
        assert!(c.skip_dirs.iter().any(|d| d == ".git"));
    }
}
