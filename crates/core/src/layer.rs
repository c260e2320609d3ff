//! Uniform capability surface for pipeline layers.
//!
//! Every layer exposes the same lifecycle (`initialize`, `process`,
//! `dispose`, `is_healthy`, `metrics`) behind one trait; stage-specific
//! inputs and outputs travel through [`StageContext`] and
//! [`crate::types::LayerOutcome`].

use crate::error::CoreResult;
use crate::types::{CoreRequest, LayerId, LayerOutcome};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Stage context
// ---------------------------------------------------------------------------

/// Per-request state handed to each stage.
pub struct StageContext {
    pub request: CoreRequest,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(request: CoreRequest, cancel: CancellationToken) -> Self {
        Self { request, cancel }
    }

    /// Bail out with `Cancelled` when the caller has given up. Layers call
    /// this at every suspension point.
    pub fn check_cancelled(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            Err(crate::error::CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Point-in-time metrics snapshot for one layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub cancellations: u64,
    #[serde(rename = "totalMs")]
    pub total_ms: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

/// Lock-free counters shared by all layer implementations.
#[derive(Debug, Default)]
pub struct MetricsCell {
    invocations: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
    total_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MetricsCell {
    pub fn record_invocation(&self, elapsed_ms: u64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &crate::error::CoreError) {
        if matches!(error, crate::error::CoreError::Cancelled) {
            self.cancellations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
    }

    pub fn snapshot(&self) -> LayerMetrics {
        LayerMetrics {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            total_ms: self.total_ms.load(Ordering::Relaxed),
            last_error: self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Layer trait
// ---------------------------------------------------------------------------

/// One stage of the analysis pipeline.
#[async_trait]
pub trait Layer: Send + Sync {
    fn id(&self) -> LayerId;

    /// One-time setup (open stores, warm parsers). Default: nothing.
    async fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Whether this layer participates in the given query kind.
    fn applies_to(&self, request: &CoreRequest) -> bool;

    /// Run the stage, folding evidence into `acc`.
    async fn process(&self, ctx: &StageContext, acc: &mut LayerOutcome) -> CoreResult<()>;

    /// Release held resources. Default: nothing.
    async fn dispose(&self) {}

    fn is_healthy(&self) -> bool {
        true
    }

    fn metrics(&self) -> LayerMetrics;
}
