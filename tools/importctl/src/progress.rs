//! Progress reporting for long-running operator workflows
//!
//! Counters emit an event every N processed documents and once per step.
//! Emission order equals processing order; consumers treat the stream as
//! eventually consistent.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How often the shared counter emits, in documents
pub const PROGRESS_EVERY: usize = 100;

/// One progress emission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 0..=100 when the total is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

/// Cooperative cancellation, polled at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Shared counter for one phase of work
pub(crate) struct PhaseCounter {
    phase: String,
    total: Option<usize>,
    processed: usize,
    succeeded: usize,
    failed: usize,
}

impl PhaseCounter {
    pub fn new(phase: impl Into<String>, total: Option<usize>) -> Self {
        Self {
            phase: phase.into(),
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
        self.maybe_emit();
    }

    pub fn failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
        self.maybe_emit();
    }

    pub fn event(&self) -> ProgressEvent {
        ProgressEvent {
            phase: self.phase.clone(),
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            percent: self.total.map(|total| {
                if total == 0 {
                    100
                } else {
                    ((self.processed * 100) / total).min(100) as u8
                }
            }),
        }
    }

    fn maybe_emit(&self) {
        if self.processed % PROGRESS_EVERY == 0 {
            let event = self.event();
            tracing::info!(
                phase = %event.phase,
                processed = event.processed,
                succeeded = event.succeeded,
                failed = event.failed,
                "progress"
            );
        }
    }
}
