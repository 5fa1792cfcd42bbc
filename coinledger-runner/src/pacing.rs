//! Politeness delays.
//!
//! Every suspension point in the pipeline goes through a `Pacer` so the
//! schedule of pauses is observable in tests and the real sleeps live in one
//! place.

use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Why the pipeline is pausing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Before each listing page request.
    ListingPage,
    /// After an asset's history fetch.
    Asset,
    /// Between enrichment batches.
    Batch,
    /// Between pipeline stages.
    Stage,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PauseReason::ListingPage => "listing page",
            PauseReason::Asset => "asset",
            PauseReason::Batch => "batch",
            PauseReason::Stage => "stage",
        })
    }
}

pub trait Pacer {
    fn pause(&self, reason: PauseReason, duration: Duration);
}

/// Blocks the current thread for each pause. Zero-length pauses are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, reason: PauseReason, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!(%reason, secs = duration.as_secs_f64(), "pausing");
        std::thread::sleep(duration);
    }
}
