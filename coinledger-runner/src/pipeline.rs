//! Pipeline orchestrator: ACQUIRE → ENRICH → NORMALIZE → DONE.
//!
//! Stages run strictly in order and hand off through the store: the
//! listing snapshot is re-read before enrichment and normalization. An
//! empty universe or an enrichment pass with no successes ends the run
//! early; that is a normal outcome, not an error.

use crate::acquire::{acquire, AcquireOptions, AcquireReport};
use crate::enrich::{enrich, EnrichOptions, EnrichReport};
use crate::error::{PipelineError, StageError};
use crate::normalize::{normalize, NormalizeOptions, NormalizeReport};
use crate::pacing::{Pacer, PauseReason};
use coinledger_core::data::{CsvStore, HistoryProvider, ListingProvider};
use coinledger_core::domain::AssetListing;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Acquire,
    Enrich,
    Normalize,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PipelineStage::Acquire => "acquire",
            PipelineStage::Enrich => "enrich",
            PipelineStage::Normalize => "normalize",
            PipelineStage::Done => "done",
        })
    }
}

/// Why a run reached DONE before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    EmptyUniverse,
    NoSuccessfulEnrichment,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            HaltReason::EmptyUniverse => "no valid assets were acquired",
            HaltReason::NoSuccessfulEnrichment => "no asset was enriched successfully",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub acquire: AcquireOptions,
    pub enrich: EnrichOptions,
    pub normalize: NormalizeOptions,
    pub stage_delay: Duration,
    /// Cap on assets handed to enrichment and normalization.
    pub asset_limit: Option<usize>,
}

/// Outcome of one run. Reporting only; nothing here drives control flow.
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub acquire: Option<AcquireReport>,
    pub enrich: Option<EnrichReport>,
    pub normalize: Option<NormalizeReport>,
    pub halted: Option<HaltReason>,
    pub total_elapsed: Duration,
}

impl PipelineSummary {
    pub fn assets_acquired(&self) -> usize {
        self.acquire.as_ref().map_or(0, |r| r.assets.len())
    }

    /// Assets that went through enrichment, fresh skips included.
    pub fn assets_processed(&self) -> usize {
        self.enrich
            .as_ref()
            .map_or(0, |r| r.results.len() + r.skipped_fresh)
    }

    pub fn assets_normalized(&self) -> usize {
        self.normalize.as_ref().map_or(0, NormalizeReport::processed)
    }

    /// Assets processed per second of total run time.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_elapsed.as_secs_f64();
        if secs > 0.0 {
            self.assets_processed() as f64 / secs
        } else {
            0.0
        }
    }

    /// Percentage of attempted enrichments that succeeded.
    pub fn success_rate(&self) -> f64 {
        match &self.enrich {
            Some(r) if !r.results.is_empty() => r.successful() as f64 / r.results.len() as f64 * 100.0,
            _ => 0.0,
        }
    }

    pub fn stage_elapsed(&self, stage: PipelineStage) -> Option<Duration> {
        match stage {
            PipelineStage::Acquire => self.acquire.as_ref().map(|r| r.elapsed),
            PipelineStage::Enrich => self.enrich.as_ref().map(|r| r.elapsed),
            PipelineStage::Normalize => self.normalize.as_ref().map(|r| r.elapsed),
            PipelineStage::Done => None,
        }
    }
}

pub struct Pipeline<'a> {
    listings: &'a dyn ListingProvider,
    history: &'a dyn HistoryProvider,
    store: &'a CsvStore,
    pacer: &'a dyn Pacer,
    opts: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        listings: &'a dyn ListingProvider,
        history: &'a dyn HistoryProvider,
        store: &'a CsvStore,
        pacer: &'a dyn Pacer,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            listings,
            history,
            store,
            pacer,
            opts,
        }
    }

    /// Current listing snapshot, capped by `asset_limit`.
    fn stored_assets(&self) -> Result<Vec<AssetListing>, StageError> {
        let mut assets = self.store.load_listings()?;
        if let Some(limit) = self.opts.asset_limit {
            assets.truncate(limit);
        }
        Ok(assets)
    }

    pub fn run(&self) -> Result<PipelineSummary, PipelineError> {
        let start = Instant::now();
        let mut summary = PipelineSummary::default();
        let mut stage = PipelineStage::Acquire;

        while stage != PipelineStage::Done {
            info!(%stage, "stage starting");
            let fail = move |source: StageError| PipelineError::Stage { stage, source };

            stage = match stage {
                PipelineStage::Acquire => {
                    let report = acquire(self.listings, self.store, &self.opts.acquire, self.pacer).map_err(fail)?;
                    let empty = report.is_empty();
                    summary.acquire = Some(report);
                    if empty {
                        summary.halted = Some(HaltReason::EmptyUniverse);
                        PipelineStage::Done
                    } else {
                        self.pacer.pause(PauseReason::Stage, self.opts.stage_delay);
                        PipelineStage::Enrich
                    }
                }
                PipelineStage::Enrich => {
                    let assets = self.stored_assets().map_err(fail)?;
                    let report =
                        enrich(self.history, self.store, &assets, &self.opts.enrich, self.pacer).map_err(fail)?;
                    let successes = report.successful();
                    summary.enrich = Some(report);
                    if successes == 0 {
                        summary.halted = Some(HaltReason::NoSuccessfulEnrichment);
                        PipelineStage::Done
                    } else {
                        self.pacer.pause(PauseReason::Stage, self.opts.stage_delay);
                        PipelineStage::Normalize
                    }
                }
                PipelineStage::Normalize => {
                    let assets = self.stored_assets().map_err(fail)?;
                    summary.normalize = Some(normalize(self.store, &assets, &self.opts.normalize).map_err(fail)?);
                    PipelineStage::Done
                }
                PipelineStage::Done => PipelineStage::Done,
            };
        }

        summary.total_elapsed = start.elapsed();
        match summary.halted {
            Some(reason) => warn!(%reason, "pipeline stopped early"),
            None => info!(
                acquired = summary.assets_acquired(),
                normalized = summary.assets_normalized(),
                success_rate = summary.success_rate(),
                elapsed_secs = summary.total_elapsed.as_secs_f64(),
                "pipeline complete"
            ),
        }
        Ok(summary)
    }
}
