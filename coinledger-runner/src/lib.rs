//! coinledger runner — the three pipeline stages and their orchestrator.
//!
//! This crate builds on `coinledger-core` to provide:
//! - Acquisition: paginated listing fetch, validity filter, snapshot write
//! - Enrichment: symbol resolution, history fetch, sufficiency check
//! - Normalization: gap detection, cleaning, statistics report
//! - `Pipeline`, the ACQUIRE → ENRICH → NORMALIZE state machine
//! - TOML configuration and the `Pacer` seam for politeness delays

pub mod acquire;
pub mod config;
pub mod enrich;
pub mod error;
pub mod normalize;
pub mod pacing;
pub mod pipeline;
pub mod symbols;

pub use acquire::{acquire, filter_valid, AcquireOptions, AcquireReport, FilterOutcome, RejectReason, ValidityThresholds};
pub use config::{ConfigError, PipelineConfig};
pub use enrich::{
    enrich, is_sufficient, EnrichOptions, EnrichOutcome, EnrichReport, EnrichResult, EnrichStatus, Sufficiency,
};
pub use error::{PipelineError, StageError};
pub use normalize::{
    clean_history, compute_stats, detect_gaps, normalize, DataQuality, GapReport, GapScan, HistoryStats,
    NormalizeOptions, NormalizeReport, ReportRow,
};
pub use pacing::{Pacer, PauseReason, ThreadPacer};
pub use pipeline::{HaltReason, Pipeline, PipelineOptions, PipelineStage, PipelineSummary};
pub use symbols::{candidate_symbols, resolve_symbol, SymbolOverrides};
