//! Pipeline configuration, loaded from TOML.
//!
//! Every section and field is optional; omitted values take the defaults
//! below. The CLI layers its flags on top of the loaded file.

use crate::acquire::{AcquireOptions, ValidityThresholds};
use crate::enrich::{EnrichOptions, Sufficiency};
use crate::normalize::{NormalizeOptions, MAX_EVALUATION_WINDOW_YEARS};
use crate::pipeline::PipelineOptions;
use crate::symbols::{default_override_map, SymbolOverrides};
use chrono::NaiveDate;
use coinledger_core::data::coingecko;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub providers: ProviderConfig,
    pub acquisition: AcquisitionConfig,
    pub enrichment: EnrichmentConfig,
    pub normalization: NormalizationConfig,
    pub pipeline: RunConfig,
    /// Listing symbol → history ticker, tried before generated candidates.
    pub symbol_overrides: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            providers: ProviderConfig::default(),
            acquisition: AcquisitionConfig::default(),
            enrichment: EnrichmentConfig::default(),
            normalization: NormalizationConfig::default(),
            pipeline: RunConfig::default(),
            symbol_overrides: default_override_map(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("data") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub listing_base_url: String,
    /// Chart endpoint override; the public Yahoo endpoint when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            listing_base_url: coingecko::DEFAULT_BASE_URL.to_string(),
            history_base_url: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub target_count: usize,
    pub page_size: u32,
    pub page_delay_secs: f64,
    pub min_market_cap: f64,
    pub min_volume: f64,
    pub quality_warning_ratio: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            target_count: 1000,
            page_size: 250,
            page_delay_secs: 1.0,
            min_market_cap: 100_000.0,
            min_volume: 1_000.0,
            quality_warning_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
    pub batch_delay_secs: f64,
    pub asset_delay_secs: f64,
    pub skip_if_updated_within_days: i64,
    pub probe_days: u32,
    pub lookback_years: u32,
    pub min_span_years: f64,
    pub min_records: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_secs: 15.0,
            asset_delay_secs: 3.0,
            skip_if_updated_within_days: 7,
            probe_days: 7,
            lookback_years: 10,
            min_span_years: 1.0,
            min_records: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub evaluation_window_years: u32,
    pub min_characterized_years: f64,
    pub good_quality_min_records: usize,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            evaluation_window_years: 10,
            min_characterized_years: 8.0,
            good_quality_min_records: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub stage_delay_secs: f64,
    /// Cap on assets handed to enrichment and normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stage_delay_secs: 2.0,
            asset_limit: None,
        }
    }
}

fn delay(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{secs}: {e}"),
    })
}

fn positive(field: &'static str, ok: bool) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        })
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("acquisition.target_count", self.acquisition.target_count > 0)?;
        positive("acquisition.page_size", self.acquisition.page_size > 0)?;
        positive("enrichment.batch_size", self.enrichment.batch_size > 0)?;
        positive("enrichment.probe_days", self.enrichment.probe_days > 0)?;
        positive("enrichment.lookback_years", self.enrichment.lookback_years > 0)?;
        positive("normalization.evaluation_window_years", self.normalization.evaluation_window_years > 0)?;
        if self.normalization.evaluation_window_years > MAX_EVALUATION_WINDOW_YEARS {
            return Err(ConfigError::Invalid {
                field: "normalization.evaluation_window_years",
                reason: format!("must be at most {MAX_EVALUATION_WINDOW_YEARS}"),
            });
        }
        positive("providers.request_timeout_secs", self.providers.request_timeout_secs > 0)?;
        if let Some(limit) = self.pipeline.asset_limit {
            positive("pipeline.asset_limit", limit > 0)?;
        }
        if !(0.0..=1.0).contains(&self.acquisition.quality_warning_ratio) {
            return Err(ConfigError::Invalid {
                field: "acquisition.quality_warning_ratio",
                reason: format!("{} is outside 0..=1", self.acquisition.quality_warning_ratio),
            });
        }
        delay("acquisition.page_delay_secs", self.acquisition.page_delay_secs)?;
        delay("enrichment.batch_delay_secs", self.enrichment.batch_delay_secs)?;
        delay("enrichment.asset_delay_secs", self.enrichment.asset_delay_secs)?;
        delay("pipeline.stage_delay_secs", self.pipeline.stage_delay_secs)?;
        Ok(())
    }

    /// Zero every politeness delay (offline runs, local stubs).
    pub fn zero_delays(&mut self) {
        self.acquisition.page_delay_secs = 0.0;
        self.enrichment.batch_delay_secs = 0.0;
        self.enrichment.asset_delay_secs = 0.0;
        self.pipeline.stage_delay_secs = 0.0;
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.request_timeout_secs)
    }

    pub fn stage_delay(&self) -> Result<Duration, ConfigError> {
        delay("pipeline.stage_delay_secs", self.pipeline.stage_delay_secs)
    }

    pub fn acquire_options(&self) -> Result<AcquireOptions, ConfigError> {
        let a = &self.acquisition;
        Ok(AcquireOptions {
            target_count: a.target_count,
            page_size: a.page_size,
            page_delay: delay("acquisition.page_delay_secs", a.page_delay_secs)?,
            thresholds: ValidityThresholds {
                min_market_cap: a.min_market_cap,
                min_volume: a.min_volume,
            },
            quality_warning_ratio: a.quality_warning_ratio,
        })
    }

    pub fn enrich_options(&self, today: NaiveDate) -> Result<EnrichOptions, ConfigError> {
        let e = &self.enrichment;
        Ok(EnrichOptions {
            batch_size: e.batch_size,
            batch_delay: delay("enrichment.batch_delay_secs", e.batch_delay_secs)?,
            asset_delay: delay("enrichment.asset_delay_secs", e.asset_delay_secs)?,
            skip_if_updated_within_days: e.skip_if_updated_within_days,
            probe_days: e.probe_days,
            lookback_years: e.lookback_years,
            sufficiency: Sufficiency {
                min_span_years: e.min_span_years,
                min_records: e.min_records,
            },
            today,
            overrides: SymbolOverrides::new(self.symbol_overrides.clone()),
        })
    }

    pub fn normalize_options(&self, today: NaiveDate) -> NormalizeOptions {
        let n = &self.normalization;
        NormalizeOptions {
            evaluation_window_years: n.evaluation_window_years,
            min_characterized_years: n.min_characterized_years,
            good_quality_min_records: n.good_quality_min_records,
            today,
        }
    }

    /// Options for a full pipeline run as of `today`.
    pub fn pipeline_options(&self, today: NaiveDate) -> Result<PipelineOptions, ConfigError> {
        Ok(PipelineOptions {
            acquire: self.acquire_options()?,
            enrich: self.enrich_options(today)?,
            normalize: self.normalize_options(today),
            stage_delay: self.stage_delay()?,
            asset_limit: self.pipeline.asset_limit,
        })
    }
}
