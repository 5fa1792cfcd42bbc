//! coinledger CLI — pipeline runs, per-stage commands, store status and queries.
//!
//! Commands:
//! - `run` — acquire → enrich → normalize in one go
//! - `acquire` / `enrich` / `normalize` — a single stage against the store
//! - `store status` — listing size and per-asset history coverage
//! - `query …` — read-only JSON views over the stored dataset
//! - `config` — print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use coinledger_core::data::circuit_breaker::DEFAULT_COOLDOWN;
use coinledger_core::data::{CircuitBreaker, CoinGeckoProvider, CsvStore, YahooProvider};
use coinledger_core::query::{asset_history, MarketQuery, DEFAULT_REFERENCE_ASSET};
use coinledger_runner::{
    acquire, enrich, normalize, AcquireReport, EnrichOutcome, EnrichReport, NormalizeReport, Pipeline,
    PipelineConfig, PipelineStage, PipelineSummary, ThreadPacer,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "coinledger",
    about = "coinledger — cryptocurrency universe and daily price history pipeline"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: acquire, enrich, normalize.
    Run {
        /// Number of listing candidates to collect.
        #[arg(long)]
        target_count: Option<usize>,

        /// Only enrich and normalize the first N stored assets.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip all politeness delays.
        #[arg(long, default_value_t = false)]
        no_delay: bool,
    },
    /// Fetch and filter the asset universe, replacing the listing snapshot.
    Acquire {
        #[arg(long)]
        target_count: Option<usize>,

        #[arg(long, default_value_t = false)]
        no_delay: bool,
    },
    /// Fetch daily history for the stored listing snapshot.
    Enrich {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = false)]
        no_delay: bool,
    },
    /// Gap-scan, clean and summarize stored history.
    Normalize {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Store inspection commands.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Read-only queries over the stored dataset (JSON output).
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Report listing size and per-asset history coverage.
    Status,
}

#[derive(Subcommand)]
enum QueryAction {
    /// Every stored asset, in rank order.
    List,
    /// The first N assets by market cap.
    Top {
        #[arg(default_value_t = 10)]
        n: usize,
    },
    /// Case-insensitive search over name and symbol.
    Search { query: String },
    /// One asset's listing row.
    Show { id: String },
    /// One asset's stored daily history.
    History { id: String },
    /// Aggregate market statistics.
    Stats {
        /// Asset used for dominance.
        #[arg(long, default_value = DEFAULT_REFERENCE_ASSET)]
        reference: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.store.root = dir.clone();
    }

    match cli.command {
        Commands::Run {
            target_count,
            limit,
            no_delay,
        } => {
            apply_overrides(&mut config, target_count, limit, no_delay)?;
            run_pipeline(&config)
        }
        Commands::Acquire {
            target_count,
            no_delay,
        } => {
            apply_overrides(&mut config, target_count, None, no_delay)?;
            run_acquire(&config)
        }
        Commands::Enrich { limit, no_delay } => {
            apply_overrides(&mut config, None, limit, no_delay)?;
            run_enrich(&config)
        }
        Commands::Normalize { limit } => {
            apply_overrides(&mut config, None, limit, false)?;
            run_normalize(&config)
        }
        Commands::Store { action } => match action {
            StoreAction::Status => run_store_status(&config),
        },
        Commands::Query { action } => run_query(&config, action),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(
    config: &mut PipelineConfig,
    target_count: Option<usize>,
    limit: Option<usize>,
    no_delay: bool,
) -> Result<()> {
    if let Some(n) = target_count {
        if n == 0 {
            bail!("--target-count must be greater than zero");
        }
        config.acquisition.target_count = n;
    }
    if let Some(n) = limit {
        if n == 0 {
            bail!("--limit must be greater than zero");
        }
        config.pipeline.asset_limit = Some(n);
    }
    if no_delay {
        config.zero_delays();
    }
    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn open_store(config: &PipelineConfig) -> CsvStore {
    CsvStore::new(config.store.root.clone())
}

/// Listing client; its breaker also opens after repeated failures.
fn listing_provider(config: &PipelineConfig) -> Result<CoinGeckoProvider> {
    let breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(CoinGeckoProvider::new(
        &config.providers.listing_base_url,
        breaker,
        config.request_timeout(),
    )?)
}

/// History client; its breaker opens only on 403.
fn history_provider(config: &PipelineConfig) -> Result<YahooProvider> {
    let breaker = Arc::new(CircuitBreaker::forbidden_only(DEFAULT_COOLDOWN));
    let provider = YahooProvider::new(breaker, config.request_timeout())?;
    Ok(match &config.providers.history_base_url {
        Some(url) => provider.with_base_url(url.as_str()),
        None => provider,
    })
}

/// Stored listing snapshot, capped by the configured asset limit.
fn stored_assets(config: &PipelineConfig, store: &CsvStore) -> Result<Vec<coinledger_core::domain::AssetListing>> {
    let mut assets = store.load_listings()?;
    if assets.is_empty() {
        bail!(
            "no listing snapshot at {}; run `coinledger acquire` first",
            store.listings_path().display()
        );
    }
    if let Some(limit) = config.pipeline.asset_limit {
        assets.truncate(limit);
    }
    Ok(assets)
}

// ── Pipeline and stages ─────────────────────────────────────────────

fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config);
    let listings = listing_provider(config)?;
    let history = history_provider(config)?;
    let opts = config.pipeline_options(today())?;

    info!(store = %store.root().display(), "starting pipeline");
    let summary = Pipeline::new(&listings, &history, &store, &ThreadPacer, opts).run()?;
    print_pipeline_summary(&summary);
    Ok(())
}

fn run_acquire(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config);
    let provider = listing_provider(config)?;
    let report = acquire(&provider, &store, &config.acquire_options()?, &ThreadPacer)
        .context("acquisition failed")?;
    print_acquire(&report);
    Ok(())
}

fn run_enrich(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config);
    let assets = stored_assets(config, &store)?;
    let provider = history_provider(config)?;
    let report = enrich(&provider, &store, &assets, &config.enrich_options(today())?, &ThreadPacer)
        .context("enrichment failed")?;
    print_enrich(&report);
    Ok(())
}

fn run_normalize(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config);
    let assets = stored_assets(config, &store)?;
    let report = normalize(&store, &assets, &config.normalize_options(today())).context("normalization failed")?;
    print_normalize(&report);
    println!("Report: {}", store.report_path().display());
    Ok(())
}

// ── Summaries ───────────────────────────────────────────────────────

fn print_acquire(report: &AcquireReport) {
    println!("=== Acquisition ===");
    println!("Pages fetched:  {}", report.pages_fetched);
    println!("Candidates:     {}", report.candidates);
    println!("Rejected:       {}", report.rejected);
    println!("Accepted:       {}", report.assets.len());
    if report.quality_warning {
        println!("WARNING: more than half of the candidates were rejected");
    }
    println!("Elapsed:        {:.1}s", report.elapsed.as_secs_f64());
}

fn print_enrich(report: &EnrichReport) {
    println!("=== Enrichment ===");
    println!("Successful:        {}", report.successful());
    println!("No symbol:         {}", report.no_symbol());
    println!("No data:           {}", report.no_data());
    println!("Insufficient data: {}", report.insufficient());
    println!("Provider blocked:  {}", report.unavailable());
    println!("Skipped (fresh):   {}", report.skipped_fresh);
    println!("Records stored:    {}", report.total_records());
    println!("Elapsed:           {:.1}s", report.elapsed.as_secs_f64());

    let failed: Vec<_> = report
        .results
        .iter()
        .filter(|r| !matches!(r.outcome, EnrichOutcome::Success { .. }))
        .collect();
    if !failed.is_empty() {
        println!();
        println!("{:<30} {:<22} {:<14}", "Asset", "Status", "Ticker");
        println!("{}", "-".repeat(66));
        for r in failed {
            println!(
                "{:<30} {:<22} {:<14}",
                r.asset_id,
                r.outcome.status(),
                r.outcome.symbol().unwrap_or("-")
            );
        }
    }
}

fn print_normalize(report: &NormalizeReport) {
    println!("=== Normalization ===");
    println!("Assets processed: {}", report.processed());
    println!("Cleaned:          {}", report.cleaned());
    println!("Good quality:     {}", report.good_quality());
    println!("Elapsed:          {:.1}s", report.elapsed.as_secs_f64());
}

fn print_pipeline_summary(summary: &PipelineSummary) {
    if let Some(r) = &summary.acquire {
        print_acquire(r);
        println!();
    }
    if let Some(r) = &summary.enrich {
        print_enrich(r);
        println!();
    }
    if let Some(r) = &summary.normalize {
        print_normalize(r);
        println!();
    }

    println!("=== Pipeline ===");
    for stage in [PipelineStage::Acquire, PipelineStage::Enrich, PipelineStage::Normalize] {
        match summary.stage_elapsed(stage) {
            Some(elapsed) => println!("{:<10} {:>8.1}s", stage, elapsed.as_secs_f64()),
            None => println!("{:<10} {:>9}", stage, "skipped"),
        }
    }
    println!("Total:     {:>8.1}s", summary.total_elapsed.as_secs_f64());
    println!("Assets acquired:   {}", summary.assets_acquired());
    println!("Assets processed:  {}", summary.assets_processed());
    println!("Throughput:        {:.2} assets/s", summary.throughput());
    println!("Success rate:      {:.1}%", summary.success_rate());
    if let Some(reason) = summary.halted {
        println!("Stopped early: {reason}");
    }
}

// ── Store status ────────────────────────────────────────────────────

fn run_store_status(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config);
    if !store.root().exists() {
        println!("Store directory does not exist: {}", store.root().display());
        return Ok(());
    }

    let listings = store.load_listings()?;
    let ids = store.history_ids()?;

    println!("Store: {}", store.root().display());
    println!("Listed assets: {}", listings.len());
    println!("Assets with history: {}", ids.len());
    if ids.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<30} {:<26} {:>8} {:>7}", "Asset", "Date Range", "Records", "Years");
    println!("{}", "-".repeat(74));
    for id in &ids {
        match store.history_meta(id) {
            Some(meta) => println!(
                "{:<30} {:<26} {:>8} {:>7.1}",
                id,
                format!("{} to {}", meta.start_date, meta.end_date),
                meta.record_count,
                meta.span_years()
            ),
            None => println!("{:<30} {:<26} {:>8} {:>7}", id, "(no meta)", "-", "-"),
        }
    }
    Ok(())
}

// ── Queries ─────────────────────────────────────────────────────────

fn run_query(config: &PipelineConfig, action: QueryAction) -> Result<()> {
    let store = open_store(config);
    let query = MarketQuery::load(&store)?;

    let output = match action {
        QueryAction::List => serde_json::to_string_pretty(query.all())?,
        QueryAction::Top { n } => serde_json::to_string_pretty(query.top(n))?,
        QueryAction::Search { query: q } => {
            let hits = query.search(&q);
            serde_json::to_string_pretty(&json!({
                "query": q,
                "count": hits.len(),
                "results": hits,
            }))?
        }
        QueryAction::Show { id } => match query.detail(&id) {
            Some(asset) => serde_json::to_string_pretty(asset)?,
            None => bail!("asset '{id}' not found"),
        },
        QueryAction::History { id } => match asset_history(&store, &id)? {
            Some(rows) => serde_json::to_string_pretty(&json!({
                "asset_id": id,
                "count": rows.len(),
                "history": rows,
            }))?,
            None => bail!("no history stored for '{id}'"),
        },
        QueryAction::Stats { reference } => serde_json::to_string_pretty(&query.stats(&reference))?,
    };

    println!("{output}");
    Ok(())
}
