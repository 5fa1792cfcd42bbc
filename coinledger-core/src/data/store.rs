//! Flat-file tabular store keyed by asset id.
//!
//! Layout under the store root:
//! - `raw/listings.csv` — the listing snapshot, replaced wholesale
//! - `historical/{id}.csv` — one daily history table per asset
//! - `historical/{id}.meta.json` — sidecar (date range, row count, hash, source)
//! - `processed/normalization_report.csv` — aggregate normalization report
//!
//! Every table write goes to `{file}.tmp` first and is renamed into place, so
//! an interrupted run leaves either the old table or the new one, never a
//! half-written file.

use crate::domain::{AssetListing, HistoricalRecord};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("meta sidecar for '{asset_id}': {reason}")]
    Meta { asset_id: String, reason: String },

    #[error("invalid asset id '{0}'")]
    InvalidAssetId(String),

    #[error("refusing to write an empty {0} table")]
    EmptyWrite(&'static str),
}

/// Sidecar describing one asset's stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub asset_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub record_count: usize,
    pub data_hash: String,
    pub source: String,
    pub written_at: chrono::NaiveDateTime,
}

impl HistoryMeta {
    /// Covered span in years (365.25-day years).
    pub fn span_years(&self) -> f64 {
        (self.end_date - self.start_date).num_days() as f64 / 365.25
    }
}

/// The CSV store.
#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn listings_path(&self) -> PathBuf {
        self.root.join("raw").join("listings.csv")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("historical")
    }

    pub fn history_path(&self, asset_id: &str) -> PathBuf {
        self.history_dir().join(format!("{asset_id}.csv"))
    }

    fn meta_path(&self, asset_id: &str) -> PathBuf {
        self.history_dir().join(format!("{asset_id}.meta.json"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("processed").join("normalization_report.csv")
    }

    // ── Listing snapshot ────────────────────────────────────────────

    /// Replace the listing snapshot.
    pub fn write_listings(&self, listings: &[AssetListing]) -> Result<(), StoreError> {
        if listings.is_empty() {
            return Err(StoreError::EmptyWrite("listing"));
        }
        write_table(&self.listings_path(), listings)
    }

    /// Load the listing snapshot in stored (rank) order. Missing → empty.
    pub fn load_listings(&self) -> Result<Vec<AssetListing>, StoreError> {
        Ok(read_table(&self.listings_path())?.unwrap_or_default())
    }

    // ── Per-asset history ───────────────────────────────────────────

    /// Load an asset's history table as stored (no sorting or cleaning).
    ///
    /// Returns `Ok(None)` when the asset has no history table.
    pub fn load_history(&self, asset_id: &str) -> Result<Option<Vec<HistoricalRecord>>, StoreError> {
        validate_asset_id(asset_id)?;
        read_table(&self.history_path(asset_id))
    }

    /// Latest stored date for an asset, or `None` when it has no rows.
    pub fn latest_date(&self, asset_id: &str) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .load_history(asset_id)?
            .and_then(|rows| rows.iter().map(|r| r.date).max()))
    }

    /// Replace an asset's history table wholesale and refresh its sidecar.
    pub fn overwrite_history(
        &self,
        asset_id: &str,
        rows: &[HistoricalRecord],
    ) -> Result<(), StoreError> {
        validate_asset_id(asset_id)?;
        write_table(&self.history_path(asset_id), rows)?;
        self.write_meta(asset_id, rows)?;
        debug!(asset_id, rows = rows.len(), "history table written");
        Ok(())
    }

    /// Merge new rows into an asset's history: existing dates win, the
    /// result is sorted ascending by date. Returns the merged row count.
    pub fn append_merge_history(
        &self,
        asset_id: &str,
        new_rows: &[HistoricalRecord],
    ) -> Result<usize, StoreError> {
        if new_rows.is_empty() {
            return Ok(self.load_history(asset_id)?.map_or(0, |rows| rows.len()));
        }

        let existing = self.load_history(asset_id)?.unwrap_or_default();
        let mut by_date: BTreeMap<NaiveDate, HistoricalRecord> = BTreeMap::new();
        for row in existing.into_iter().chain(new_rows.iter().cloned()) {
            by_date.entry(row.date).or_insert(row);
        }

        let merged: Vec<HistoricalRecord> = by_date.into_values().collect();
        self.overwrite_history(asset_id, &merged)?;
        Ok(merged.len())
    }

    /// Read an asset's sidecar, if present and readable.
    pub fn history_meta(&self, asset_id: &str) -> Option<HistoryMeta> {
        let content = fs::read_to_string(self.meta_path(asset_id)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Ids of every asset with a history table, sorted.
    pub fn history_ids(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.history_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn write_meta(&self, asset_id: &str, rows: &[HistoricalRecord]) -> Result<(), StoreError> {
        let meta_path = self.meta_path(asset_id);
        let (Some(first), Some(last)) = (rows.iter().map(|r| r.date).min(), rows.iter().map(|r| r.date).max())
        else {
            // No rows, no range to describe
            return match fs::remove_file(&meta_path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::Io {
                    path: meta_path,
                    source: e,
                }),
                _ => Ok(()),
            };
        };

        let meta_err = |reason: String| StoreError::Meta {
            asset_id: asset_id.to_string(),
            reason,
        };

        let meta = HistoryMeta {
            asset_id: asset_id.to_string(),
            start_date: first,
            end_date: last,
            record_count: rows.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(rows).map_err(|e| meta_err(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: rows.last().map(|r| r.source.clone()).unwrap_or_default(),
            written_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| meta_err(format!("serialization: {e}")))?;
        atomic_write(&meta_path, json.as_bytes())
    }

    // ── Normalization report ────────────────────────────────────────

    /// Replace the aggregate normalization report.
    pub fn write_report<R: Serialize>(&self, rows: &[R]) -> Result<(), StoreError> {
        write_table(&self.report_path(), rows)
    }

    pub fn load_report<R: DeserializeOwned>(&self) -> Result<Vec<R>, StoreError> {
        Ok(read_table(&self.report_path())?.unwrap_or_default())
    }
}

/// Asset ids become file names; refuse anything that could escape the store.
fn validate_asset_id(asset_id: &str) -> Result<(), StoreError> {
    let bad = asset_id.is_empty()
        || asset_id.starts_with('.')
        || asset_id.contains(['/', '\\'])
        || asset_id.contains("..");
    if bad {
        return Err(StoreError::InvalidAssetId(asset_id.to_string()));
    }
    Ok(())
}

// ── CSV helpers ─────────────────────────────────────────────────────

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn rename_into_place(tmp: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp, path).map_err(|source| {
        let _ = fs::remove_file(tmp);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    rename_into_place(&tmp, path)
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let csv_err = |source| StoreError::Csv {
        path: tmp.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);

    rename_into_place(&tmp, path)
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let csv_err = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(csv_err)?;
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(date: NaiveDate, close: f64) -> HistoricalRecord {
        HistoricalRecord {
            date,
            open: Some(close - 1.0),
            high: Some(close + 2.0),
            low: Some(close - 2.0),
            close: Some(close),
            volume: Some(1_000.0),
            price: None,
            source: "yahoo_10y".into(),
        }
    }

    fn listing(id: &str, symbol: &str) -> AssetListing {
        AssetListing {
            id: id.into(),
            symbol: symbol.into(),
            name: id.to_uppercase(),
            current_price: Some(1.0),
            market_cap: Some(1e9),
            total_volume: None,
            price_change_percentage_24h: Some(-2.5),
        }
    }

    #[test]
    fn listings_roundtrip_preserves_order_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        let rows = vec![listing("bitcoin", "btc"), listing("ethereum", "eth")];
        store.write_listings(&rows).unwrap();

        let loaded = store.load_listings().unwrap();
        assert_eq!(loaded, rows);
        assert_eq!(loaded[0].total_volume, None);
    }

    #[test]
    fn empty_listing_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        assert!(matches!(
            store.write_listings(&[]),
            Err(StoreError::EmptyWrite("listing"))
        ));
        assert!(store.load_listings().unwrap().is_empty());
    }

    #[test]
    fn missing_history_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        assert!(store.load_history("bitcoin").unwrap().is_none());
        assert_eq!(store.latest_date("bitcoin").unwrap(), None);
    }

    #[test]
    fn overwrite_history_writes_table_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        let rows = vec![record(day(2024, 1, 2), 10.0), record(day(2024, 1, 1), 9.0)];
        store.overwrite_history("bitcoin", &rows).unwrap();

        assert_eq!(store.load_history("bitcoin").unwrap().unwrap(), rows);
        assert_eq!(store.latest_date("bitcoin").unwrap(), Some(day(2024, 1, 2)));

        let meta = store.history_meta("bitcoin").unwrap();
        assert_eq!(meta.start_date, day(2024, 1, 1));
        assert_eq!(meta.end_date, day(2024, 1, 2));
        assert_eq!(meta.record_count, 2);
        assert_eq!(meta.source, "yahoo_10y");
        assert!(!store.history_path("bitcoin").with_extension("csv.tmp").exists());
    }

    #[test]
    fn overwrite_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        store
            .overwrite_history("eth", &[record(day(2020, 1, 1), 1.0), record(day(2020, 1, 2), 2.0)])
            .unwrap();
        store.overwrite_history("eth", &[record(day(2021, 1, 1), 3.0)]).unwrap();

        let rows = store.load_history("eth").unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day(2021, 1, 1));
    }

    #[test]
    fn append_merge_dedupes_by_date_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        store
            .overwrite_history("sol", &[record(day(2024, 1, 3), 3.0), record(day(2024, 1, 1), 1.0)])
            .unwrap();
        let merged = store
            .append_merge_history("sol", &[record(day(2024, 1, 2), 2.0), record(day(2024, 1, 3), 99.0)])
            .unwrap();

        assert_eq!(merged, 3);
        let rows = store.load_history("sol").unwrap().unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2024, 1, 1), day(2024, 1, 2), day(2024, 1, 3)]);
        assert_eq!(rows[2].close, Some(3.0));
    }

    #[test]
    fn append_merge_into_missing_table_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        let merged = store
            .append_merge_history("ada", &[record(day(2024, 2, 1), 0.5)])
            .unwrap();
        assert_eq!(merged, 1);
        assert_eq!(store.history_ids().unwrap(), vec!["ada".to_string()]);
    }

    #[test]
    fn history_ids_skip_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        store.overwrite_history("b", &[record(day(2024, 1, 1), 1.0)]).unwrap();
        store.overwrite_history("a", &[record(day(2024, 1, 1), 1.0)]).unwrap();
        assert_eq!(store.history_ids().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reads_tables_without_price_column() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        fs::create_dir_all(store.history_dir()).unwrap();
        fs::write(
            store.history_path("legacy"),
            "date,open,high,low,close,volume,source\n2024-01-01,1,2,0.5,1.5,10,yahoo_10_years\n",
        )
        .unwrap();

        let rows = store.load_history("legacy").unwrap().unwrap();
        assert_eq!(rows[0].price, None);
        assert_eq!(rows[0].close, Some(1.5));
    }

    #[test]
    fn malformed_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        fs::create_dir_all(store.history_dir()).unwrap();
        fs::write(store.history_path("bad"), "date,close\nnot-a-date,1\n").unwrap();
        assert!(matches!(store.load_history("bad"), Err(StoreError::Csv { .. })));
    }

    #[test]
    fn path_like_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        for id in ["", "../x", "a/b", ".hidden"] {
            assert!(matches!(
                store.load_history(id),
                Err(StoreError::InvalidAssetId(_))
            ));
        }
    }
}
