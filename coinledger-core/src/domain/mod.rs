//! Domain types for coinledger

pub mod asset;
pub mod history;

pub use asset::AssetListing;
pub use history::{HistoricalRecord, PriceBar};

/// Asset id type alias (provider-stable key such as `bitcoin`).
pub type AssetId = String;
