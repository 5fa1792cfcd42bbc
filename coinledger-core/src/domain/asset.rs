//! AssetListing — one row of the listing snapshot.

use serde::{Deserialize, Serialize};

/// A tracked asset together with its latest market statistics.
///
/// Numeric fields are optional because the listing provider returns `null`
/// for thinly traded or freshly listed assets. The same struct is used for
/// provider candidates and for rows of the stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetListing {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
}

impl AssetListing {
    /// Symbol folded to lowercase, the key used for snapshot uniqueness.
    pub fn symbol_key(&self) -> String {
        self.symbol.to_lowercase()
    }

    /// Case-insensitive substring match over name and symbol.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.name.to_lowercase().contains(needle_lower)
            || self.symbol.to_lowercase().contains(needle_lower)
    }
}
