//! Quote data model and the in-memory quote table.
//!
//! An `IndexQuote` is the cached snapshot served to the frontend. It carries
//! the last traded price, the absolute and percent change against the
//! previous close, optional volume/open/high/low, and a millisecond UTC
//! timestamp. No history is kept: every poll cycle overwrites the previous
//! value in place. The `QuoteTable` always holds an entry for every
//! configured instrument, zero-valued until the first successful poll.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use feed_common::Instrument;
use serde::{Deserialize, Serialize};

/// Round a value to two decimal places, the precision served to clients.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Quote payload as returned by an upstream provider, before caching.
///
/// The brokerage API returns `ltp` and `close` and leaves the change fields
/// to us; the data vendor returns `change`/`change_percent` directly. Fields
/// absent from a provider's payload fall back to their zero defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamQuote {
    /// Last traded price.
    #[serde(default)]
    pub ltp: f64,
    /// Previous close, used to derive the change fields when present.
    #[serde(default)]
    pub close: f64,
    /// Absolute change, if the provider computes it for us.
    #[serde(default)]
    pub change: Option<f64>,
    /// Percent change, if the provider computes it for us.
    #[serde(default, rename = "change_percent")]
    pub change_pct: Option<f64>,
    /// Traded volume, where the provider reports one.
    #[serde(default)]
    pub volume: u64,
    /// Session open.
    #[serde(default)]
    pub open: f64,
    /// Session high.
    #[serde(default)]
    pub high: f64,
    /// Session low.
    #[serde(default)]
    pub low: f64,
}

/// Cached market snapshot for a single index, as served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuote {
    /// Last traded price, rounded to 2 decimals.
    pub ltp: f64,
    /// Absolute change against the previous close.
    pub change: f64,
    /// Percent change against the previous close.
    pub change_pct: f64,
    /// Traded volume (0 when the provider does not report one).
    pub volume: u64,
    /// Session open.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// UTC timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,
}

impl Default for IndexQuote {
    fn default() -> Self {
        IndexQuote {
            ltp: 0.0,
            change: 0.0,
            change_pct: 0.0,
            volume: 0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            timestamp: 0,
        }
    }
}

impl IndexQuote {
    /// Build a cached quote from an upstream payload.
    ///
    /// Missing change fields are derived as `ltp - close` and
    /// `change / close * 100`; a zero close yields a percent change of 0
    /// rather than a division error. Price and change fields are rounded to
    /// two decimals and the quote is stamped with the current time.
    pub fn from_upstream(upstream: &UpstreamQuote) -> Self {
        let change = upstream.change.unwrap_or(upstream.ltp - upstream.close);
        let change_pct = match upstream.change_pct {
            Some(pct) => pct,
            None if upstream.close != 0.0 => change / upstream.close * 100.0,
            None => 0.0,
        };

        IndexQuote {
            ltp: round2(upstream.ltp),
            change: round2(change),
            change_pct: round2(change_pct),
            volume: upstream.volume,
            open: upstream.open,
            high: upstream.high,
            low: upstream.low,
            timestamp: Utc::now().timestamp_millis() as u64,
        }
    }
}

/// In-memory mapping from instrument to its latest cached quote.
///
/// Not synchronized by itself; the server shares it as `Arc<Mutex<QuoteTable>>`.
#[derive(Debug)]
pub struct QuoteTable {
    quotes: HashMap<Instrument, IndexQuote>,
}

impl QuoteTable {
    /// Create a table with a zero-valued entry for every given instrument.
    pub fn new(instruments: &[Instrument]) -> Self {
        let quotes = instruments
            .iter()
            .map(|instrument| (instrument.clone(), IndexQuote::default()))
            .collect();
        QuoteTable { quotes }
    }

    /// Overwrite the cached quote for an instrument.
    pub fn update(&mut self, instrument: &Instrument, quote: IndexQuote) {
        self.quotes.insert(instrument.clone(), quote);
    }

    /// Read-only access to a single cached quote.
    pub fn get(&self, instrument: &Instrument) -> Option<&IndexQuote> {
        self.quotes.get(instrument)
    }

    /// Mutable access to a cached quote, inserting the zero default if the
    /// instrument was not seeded at construction.
    pub fn get_mut(&mut self, instrument: &Instrument) -> &mut IndexQuote {
        self.quotes.entry(instrument.clone()).or_default()
    }

    /// Copy of the table keyed by display name, for JSON responses.
    pub fn snapshot(&self) -> BTreeMap<String, IndexQuote> {
        self.quotes
            .iter()
            .map(|(instrument, quote)| (instrument.to_string(), quote.clone()))
            .collect()
    }

    /// Whether any instrument has seen a non-zero price yet.
    pub fn data_available(&self) -> bool {
        self.quotes.values().any(|quote| quote.ltp > 0.0)
    }

    /// Display names of all tracked instruments.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.quotes.keys().map(|i| i.to_string()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_fields_derive_from_close() {
        let upstream = UpstreamQuote {
            ltp: 100.0,
            close: 90.0,
            ..UpstreamQuote::default()
        };
        let quote = IndexQuote::from_upstream(&upstream);
        assert_eq!(quote.ltp, 100.0);
        assert_eq!(quote.change, 10.0);
        assert_eq!(quote.change_pct, 11.11);
    }

    #[test]
    fn zero_close_yields_zero_percent_change() {
        let upstream = UpstreamQuote {
            ltp: 50.0,
            close: 0.0,
            ..UpstreamQuote::default()
        };
        let quote = IndexQuote::from_upstream(&upstream);
        assert_eq!(quote.change, 50.0);
        assert_eq!(quote.change_pct, 0.0);
    }

    #[test]
    fn provider_supplied_change_fields_win() {
        let upstream = UpstreamQuote {
            ltp: 23567.256,
            change: Some(12.345),
            change_pct: Some(0.0525),
            volume: 1200,
            ..UpstreamQuote::default()
        };
        let quote = IndexQuote::from_upstream(&upstream);
        assert_eq!(quote.ltp, 23567.26);
        assert_eq!(quote.change, 12.35);
        assert_eq!(quote.change_pct, 0.05);
        assert_eq!(quote.volume, 1200);
    }

    #[test]
    fn unpolled_instruments_stay_at_the_zero_default() {
        let table = QuoteTable::new(&Instrument::all());
        for instrument in Instrument::all() {
            assert_eq!(table.get(&instrument), Some(&IndexQuote::default()));
        }
        assert!(!table.data_available());
    }

    #[test]
    fn snapshot_is_keyed_by_display_name() {
        let mut table = QuoteTable::new(&Instrument::all());
        let upstream = UpstreamQuote {
            ltp: 100.0,
            close: 90.0,
            ..UpstreamQuote::default()
        };
        table.update(&Instrument::Nifty50, IndexQuote::from_upstream(&upstream));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["NIFTY 50"].ltp, 100.0);
        assert_eq!(snapshot["SENSEX"].ltp, 0.0);
        assert!(table.data_available());
    }

    #[test]
    fn wire_field_names_match_the_frontend_contract() {
        let json = serde_json::to_value(IndexQuote::default()).unwrap();
        assert!(json.get("ltp").is_some());
        assert!(json.get("changePct").is_some());
        assert!(json.get("change_pct").is_none());
    }
}
