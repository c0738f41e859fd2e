//! Tracked market indices and their upstream identifiers.
//!
//! The server polls a fixed, closed set of indices. Each `Instrument` maps to
//! an `InstrumentSpec` carrying the identifiers the upstream APIs expect for
//! it: the exchange code and trading symbol used by the brokerage API, the
//! compact code used in the data vendor's quote paths, the numeric symbol
//! token, and the base price the simulator seeds from when no live value has
//! ever been observed. The table is fixed at startup and never mutated.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::FeedError;

/// Set of market indices tracked by the poller.
#[derive(
    Debug,
    Clone,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    EnumString,
    Hash,
    Eq,
    PartialEq,
)]
#[clap(rename_all = "lower")]
#[strum(ascii_case_insensitive)]
pub enum Instrument {
    /// NSE NIFTY 50 index.
    #[strum(serialize = "NIFTY 50")]
    Nifty50,
    /// BSE SENSEX index.
    #[strum(serialize = "SENSEX")]
    Sensex,
    /// NSE NIFTY BANK index.
    #[strum(serialize = "BANK NIFTY")]
    BankNifty,
}

impl Instrument {
    /// All instruments the server tracks, in display order.
    pub fn all() -> Vec<Instrument> {
        vec![Instrument::Nifty50, Instrument::Sensex, Instrument::BankNifty]
    }
}

/// Static identifiers an instrument carries for the upstream APIs.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    /// The instrument this spec belongs to.
    pub instrument: Instrument,
    /// Exchange code the brokerage API expects (e.g. `NSE`).
    pub exchange: &'static str,
    /// Trading symbol the brokerage API expects (may contain spaces).
    pub symbol: &'static str,
    /// Compact code used in the data vendor's URL paths.
    pub code: &'static str,
    /// Numeric symbol token the brokerage API keys quotes by.
    pub token: &'static str,
    /// Seed price the simulator uses before any live value is known.
    pub base_price: f64,
}

/// Read-only instrument-to-provider-identifier table.
const INSTRUMENT_SPECS: &[InstrumentSpec] = &[
    InstrumentSpec {
        instrument: Instrument::Nifty50,
        exchange: "NSE",
        symbol: "NIFTY 50",
        code: "NIFTY",
        token: "99926000",
        base_price: 23500.0,
    },
    InstrumentSpec {
        instrument: Instrument::Sensex,
        exchange: "BSE",
        symbol: "SENSEX",
        code: "SENSEX",
        token: "99919000",
        base_price: 78000.0,
    },
    InstrumentSpec {
        instrument: Instrument::BankNifty,
        exchange: "NSE",
        symbol: "NIFTY BANK",
        code: "BANKNIFTY",
        token: "99926009",
        base_price: 49000.0,
    },
];

/// Look up the upstream identifiers for an instrument.
pub fn spec_for(instrument: &Instrument) -> Result<&'static InstrumentSpec, FeedError> {
    INSTRUMENT_SPECS
        .iter()
        .find(|spec| spec.instrument == *instrument)
        .ok_or_else(|| FeedError::NotFound(format!("Instrument not mapped: {}", instrument)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn every_instrument_has_a_spec() {
        for instrument in Instrument::all() {
            let spec = spec_for(&instrument).unwrap();
            assert_eq!(spec.instrument, instrument);
            assert!(!spec.token.is_empty());
            assert!(spec.base_price > 0.0);
        }
    }

    #[test]
    fn display_names_match_the_upstream_table() {
        assert_eq!(Instrument::Nifty50.to_string(), "NIFTY 50");
        assert_eq!(Instrument::Sensex.to_string(), "SENSEX");
        assert_eq!(Instrument::BankNifty.to_string(), "BANK NIFTY");
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!(<Instrument as FromStr>::from_str("nifty 50").unwrap(), Instrument::Nifty50);
        assert_eq!(<Instrument as FromStr>::from_str("Bank Nifty").unwrap(), Instrument::BankNifty);
    }
}
