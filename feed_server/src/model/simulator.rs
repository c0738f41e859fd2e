//! Random-walk price fallback for upstream outages.
//!
//! When the upstream cannot be reached, the poller keeps the API responsive
//! by applying a small multiplicative random walk to the last known price of
//! each instrument instead of leaving it frozen. The first time a symbol has
//! no prior price at all, it is seeded from the instrument's configured base
//! price; from then on the walk drifts by at most the configured volatility
//! fraction per tick. Change fields are tracked against the seeded open, so
//! the fabricated series stays internally consistent.

use chrono::Utc;
use rand::Rng;

use crate::model::quote::IndexQuote;

/// Per-tick volatility fraction used when none is configured.
pub const DEFAULT_VOLATILITY: f64 = 0.0003;

/// Multiplicative random-walk generator for fallback prices.
#[derive(Debug, Clone)]
pub struct PriceSimulator {
    volatility: f64,
}

impl PriceSimulator {
    /// Create a simulator with the given per-tick volatility fraction.
    pub fn new(volatility: f64) -> Self {
        PriceSimulator { volatility }
    }

    /// Advance a quote by one simulated tick.
    ///
    /// - quote: cached entry to mutate in place.
    /// - base_price: seed used once, when the quote has never held a price.
    pub fn step(&self, quote: &mut IndexQuote, base_price: f64) {
        if quote.ltp == 0.0 {
            quote.ltp = base_price;
            quote.open = base_price;
        }

        let mut rng = rand::rng();
        let movement: f64 = rng.random_range(-1.0..1.0) * self.volatility;
        quote.ltp = (quote.ltp * (1.0 + movement)).max(0.01);

        let change = quote.ltp - quote.open;
        quote.change = change;
        quote.change_pct = if quote.open != 0.0 {
            change / quote.open * 100.0
        } else {
            0.0
        };
        quote.timestamp = Utc::now().timestamp_millis() as u64;
    }
}

impl Default for PriceSimulator {
    fn default() -> Self {
        PriceSimulator::new(DEFAULT_VOLATILITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_seeds_the_base_price_once() {
        let simulator = PriceSimulator::new(DEFAULT_VOLATILITY);
        let mut quote = IndexQuote::default();

        simulator.step(&mut quote, 23500.0);
        assert_eq!(quote.open, 23500.0);
        assert!((quote.ltp - 23500.0).abs() <= 23500.0 * DEFAULT_VOLATILITY);

        // Later ticks must not re-seed.
        let drifted = quote.ltp;
        simulator.step(&mut quote, 99999.0);
        assert_eq!(quote.open, 23500.0);
        assert!((quote.ltp - drifted).abs() <= drifted * DEFAULT_VOLATILITY);
    }

    #[test]
    fn drift_is_bounded_by_volatility_per_tick() {
        let simulator = PriceSimulator::new(0.01);
        let mut quote = IndexQuote::default();
        simulator.step(&mut quote, 1000.0);

        for _ in 0..200 {
            let before = quote.ltp;
            simulator.step(&mut quote, 1000.0);
            assert!((quote.ltp - before).abs() <= before * 0.01);
        }
    }

    #[test]
    fn change_tracks_the_seeded_open() {
        let simulator = PriceSimulator::new(0.01);
        let mut quote = IndexQuote::default();
        simulator.step(&mut quote, 500.0);
        simulator.step(&mut quote, 500.0);

        let expected = quote.ltp - 500.0;
        assert!((quote.change - expected).abs() < 1e-9);
        assert!((quote.change_pct - expected / 500.0 * 100.0).abs() < 1e-9);
    }
}
