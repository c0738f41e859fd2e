//! Background quote poller.
//!
//! A single OS thread owns the polling loop. Each cycle it fetches the last
//! traded price for every configured instrument and overwrites the shared
//! quote table; a failed fetch leaves that instrument's stale value in place
//! and, when simulation is enabled, advances a random-walk price instead so
//! the API keeps answering during an outage.
//!
//! Failure policy: a cycle with at least one failure and no success bumps a
//! consecutive-failure counter; any success resets it. Once the counter
//! exceeds the threshold the poller re-runs the login flow and resumes on
//! success. Only when that re-authentication also fails — and simulation is
//! off — does the loop stop issuing upstream calls and exit.
//!
//! The loop is paced by `recv_timeout` on a shutdown channel, so it sleeps
//! the fixed interval between cycles but can be stopped promptly.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use feed_common::{Instrument, instruments};
use log::{error, info, warn};

use crate::model::quote::{IndexQuote, QuoteTable};
use crate::model::simulator::PriceSimulator;
use crate::provider::QuoteSource;

/// Tuning knobs the poller is started with.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Instruments fetched each cycle.
    pub instruments: Vec<Instrument>,
    /// Fixed interval between cycles.
    pub interval: Duration,
    /// Consecutive failed cycles tolerated before escalating.
    pub error_threshold: u32,
    /// Whether failed fetches fall back to simulated prices.
    pub simulate_on_failure: bool,
    /// Per-tick volatility fraction for the simulator.
    pub volatility: f64,
}

/// Handle to a running poller thread.
pub struct PollerHandle {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl PollerHandle {
    /// Whether the poller thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop to stop and wait for the thread to exit.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

/// The polling loop state, moved onto its own thread by [`Poller::start`].
pub struct Poller {
    provider: Arc<dyn QuoteSource>,
    table: Arc<Mutex<QuoteTable>>,
    settings: PollerSettings,
    simulator: PriceSimulator,
    consecutive_failures: u32,
}

impl Poller {
    /// Build a poller over the shared table and provider.
    pub fn new(
        provider: Arc<dyn QuoteSource>,
        table: Arc<Mutex<QuoteTable>>,
        settings: PollerSettings,
    ) -> Self {
        let simulator = PriceSimulator::new(settings.volatility);
        Poller {
            provider,
            table,
            settings,
            simulator,
            consecutive_failures: 0,
        }
    }

    /// Spawn the polling thread and return its handle.
    pub fn start(self) -> PollerHandle {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::spawn(move || self.run(stop_rx));
        PollerHandle { stop_tx, handle }
    }

    fn run(mut self, stop_rx: Receiver<()>) {
        info!(
            "Quote poller started on {} (interval {:?}, thread {:?})",
            self.provider.name(),
            self.settings.interval,
            thread::current().id()
        );
        loop {
            match stop_rx.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if !self.tick() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("Quote poller stopping");
                    break;
                }
            }
        }
    }

    /// Run one poll cycle. Returns `false` when the loop must terminate.
    pub(crate) fn tick(&mut self) -> bool {
        let mut any_success = false;
        let mut any_failure = false;

        for instrument in &self.settings.instruments {
            let spec = match instruments::spec_for(instrument) {
                Ok(spec) => spec,
                Err(e) => {
                    error!("{}", e);
                    continue;
                }
            };

            match self.provider.fetch_index_quote(spec) {
                Ok(upstream) => {
                    any_success = true;
                    let quote = IndexQuote::from_upstream(&upstream);
                    info!(
                        "{}: {:.2} ({:+.2}, {:+.2}%)",
                        instrument, quote.ltp, quote.change, quote.change_pct
                    );
                    let Ok(mut table) = self.table.lock() else {
                        error!("Quote table mutex poisoned; poller exiting");
                        return false;
                    };
                    table.update(instrument, quote);
                }
                Err(e) => {
                    any_failure = true;
                    warn!("Fetch failed for {}: {}", instrument, e);
                    if self.settings.simulate_on_failure {
                        let Ok(mut table) = self.table.lock() else {
                            error!("Quote table mutex poisoned; poller exiting");
                            return false;
                        };
                        self.simulator.step(table.get_mut(instrument), spec.base_price);
                    }
                }
            }
        }

        if any_success {
            self.consecutive_failures = 0;
        } else if any_failure {
            self.consecutive_failures += 1;
        }

        if self.consecutive_failures > self.settings.error_threshold {
            warn!(
                "{} consecutive failed cycles, re-running the login flow",
                self.consecutive_failures
            );
            match self.provider.authenticate(None) {
                Ok(()) => {
                    info!("Re-authentication succeeded, resuming polling");
                    self.consecutive_failures = 0;
                }
                Err(e) if self.settings.simulate_on_failure => {
                    warn!("Re-authentication failed ({}); continuing on simulated prices", e);
                    self.consecutive_failures = 0;
                }
                Err(e) => {
                    error!(
                        "Re-authentication failed after {} failed cycles, poller giving up: {}",
                        self.consecutive_failures, e
                    );
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quote::UpstreamQuote;
    use crate::provider::QuoteSource;
    use feed_common::instruments::InstrumentSpec;
    use feed_common::{FeedError, Result};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedSource {
        quote_calls: AtomicUsize,
        auth_calls: AtomicUsize,
        fail_quotes: AtomicBool,
        auth_succeeds: bool,
        fail_only_symbol: Option<&'static str>,
    }

    impl ScriptedSource {
        fn healthy() -> Self {
            ScriptedSource {
                quote_calls: AtomicUsize::new(0),
                auth_calls: AtomicUsize::new(0),
                fail_quotes: AtomicBool::new(false),
                auth_succeeds: true,
                fail_only_symbol: None,
            }
        }

        fn failing(auth_succeeds: bool) -> Self {
            ScriptedSource {
                fail_quotes: AtomicBool::new(true),
                auth_succeeds,
                ..ScriptedSource::healthy()
            }
        }
    }

    impl QuoteSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn authenticate(&self, _totp_override: Option<&str>) -> Result<()> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_succeeds {
                self.fail_quotes.store(false, Ordering::SeqCst);
                Ok(())
            } else {
                Err(FeedError::Auth("scripted rejection".to_string()))
            }
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        fn fetch_index_quote(&self, spec: &InstrumentSpec) -> Result<UpstreamQuote> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self.fail_quotes.load(Ordering::SeqCst)
                || self.fail_only_symbol == Some(spec.symbol);
            if failing {
                Err(FeedError::Upstream("scripted outage".to_string()))
            } else {
                Ok(UpstreamQuote {
                    ltp: 100.0,
                    close: 90.0,
                    ..UpstreamQuote::default()
                })
            }
        }

        fn fetch_symbol_quote(&self, _symbol: &str) -> Result<Value> {
            Err(FeedError::NotFound("scripted".to_string()))
        }
    }

    fn settings(simulate: bool) -> PollerSettings {
        PollerSettings {
            instruments: Instrument::all(),
            interval: Duration::from_millis(1),
            error_threshold: 5,
            simulate_on_failure: simulate,
            volatility: 0.0003,
        }
    }

    fn poller_with(source: Arc<ScriptedSource>, simulate: bool) -> Poller {
        let table = Arc::new(Mutex::new(QuoteTable::new(&Instrument::all())));
        Poller::new(source, table, settings(simulate))
    }

    #[test]
    fn successful_cycle_updates_every_instrument() {
        let source = Arc::new(ScriptedSource::healthy());
        let mut poller = poller_with(source.clone(), false);

        assert!(poller.tick());
        let table = poller.table.lock().unwrap();
        for instrument in Instrument::all() {
            let quote = table.get(&instrument).unwrap();
            assert_eq!(quote.ltp, 100.0);
            assert_eq!(quote.change, 10.0);
            assert_eq!(quote.change_pct, 11.11);
        }
        assert_eq!(source.quote_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn single_instrument_failure_leaves_the_stale_value() {
        let source = Arc::new(ScriptedSource {
            fail_only_symbol: Some("SENSEX"),
            ..ScriptedSource::healthy()
        });
        let mut poller = poller_with(source, false);

        assert!(poller.tick());
        let table = poller.table.lock().unwrap();
        assert_eq!(table.get(&Instrument::Nifty50).unwrap().ltp, 100.0);
        assert_eq!(table.get(&Instrument::Sensex).unwrap().ltp, 0.0);
        // A success elsewhere in the cycle keeps the failure counter at zero.
        assert_eq!(poller.consecutive_failures, 0);
    }

    #[test]
    fn loop_stops_after_six_failed_cycles_when_reauth_fails() {
        let source = Arc::new(ScriptedSource::failing(false));
        let mut poller = poller_with(source.clone(), false);

        for _ in 0..5 {
            assert!(poller.tick());
        }
        assert!(!poller.tick());
        assert_eq!(source.quote_calls.load(Ordering::SeqCst), 18);
        assert_eq!(source.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poller_thread_stops_issuing_calls_after_giving_up() {
        let source = Arc::new(ScriptedSource::failing(false));
        let table = Arc::new(Mutex::new(QuoteTable::new(&Instrument::all())));
        let handle = Poller::new(source.clone(), table, settings(false)).start();

        // 6 failed cycles at 1ms apiece; give the thread ample slack.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished());

        let after_exit = source.quote_calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(source.quote_calls.load(Ordering::SeqCst), after_exit);
        assert_eq!(after_exit, 18);
        handle.stop();
    }

    #[test]
    fn successful_reauth_resets_the_counter_and_resumes() {
        let source = Arc::new(ScriptedSource::failing(true));
        let mut poller = poller_with(source.clone(), false);

        for _ in 0..6 {
            assert!(poller.tick());
        }
        assert_eq!(source.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(poller.consecutive_failures, 0);

        // The scripted login flow repaired the feed; polling carries on.
        assert!(poller.tick());
        let table = poller.table.lock().unwrap();
        assert_eq!(table.get(&Instrument::Nifty50).unwrap().ltp, 100.0);
    }

    #[test]
    fn simulation_keeps_the_loop_alive_and_seeds_base_prices() {
        let source = Arc::new(ScriptedSource::failing(false));
        let mut poller = poller_with(source.clone(), true);

        for _ in 0..10 {
            assert!(poller.tick());
        }
        // Escalations re-tried the login but never terminated the loop.
        assert!(source.auth_calls.load(Ordering::SeqCst) >= 1);

        let table = poller.table.lock().unwrap();
        for instrument in Instrument::all() {
            let spec = instruments::spec_for(&instrument).unwrap();
            let quote = table.get(&instrument).unwrap();
            assert_eq!(quote.open, spec.base_price);
            assert!(quote.ltp > 0.0);
        }
    }

    #[test]
    fn stop_interrupts_a_healthy_poller() {
        let source = Arc::new(ScriptedSource::healthy());
        let table = Arc::new(Mutex::new(QuoteTable::new(&Instrument::all())));
        let handle = Poller::new(source, table.clone(), settings(false)).start();

        thread::sleep(Duration::from_millis(100));
        handle.stop();
        assert!(table.lock().unwrap().data_available());
    }
}
