// ===============================
// src/engine.rs
// ===============================
//
// UpdateEngine: owns the authoritative market state and, on every scheduler
// tick, (1) reads the feed's current snapshots, (2) perturbs them, (3) writes
// them back, (4) publishes through the Hub.
//
// - stocks / indices : whole list on Topic::Stocks / Topic::Indices
// - chart            : one candle per symbol per tick, FIFO window, full window
//                      published on Topic::Chart(symbol)
// - option chain     : every leg moves independently, whole chain published on
//                      Topic::OptionChain(symbol)
//
// Tidak ada global state: satu MarketEngine per sesi, di-drive lewat
// `advance` (test / logical time) atau `runtime::spawn` (tokio wall clock).
//

use std::time::Duration;

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::hub::{normalize_symbol, Category, ChartUpdate, Delivery, Hub};
use crate::metrics::{CANDLES_EVICTED, TICKS, TICKS_BY_FEED};
use crate::model::{self, Candle, CandleWindow, OptionChain, Quote};
use crate::scheduler::{Feed, Scheduler};
use crate::seed::{self, SeedData};

pub struct MarketEngine {
    cfg: SimConfig,
    scheduler: Scheduler,
    hub: Hub,
    rng: StdRng,
    stocks: Vec<Quote>,
    indices: Vec<Quote>,
    charts: HashMap<String, CandleWindow>,
    chains: HashMap<String, OptionChain>,
    chart_origin: DateTime<Utc>,
}

impl MarketEngine {
    pub fn new(cfg: SimConfig) -> Self {
        Self::with_seed(cfg, seed::default_universe())
    }

    /// Builds state from `seed`; chart history ends at the current wall time.
    pub fn with_seed(cfg: SimConfig, seed: SeedData) -> Self {
        Self::with_seed_at(cfg, seed, Utc::now())
    }

    pub fn with_seed_at(cfg: SimConfig, seed: SeedData, now: DateTime<Utc>) -> Self {
        let mut rng = match cfg.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut charts = HashMap::with_capacity(seed.stocks.len());
        let mut chains = HashMap::with_capacity(seed.stocks.len());
        for quote in &seed.stocks {
            let window = seed::chart_history(
                quote,
                now,
                cfg.chart_step,
                cfg.chart_history,
                cfg.chart_window,
                &mut rng,
            );
            charts.insert(quote.symbol.clone(), window);
            chains.insert(quote.symbol.clone(), seed::option_chain(quote, now.date_naive(), &mut rng));
        }

        let hub = Hub::new(seed.stocks.iter().map(|q| q.symbol.as_str()));
        let engine = Self {
            scheduler: Scheduler::new(cfg.periods),
            cfg,
            hub,
            rng,
            stocks: seed.stocks,
            indices: seed.indices,
            charts,
            chains,
            chart_origin: now,
        };
        engine.prime_latest();
        info!(
            stocks = engine.stocks.len(),
            indices = engine.indices.len(),
            charts = engine.charts.len(),
            "market engine seeded"
        );
        engine
    }

    // Latest snapshots visible lewat Hub sebelum tick pertama.
    fn prime_latest(&self) {
        self.hub.publish_quotes(Category::Stocks, self.stocks.clone());
        self.hub.publish_quotes(Category::Indices, self.indices.clone());
        for quote in &self.stocks {
            if let Some(w) = self.charts.get(&quote.symbol) {
                self.hub.publish_chart(ChartUpdate { symbol: quote.symbol.clone(), candles: w.to_vec() });
            }
            if let Some(c) = self.chains.get(&quote.symbol) {
                self.hub.publish_option_chain(c.clone());
            }
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ---- lifecycle ----

    pub fn start(&mut self) {
        self.scheduler.start_all();
    }

    pub fn stop(&mut self) {
        self.scheduler.stop_all();
    }

    pub fn start_feed(&mut self, feed: Feed) -> bool {
        let started = self.scheduler.start(feed);
        if started {
            debug!(%feed, "feed started");
        }
        started
    }

    pub fn stop_feed(&mut self, feed: Feed) -> bool {
        let stopped = self.scheduler.stop(feed);
        if stopped {
            debug!(%feed, "feed stopped");
        }
        stopped
    }

    pub fn is_running(&self, feed: Feed) -> bool {
        self.scheduler.is_running(feed)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    /// Runs every tick due within the next `dt` of logical time.
    pub fn advance(&mut self, dt: Duration) -> usize {
        self.advance_to(self.scheduler.now() + dt)
    }

    /// Runs every tick due up to logical time `until`; returns how many fired.
    pub fn advance_to(&mut self, until: Duration) -> usize {
        let mut fired = 0;
        while let Some(feed) = self.scheduler.pop_due(until) {
            self.tick(feed);
            fired += 1;
        }
        self.scheduler.settle(until);
        fired
    }

    // ---- ticks ----

    pub fn tick(&mut self, feed: Feed) -> Delivery {
        TICKS.inc();
        TICKS_BY_FEED.with_label_values(&[feed.as_str()]).inc();
        let delivery = match feed {
            Feed::Stocks => self.tick_stocks(),
            Feed::Indices => self.tick_indices(),
            Feed::OptionChain => self.tick_option_chains(),
            Feed::Chart => self.tick_charts(),
        };
        debug!(%feed, delivered = delivery.delivered, failed = delivery.failed, "tick");
        delivery
    }

    fn tick_stocks(&mut self) -> Delivery {
        let band = self.cfg.stock_band;
        let next: Vec<Quote> = self.stocks.iter().map(|q| model::perturb(q, band, &mut self.rng)).collect();
        self.stocks = next;
        self.hub.publish_quotes(Category::Stocks, self.stocks.clone())
    }

    fn tick_indices(&mut self) -> Delivery {
        let band = self.cfg.index_band;
        let next: Vec<Quote> = self.indices.iter().map(|q| model::perturb(q, band, &mut self.rng)).collect();
        self.indices = next;
        self.hub.publish_quotes(Category::Indices, self.indices.clone())
    }

    fn tick_charts(&mut self) -> Delivery {
        let step = self.cfg.chart_step;
        let band = self.cfg.stock_band;
        let mut out = Delivery::default();
        for quote in &self.stocks {
            let Some(window) = self.charts.get_mut(&quote.symbol) else {
                continue;
            };
            let candle = match window.last() {
                Some(prev) => model::next_candle(prev, step, band, &mut self.rng),
                None => Candle::flat(self.chart_origin + step, quote.price),
            };
            if window.push(candle).is_some() {
                CANDLES_EVICTED.inc();
            }
            let update = ChartUpdate { symbol: quote.symbol.clone(), candles: window.to_vec() };
            out += self.hub.publish_chart(update);
        }
        out
    }

    fn tick_option_chains(&mut self) -> Delivery {
        let band = self.cfg.option_band;
        let mut out = Delivery::default();
        for quote in &self.stocks {
            let Some(chain) = self.chains.get_mut(&quote.symbol) else {
                continue;
            };
            *chain = model::perturb_chain(chain, quote.price, band, &mut self.rng);
            out += self.hub.publish_option_chain(chain.clone());
        }
        out
    }

    // ---- lookups (None = not found) ----

    pub fn stocks(&self) -> &[Quote] {
        &self.stocks
    }

    pub fn indices(&self) -> &[Quote] {
        &self.indices
    }

    /// Stock or index by symbol.
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        let sym = normalize_symbol(symbol);
        self.stocks
            .iter()
            .chain(self.indices.iter())
            .find(|q| q.symbol == sym)
    }

    pub fn chart(&self, symbol: &str) -> Option<&CandleWindow> {
        self.charts.get(&normalize_symbol(symbol))
    }

    pub fn option_chain(&self, symbol: &str) -> Option<&OptionChain> {
        self.chains.get(&normalize_symbol(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Topic;
    use crate::model::round2;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn engine() -> MarketEngine {
        MarketEngine::new(SimConfig::seeded(2024))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn reliance_single_tick_stays_in_band() {
        let mut e = engine();
        e.tick(Feed::Stocks);
        let q = e.quote("RELIANCE").unwrap();
        assert!(q.price >= 2856.75 * 0.995 - 0.005, "price {}", q.price);
        assert!(q.price <= 2856.75 * 1.005 + 0.005, "price {}", q.price);
        let expected = round2((q.price - 2832.45) / 2832.45 * 100.0);
        assert!((q.change_percent - expected).abs() < 1e-9);
    }

    #[test]
    fn ranges_hold_across_many_ticks() {
        let mut e = engine();
        e.start();
        e.advance(secs(600));
        for q in e.stocks().iter().chain(e.indices()) {
            assert!(q.high >= q.price && q.price >= q.low, "{}", q.symbol);
            assert!(q.range_ok());
        }
        for sym in e.hub().symbols() {
            let chain = e.option_chain(&sym).unwrap();
            assert!(chain.legs().all(|l| l.range_ok()));
        }
    }

    #[test]
    fn advance_fires_each_feed_at_its_period() {
        let mut e = engine();
        e.start();
        // 6 stocks + 3 indices + 2 option + 3 chart
        assert_eq!(e.advance(secs(30)), 14);
        assert_eq!(e.scheduler().now(), secs(30));
    }

    #[test]
    fn chart_tick_appends_one_candle_and_evicts_one() {
        let mut e = engine();
        let before = e.chart("TCS").unwrap().clone();
        assert_eq!(before.len(), 100);
        e.tick(Feed::Chart);
        let after = e.chart("TCS").unwrap();
        assert_eq!(after.len(), 100);
        let new_last = after.last().unwrap();
        assert_eq!(new_last.open, before.last().unwrap().close);
        assert_eq!(new_last.timestamp - before.last().unwrap().timestamp, chrono::Duration::minutes(5));
        // oldest went away, second-oldest is now first
        assert_eq!(after.first(), before.iter().nth(1));
    }

    #[test]
    fn chart_window_grows_until_capacity() {
        let cfg = SimConfig { chart_history: 98, ..SimConfig::seeded(1) };
        let mut e = MarketEngine::new(cfg);
        e.tick(Feed::Chart);
        assert_eq!(e.chart("INFY").unwrap().len(), 99);
        e.tick(Feed::Chart);
        e.tick(Feed::Chart);
        e.tick(Feed::Chart);
        assert_eq!(e.chart("INFY").unwrap().len(), 100);
    }

    #[test]
    fn empty_chart_starts_from_a_flat_candle() {
        let cfg = SimConfig { chart_history: 0, ..SimConfig::seeded(1) };
        let mut e = MarketEngine::new(cfg);
        assert!(e.chart("SBIN").unwrap().is_empty());
        e.tick(Feed::Chart);
        let w = e.chart("SBIN").unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w.last().unwrap().close, e.quote("SBIN").unwrap().price);
    }

    #[test]
    fn option_chain_is_republished_whole() {
        let mut e = engine();
        let seen: Arc<Mutex<Vec<OptionChain>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = e
            .hub()
            .subscribe_to_option_chain("RELIANCE", move |c| s.lock().push(c.clone()))
            .unwrap();
        let strikes = e.option_chain("RELIANCE").unwrap().strikes.len();

        e.tick(Feed::OptionChain);
        let got = seen.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].strikes.len(), strikes);
        assert_eq!(got[0].spot, e.quote("RELIANCE").unwrap().price);
        assert_eq!(&got[0], e.option_chain("RELIANCE").unwrap());
    }

    #[test]
    fn stopped_feed_does_not_tick_others_do() {
        let mut e = engine();
        e.start();
        e.stop_feed(Feed::Stocks);
        let before = e.stocks().to_vec();
        let idx_before = e.indices().to_vec();
        e.advance(secs(60));
        assert_eq!(e.stocks(), &before[..]);
        assert_ne!(e.indices(), &idx_before[..]);
    }

    #[test]
    fn stop_clears_all_triggers() {
        let mut e = engine();
        e.start();
        e.stop();
        e.stop();
        assert_eq!(e.next_deadline(), None);
        let before = e.stocks().to_vec();
        assert_eq!(e.advance(secs(300)), 0);
        assert_eq!(e.stocks(), &before[..]);
    }

    #[test]
    fn latest_snapshots_available_before_first_tick() {
        let e = engine();
        assert_eq!(e.hub().latest_quotes(Category::Stocks).unwrap().len(), e.stocks().len());
        assert_eq!(e.hub().latest_chart("itc").unwrap().candles.len(), 100);
        assert!(e.hub().latest_option_chain("ITC").is_some());
        assert_eq!(e.hub().subscriber_count(&Topic::Stocks), 0);
    }

    #[test]
    fn unknown_symbol_lookups_are_none() {
        let e = engine();
        assert!(e.quote("NOPE").is_none());
        assert!(e.chart("NOPE").is_none());
        assert!(e.option_chain("NOPE").is_none());
        assert!(e.quote("nifty").is_some());
    }
}
