// ===============================
// src/model.rs
// ===============================
//
// Price model: instrument snapshots + pure perturbation functions.
// - Quote       : stock / index snapshot
// - OptionLeg   : one call or put inside an OptionChain
// - Candle      : OHLCV chart point, kept in a bounded CandleWindow
//
// Notes:
// - Semua harga f64, dibulatkan 2 desimal setiap mutasi.
// - `close` is the session-open reference (previous close); change and
//   change_percent are always relative to it.
//

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Max relative move per tick for stocks (±0.5%).
pub const STOCK_BAND: f64 = 0.005;
/// Max relative move per tick for indices (±0.3%).
pub const INDEX_BAND: f64 = 0.003;
/// Max relative move per tick for option legs (±2%).
pub const OPTION_BAND: f64 = 0.02;
/// Candles kept per chart.
pub const CHART_WINDOW: usize = 100;

const QUOTE_VOLUME_STEP: u64 = 5_000;
const LEG_VOLUME_STEP: u64 = 250;

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Percent move of `price` against `reference`, two decimals.
///
/// A zero (or non-finite) reference yields 0.0 instead of inf/NaN. For option
/// legs the reference is `last_price - change`, which is zero for a leg that
/// listed at exactly its change value.
pub fn percent_change(price: f64, reference: f64) -> f64 {
    if reference == 0.0 || !reference.is_finite() {
        return 0.0;
    }
    round2((price - reference) / reference * 100.0)
}

struct Repriced {
    price: f64,
    change: f64,
    change_percent: f64,
    high: f64,
    low: f64,
}

fn reprice(raw: f64, open: f64, close: f64, high: f64, low: f64) -> Repriced {
    let price = round2(raw.max(0.0));
    Repriced {
        price,
        change: round2(price - close),
        change_percent: percent_change(price, close),
        high: high.max(price).max(open).max(close),
        low: low.min(price).min(open).min(close),
    }
}

fn relative_delta<R: Rng + ?Sized>(price: f64, band: f64, rng: &mut R) -> f64 {
    let band = band.abs();
    price * rng.gen_range(-band..=band)
}

// -----------------------------------------------------------------------------
// Quote (stock / index)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Quote {
    /// Builds a snapshot whose high/low already bracket open, close and price.
    pub fn new(symbol: &str, name: &str, price: f64, open: f64, close: f64, volume: u64) -> Self {
        let open = round2(open);
        let close = round2(close);
        let r = reprice(price, open, close, open, open);
        Self {
            symbol: symbol.to_ascii_uppercase(),
            name: name.to_string(),
            price: r.price,
            change: r.change,
            change_percent: r.change_percent,
            open,
            high: r.high,
            low: r.low,
            close,
            volume,
        }
    }

    /// Same quote at a new last price; high/low only ever widen.
    pub fn with_price(&self, price: f64) -> Self {
        let r = reprice(price, self.open, self.close, self.high, self.low);
        Self {
            price: r.price,
            change: r.change,
            change_percent: r.change_percent,
            high: r.high,
            low: r.low,
            ..self.clone()
        }
    }

    pub fn range_ok(&self) -> bool {
        self.high >= self.price.max(self.open).max(self.close)
            && self.low <= self.price.min(self.open).min(self.close)
    }
}

/// One tick of a quote: uniform move within ±`band` of the current price.
pub fn perturb<R: Rng + ?Sized>(quote: &Quote, band: f64, rng: &mut R) -> Quote {
    let delta = relative_delta(quote.price, band, rng);
    let mut next = quote.with_price(quote.price + delta);
    next.volume = quote.volume.saturating_add(rng.gen_range(0..=QUOTE_VOLUME_STEP));
    next
}

// -----------------------------------------------------------------------------
// Options
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub kind: OptionKind,
    pub strike: f64,
    pub last_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: f64,
}

impl OptionLeg {
    pub fn new(kind: OptionKind, strike: f64, last_price: f64, close: f64, open_interest: u64, iv: f64) -> Self {
        let close = round2(close);
        let r = reprice(last_price, close, close, close, close);
        let mut leg = Self {
            kind,
            strike,
            last_price: r.price,
            change: r.change,
            change_percent: r.change_percent,
            open: close,
            high: r.high,
            low: r.low,
            close,
            bid: 0.0,
            ask: 0.0,
            volume: 0,
            open_interest,
            implied_volatility: round2(iv),
        };
        leg.requote();
        leg
    }

    /// Reference price the change is measured against.
    pub fn reference_price(&self) -> f64 {
        round2(self.last_price - self.change)
    }

    pub fn range_ok(&self) -> bool {
        self.high >= self.last_price.max(self.open).max(self.close)
            && self.low <= self.last_price.min(self.open).min(self.close)
    }

    fn requote(&mut self) {
        // spread 0.5% di sekitar last
        self.bid = round2(self.last_price * 0.9975);
        self.ask = round2(self.last_price * 1.0025);
    }
}

pub fn perturb_leg<R: Rng + ?Sized>(leg: &OptionLeg, band: f64, rng: &mut R) -> OptionLeg {
    let reference = leg.reference_price();
    let delta = relative_delta(leg.last_price, band, rng);
    let r = reprice(leg.last_price + delta, leg.open, reference, leg.high, leg.low);

    let oi_step = rng.gen_range(-500_i64..=500);
    let iv_step = rng.gen_range(-0.25..=0.25);

    let mut next = OptionLeg {
        last_price: r.price,
        change: r.change,
        change_percent: percent_change(r.price, reference),
        high: r.high,
        low: r.low,
        volume: leg.volume.saturating_add(rng.gen_range(0..=LEG_VOLUME_STEP)),
        open_interest: leg.open_interest.saturating_add_signed(oi_step),
        implied_volatility: round2((leg.implied_volatility + iv_step).max(1.0)),
        ..leg.clone()
    };
    next.requote();
    next
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionStrike {
    pub strike: f64,
    pub call: OptionLeg,
    pub put: OptionLeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub spot: f64,
    pub strikes: Vec<OptionStrike>,
}

impl OptionChain {
    pub fn legs(&self) -> impl Iterator<Item = &OptionLeg> {
        self.strikes.iter().flat_map(|s| [&s.call, &s.put])
    }
}

/// Every call and put moves independently; `spot` follows the underlying.
pub fn perturb_chain<R: Rng + ?Sized>(chain: &OptionChain, spot: f64, band: f64, rng: &mut R) -> OptionChain {
    let strikes = chain
        .strikes
        .iter()
        .map(|s| OptionStrike {
            strike: s.strike,
            call: perturb_leg(&s.call, band, rng),
            put: perturb_leg(&s.put, band, rng),
        })
        .collect();
    OptionChain {
        symbol: chain.symbol.clone(),
        expiry: chain.expiry,
        spot: round2(spot),
        strikes,
    }
}

// -----------------------------------------------------------------------------
// Candles
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// Flat candle used when a chart has no history yet.
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        let px = round2(price);
        Self { timestamp, open: px, high: px, low: px, close: px, volume: 0 }
    }
}

/// Next candle after `prev`: opens at the previous close, one `step` later.
pub fn next_candle<R: Rng + ?Sized>(prev: &Candle, step: ChronoDuration, band: f64, rng: &mut R) -> Candle {
    let open = prev.close;
    let close = round2((open + relative_delta(open, band, rng)).max(0.0));
    let wick = open * band.abs() * 0.5;
    let high = round2(open.max(close) + rng.gen_range(0.0..=wick)).max(open).max(close);
    let low = round2((open.min(close) - rng.gen_range(0.0..=wick)).max(0.0)).min(open).min(close);
    Candle {
        timestamp: prev.timestamp + step,
        open,
        high,
        low,
        close,
        volume: rng.gen_range(10_000..=500_000),
    }
}

/// Time-ordered FIFO of the most recent candles.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleWindow {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleWindow {
    /// Capacity is clamped to `1..=CHART_WINDOW`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, CHART_WINDOW);
        Self { capacity, candles: VecDeque::with_capacity(capacity + 1) }
    }

    /// Appends `candle`; when the window was full the oldest candle is
    /// evicted and returned.
    pub fn push(&mut self, candle: Candle) -> Option<Candle> {
        debug_assert!(
            self.candles.back().map_or(true, |last| last.timestamp < candle.timestamp),
            "candles must be pushed in time order"
        );
        self.candles.push_back(candle);
        if self.candles.len() > self.capacity {
            self.candles.pop_front()
        } else {
            None
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.candles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
    pub fn first(&self) -> Option<&Candle> {
        self.candles.front()
    }
    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn reliance() -> Quote {
        Quote::new("RELIANCE", "Reliance Industries", 2856.75, 2840.10, 2832.45, 5_234_567)
    }

    fn candle_at(minute: i64, close: f64) -> Candle {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000 + minute * 60, 0).unwrap();
        Candle::flat(ts, close)
    }

    #[test]
    fn seeded_quote_brackets_open_close_and_price() {
        let q = reliance();
        assert!(q.range_ok());
        assert_eq!(q.change, 24.30);
        assert_eq!(q.change_percent, 0.86);
    }

    #[test]
    fn perturb_stays_inside_band_and_recomputes_change() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = reliance();
        for _ in 0..500 {
            let next = perturb(&q, STOCK_BAND, &mut rng);
            assert!(next.price >= 2856.75 * (1.0 - STOCK_BAND) - 0.005);
            assert!(next.price <= 2856.75 * (1.0 + STOCK_BAND) + 0.005);
            let expected = round2((next.price - 2832.45) / 2832.45 * 100.0);
            assert!((next.change_percent - expected).abs() < 1e-9);
            assert!((next.change - round2(next.price - 2832.45)).abs() < 1e-9);
            assert!(next.volume >= q.volume);
            assert_eq!(next.close, q.close);
            assert_eq!(next.open, q.open);
        }
    }

    #[test]
    fn high_low_widen_but_never_shrink() {
        let q = reliance();
        let up = q.with_price(2900.0);
        assert_eq!(up.high, 2900.0);
        let back = up.with_price(2850.0);
        assert_eq!(back.high, 2900.0);
        let down = back.with_price(2700.0);
        assert_eq!(down.low, 2700.0);
        assert_eq!(down.high, 2900.0);
    }

    #[test]
    fn zero_reference_is_zero_percent() {
        assert_eq!(percent_change(12.5, 0.0), 0.0);
        assert_eq!(percent_change(12.5, f64::NAN), 0.0);
        let leg = OptionLeg::new(OptionKind::Call, 100.0, 4.0, 0.0, 1_000, 18.0);
        assert_eq!(leg.change_percent, 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let next = perturb_leg(&leg, OPTION_BAND, &mut rng);
        assert_eq!(next.change_percent, 0.0);
        assert!(next.change_percent.is_finite());
    }

    #[test]
    fn leg_change_is_measured_against_reference() {
        let leg = OptionLeg::new(OptionKind::Put, 2850.0, 42.0, 40.0, 12_000, 21.5);
        assert_eq!(leg.reference_price(), 40.0);
        let mut rng = StdRng::seed_from_u64(99);
        let next = perturb_leg(&leg, OPTION_BAND, &mut rng);
        assert_eq!(next.reference_price(), 40.0);
        assert_eq!(next.change_percent, percent_change(next.last_price, 40.0));
        assert!(next.bid <= next.last_price && next.last_price <= next.ask);
    }

    #[test]
    fn next_candle_opens_at_previous_close() {
        let mut rng = StdRng::seed_from_u64(3);
        let prev = candle_at(0, 101.25);
        let next = next_candle(&prev, ChronoDuration::minutes(5), STOCK_BAND, &mut rng);
        assert_eq!(next.open, 101.25);
        assert_eq!(next.timestamp - prev.timestamp, ChronoDuration::minutes(5));
        assert!(next.high >= next.open.max(next.close));
        assert!(next.low <= next.open.min(next.close));
    }

    #[test]
    fn window_evicts_exactly_the_oldest_at_capacity() {
        let mut w = CandleWindow::new(3);
        assert!(w.push(candle_at(0, 1.0)).is_none());
        assert!(w.push(candle_at(5, 2.0)).is_none());
        assert!(w.push(candle_at(10, 3.0)).is_none());
        let evicted = w.push(candle_at(15, 4.0)).expect("window was full");
        assert_eq!(evicted.close, 1.0);
        assert_eq!(w.len(), 3);
        assert_eq!(w.first().unwrap().close, 2.0);
        assert_eq!(w.last().unwrap().close, 4.0);
    }

    proptest! {
        #[test]
        fn quote_range_holds_for_any_walk(seed in any::<u64>(), steps in 1usize..200) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut q = reliance();
            for _ in 0..steps {
                q = perturb(&q, STOCK_BAND, &mut rng);
                prop_assert!(q.high >= q.price && q.price >= q.low);
                prop_assert!(q.range_ok());
            }
        }

        #[test]
        fn leg_range_holds_for_any_walk(seed in any::<u64>(), steps in 1usize..200) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut leg = OptionLeg::new(OptionKind::Call, 2800.0, 85.4, 80.0, 50_000, 19.0);
            for _ in 0..steps {
                leg = perturb_leg(&leg, OPTION_BAND, &mut rng);
                prop_assert!(leg.range_ok());
                prop_assert!(leg.change_percent.is_finite());
            }
        }

        #[test]
        fn window_never_exceeds_capacity(cap in 1usize..120, pushes in 0usize..400) {
            let mut rng = StdRng::seed_from_u64(cap as u64);
            let mut w = CandleWindow::new(cap);
            prop_assert_eq!(w.capacity(), cap.min(CHART_WINDOW));
            let cap = w.capacity();
            let mut prev = candle_at(0, 250.0);
            for _ in 0..pushes {
                let was_full = w.len() == cap;
                let oldest = w.first().cloned();
                let evicted = w.push(prev.clone());
                prop_assert!(w.len() <= cap);
                prop_assert_eq!(evicted.is_some(), was_full);
                if was_full {
                    prop_assert_eq!(evicted, oldest);
                }
                prev = next_candle(&prev, ChronoDuration::minutes(5), STOCK_BAND, &mut rng);
            }
        }
    }
}
