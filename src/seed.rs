// ===============================
// src/seed.rs
// ===============================
//
// Static session-start universe (NSE large caps + headline indices) and the
// generators that turn it into chart history and option chains.
//

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use rand::Rng;

use crate::model::{
    next_candle, round2, Candle, CandleWindow, OptionChain, OptionKind, OptionLeg, OptionStrike, Quote,
    STOCK_BAND,
};

/// Strikes on each side of the at-the-money strike.
const STRIKES_PER_SIDE: usize = 5;

#[derive(Debug, Clone)]
pub struct SeedData {
    pub stocks: Vec<Quote>,
    pub indices: Vec<Quote>,
}

// (symbol, name, price, open, close, volume)
const STOCKS: &[(&str, &str, f64, f64, f64, u64)] = &[
    ("RELIANCE", "Reliance Industries", 2856.75, 2840.10, 2832.45, 5_234_567),
    ("TCS", "Tata Consultancy Services", 3945.20, 3930.00, 3921.80, 1_876_543),
    ("HDFCBANK", "HDFC Bank", 1678.90, 1692.00, 1689.35, 8_765_432),
    ("INFY", "Infosys", 1523.45, 1510.25, 1508.70, 4_567_890),
    ("ICICIBANK", "ICICI Bank", 1089.60, 1084.00, 1082.15, 9_876_543),
    ("HINDUNILVR", "Hindustan Unilever", 2456.30, 2468.00, 2470.85, 1_234_567),
    ("SBIN", "State Bank of India", 812.55, 806.40, 805.90, 15_678_901),
    ("BHARTIARTL", "Bharti Airtel", 1234.75, 1228.00, 1226.40, 3_456_789),
    ("ITC", "ITC", 438.65, 440.90, 441.20, 12_345_678),
    ("KOTAKBANK", "Kotak Mahindra Bank", 1756.40, 1750.00, 1748.95, 2_345_678),
];

const INDICES: &[(&str, &str, f64, f64, f64)] = &[
    ("NIFTY", "NIFTY 50", 22453.30, 22390.15, 22378.40),
    ("SENSEX", "S&P BSE SENSEX", 73876.82, 73702.50, 73651.35),
    ("BANKNIFTY", "NIFTY BANK", 47892.15, 47985.30, 48012.60),
    ("NIFTYIT", "NIFTY IT", 36542.80, 36301.20, 36278.45),
];

pub fn default_universe() -> SeedData {
    let stocks = STOCKS
        .iter()
        .map(|&(sym, name, px, open, close, vol)| Quote::new(sym, name, px, open, close, vol))
        .collect();
    let indices = INDICES
        .iter()
        .map(|&(sym, name, px, open, close)| Quote::new(sym, name, px, open, close, 0))
        .collect();
    SeedData { stocks, indices }
}

/// `len` candles ending at `end`, random-walking from the quote's price.
pub fn chart_history<R: Rng + ?Sized>(
    quote: &Quote,
    end: DateTime<Utc>,
    step: ChronoDuration,
    len: usize,
    capacity: usize,
    rng: &mut R,
) -> CandleWindow {
    let mut window = CandleWindow::new(capacity);
    if len == 0 {
        return window;
    }
    let start = end - step * (len as i32 - 1);
    let mut candle = Candle::flat(start, quote.price);
    candle.volume = rng.gen_range(10_000..=500_000);
    for _ in 0..len {
        let next = next_candle(&candle, step, STOCK_BAND, rng);
        window.push(candle);
        candle = next;
    }
    window
}

fn strike_step(spot: f64) -> f64 {
    match spot {
        s if s < 500.0 => 5.0,
        s if s < 1_000.0 => 10.0,
        s if s < 2_500.0 => 20.0,
        s if s < 5_000.0 => 50.0,
        _ => 100.0,
    }
}

/// Monthly expiry: first Thursday at least three weeks out.
pub fn expiry_after(today: NaiveDate) -> NaiveDate {
    let mut day = today + ChronoDuration::days(21);
    while day.weekday() != Weekday::Thu {
        day += ChronoDuration::days(1);
    }
    day
}

fn leg_premium(kind: OptionKind, spot: f64, strike: f64) -> f64 {
    let intrinsic = match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    };
    let moneyness = ((spot - strike) / spot).abs();
    let time_value = spot * 0.02 * (-moneyness * 15.0).exp();
    round2((intrinsic + time_value).max(0.05))
}

/// Chain of 2 * STRIKES_PER_SIDE + 1 strikes centred on the at-the-money strike.
pub fn option_chain<R: Rng + ?Sized>(quote: &Quote, today: NaiveDate, rng: &mut R) -> OptionChain {
    let spot = quote.price;
    let step = strike_step(spot);
    let atm = (spot / step).round() * step;

    let mut strikes = Vec::with_capacity(2 * STRIKES_PER_SIDE + 1);
    for i in 0..=(2 * STRIKES_PER_SIDE) {
        let strike = atm + (i as f64 - STRIKES_PER_SIDE as f64) * step;
        if strike <= 0.0 {
            continue;
        }
        let mut leg = |kind| {
            let last = leg_premium(kind, spot, strike);
            let close = round2(last * (1.0 + rng.gen_range(-0.05..=0.05)));
            let oi = rng.gen_range(10_000..=500_000);
            let iv = rng.gen_range(14.0..=32.0);
            let mut built = OptionLeg::new(kind, strike, last, close, oi, iv);
            built.volume = rng.gen_range(1_000..=100_000);
            built
        };
        let call = leg(OptionKind::Call);
        let put = leg(OptionKind::Put);
        strikes.push(OptionStrike { strike, call, put });
    }

    OptionChain {
        symbol: quote.symbol.clone(),
        expiry: expiry_after(today),
        spot: round2(spot),
        strikes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn universe_is_well_formed() {
        let seed = default_universe();
        assert_eq!(seed.stocks.len(), STOCKS.len());
        assert_eq!(seed.indices.len(), INDICES.len());
        for q in seed.stocks.iter().chain(seed.indices.iter()) {
            assert!(q.range_ok(), "{} range", q.symbol);
        }
        let reliance = seed.stocks.iter().find(|q| q.symbol == "RELIANCE").unwrap();
        assert_eq!(reliance.price, 2856.75);
        assert_eq!(reliance.close, 2832.45);
    }

    #[test]
    fn history_is_time_ordered_and_ends_at_end() {
        let mut rng = StdRng::seed_from_u64(11);
        let seed = default_universe();
        let end = DateTime::<Utc>::from_timestamp(1_710_000_000, 0).unwrap();
        let step = ChronoDuration::minutes(5);
        let w = chart_history(&seed.stocks[0], end, step, 100, 100, &mut rng);
        assert_eq!(w.len(), 100);
        assert_eq!(w.last().unwrap().timestamp, end);
        let candles = w.to_vec();
        for pair in candles.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, step);
            assert_eq!(pair[1].open, pair[0].close);
        }
    }

    #[test]
    fn chain_is_centred_and_sorted() {
        let mut rng = StdRng::seed_from_u64(5);
        let seed = default_universe();
        let today = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let chain = option_chain(&seed.stocks[0], today, &mut rng);
        assert_eq!(chain.strikes.len(), 2 * STRIKES_PER_SIDE + 1);
        assert_eq!(chain.strikes[STRIKES_PER_SIDE].strike, 2850.0);
        assert!(chain.strikes.windows(2).all(|p| p[0].strike < p[1].strike));
        assert_eq!(chain.expiry.weekday(), Weekday::Thu);
        assert!(chain.expiry >= today + ChronoDuration::days(21));
        assert!(chain.legs().all(|l| l.range_ok() && l.last_price > 0.0));
    }
}
