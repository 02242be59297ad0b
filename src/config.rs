// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : market_feed_sim — simulated real-time market data fan-out in Rust
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Seeds NSE stocks, indices, option chains and candle charts, perturbs
          them on independent fixed-period timers, fans snapshots out to
          in-process subscribers, evaluates price/volume alert rules into a
          notification log, exposes Prometheus metrics, and records JSONL
          events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use clap::{ArgAction, Parser};
use dotenvy::dotenv;

use crate::model::{CHART_WINDOW, INDEX_BAND, OPTION_BAND, STOCK_BAND};
use crate::scheduler::FeedPeriods;

/// Parameter simulasi (periode feed, band harga, chart).
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub periods: FeedPeriods,
    pub stock_band: f64,
    pub index_band: f64,
    pub option_band: f64,
    /// Simulated market time covered by one chart tick.
    pub chart_step: ChronoDuration,
    pub chart_window: usize,
    /// Candles generated per chart at start-up.
    pub chart_history: usize,
    /// Fixed RNG seed for reproducible runs; None = entropy.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            periods: FeedPeriods::default(),
            stock_band: STOCK_BAND,
            index_band: INDEX_BAND,
            option_band: OPTION_BAND,
            chart_step: ChronoDuration::minutes(5),
            chart_window: CHART_WINDOW,
            chart_history: CHART_WINDOW,
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed), ..Self::default() }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "market_feed_sim", version, about = "Simulated real-time market data fan-out")]
pub struct Args {
    // feed periods
    #[arg(long, env = "STOCKS_INTERVAL_MS", default_value_t = 5_000)]
    pub stocks_interval_ms: u64,
    #[arg(long, env = "INDICES_INTERVAL_MS", default_value_t = 10_000)]
    pub indices_interval_ms: u64,
    #[arg(long, env = "OPTIONS_INTERVAL_MS", default_value_t = 15_000)]
    pub options_interval_ms: u64,
    #[arg(long, env = "CHART_INTERVAL_MS", default_value_t = 10_000)]
    pub chart_interval_ms: u64,

    // chart
    #[arg(long, env = "CHART_STEP_MINUTES", default_value_t = 5)]
    pub chart_step_minutes: u32,
    #[arg(long, env = "CHART_WINDOW", default_value_t = CHART_WINDOW)]
    pub chart_window: usize,

    // randomness
    #[arg(long, env = "SIM_SEED")]
    pub seed: Option<u64>,

    // files/metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,

    // run control
    #[arg(long, env = "RUN_FOR_SECS")]
    pub run_for_secs: Option<u64>,
    #[arg(long, env = "DEMO_ALERTS", default_value_t = true, action = ArgAction::Set)]
    pub demo_alerts: bool,
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

impl Args {
    pub fn sim_config(&self) -> SimConfig {
        let periods = FeedPeriods {
            stocks: Duration::from_millis(self.stocks_interval_ms),
            indices: Duration::from_millis(self.indices_interval_ms),
            option_chain: Duration::from_millis(self.options_interval_ms),
            chart: Duration::from_millis(self.chart_interval_ms),
        };
        let window = self.chart_window.clamp(1, CHART_WINDOW);
        SimConfig {
            periods,
            chart_step: ChronoDuration::minutes(i64::from(self.chart_step_minutes.max(1))),
            chart_window: window,
            chart_history: window,
            seed: self.seed,
            ..SimConfig::default()
        }
    }
}

pub fn load() -> Args {
    // Pastikan .env dibaca (agar SIM_SEED, RECORD_FILE, dll ter-load)
    let _ = dotenv();
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_feed_contract() {
        let args = Args::parse_from(["market_feed_sim"]);
        let cfg = args.sim_config();
        assert_eq!(cfg.periods, FeedPeriods::default());
        assert_eq!(cfg.chart_step, ChronoDuration::minutes(5));
        assert_eq!(cfg.chart_window, 100);
        assert!(args.demo_alerts);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "market_feed_sim",
            "--stocks-interval-ms",
            "250",
            "--chart-window",
            "0",
            "--seed",
            "42",
            "--demo-alerts",
            "false",
        ]);
        let cfg = args.sim_config();
        assert_eq!(cfg.periods.stocks, Duration::from_millis(250));
        assert_eq!(cfg.chart_window, 1);
        assert_eq!(cfg.seed, Some(42));
        assert!(!args.demo_alerts);
    }

    #[test]
    fn chart_window_is_capped_at_one_hundred() {
        let args = Args::parse_from(["market_feed_sim", "--chart-window", "500"]);
        let cfg = args.sim_config();
        assert_eq!(cfg.chart_window, CHART_WINDOW);
        assert_eq!(cfg.chart_history, CHART_WINDOW);
    }
}
