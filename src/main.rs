// ===============================
// src/main.rs
// ===============================
/*
 # jalan 60 detik, seed tetap, rekam ke file
 SIM_SEED=42 RUN_FOR_SECS=60 RECORD_FILE=data/events.jsonl cargo run --release

 # konfigurasi yang aktif
 curl -s localhost:9898/metrics | egrep '^config_(feed_period_ms|symbol)'

 # aktivitas per feed & alert
 curl -s localhost:9898/metrics | grep '^ticks_total_by_feed'
 curl -s localhost:9898/metrics | egrep '^(alerts_triggered_total|notifications_unread)'
*/
/*
=============================================================================
Project : market_feed_sim — simulated real-time market data fan-out in Rust
Module  : main.rs
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
use tokio::{
    select,
    sync::mpsc,
    time::{sleep, sleep_until, Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use market_feed_sim::{
    config, metrics,
    recorder::{self, Event, Record},
    Feed, MarketSession,
};

// (watchlist, symbol, condition, threshold)
const DEMO_ALERTS: &[(&str, &str, &str, &str)] = &[
    ("demo", "RELIANCE", "above", "2650"),
    ("demo", "TCS", "below", "3900"),
    ("demo", "INFY", "percent_change", "1.5"),
    ("demo", "SBIN", "volume", "20000000"),
];

#[tokio::main]
async fn main() {
    // ---- Load config ----
    let args = config::load();
    let cfg = args.sim_config();

    // ---- Logging ---- (RUST_LOG menang kalau di-set)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        stocks_ms = cfg.periods.stocks.as_millis() as u64,
        indices_ms = cfg.periods.indices.as_millis() as u64,
        options_ms = cfg.periods.option_chain.as_millis() as u64,
        chart_ms = cfg.periods.chart.as_millis() as u64,
        chart_step_min = cfg.chart_step.num_minutes(),
        chart_window = cfg.chart_window,
        seed = ?cfg.seed,
        record_file = ?args.record_file,
        run_for_secs = ?args.run_for_secs,
        "startup config"
    );
    for feed in Feed::ALL {
        metrics::CONFIG_FEED_PERIOD_MS
            .with_label_values(&[feed.as_str()])
            .set(cfg.periods.get(feed).as_millis() as i64);
    }

    // ---- Session ----
    let mut session = MarketSession::new(cfg);
    for s in session.hub().symbols() {
        metrics::CONFIG_SYMBOL.with_label_values(&[&s]).set(1);
    }

    // ---- Recorder (optional) ----
    let recorder_task = match args.record_file.clone() {
        Some(path) => {
            let (rec_tx, rec_rx) = mpsc::channel::<Record>(8192);
            let _ = rec_tx.try_send(Record::now(Event::Note("session start".into())));
            match recorder::attach(session.hub(), session.notification_center(), rec_tx) {
                // link lepas sendiri kalau task recorder berhenti
                Ok(_link) => Some(tokio::spawn(recorder::run(rec_rx, path))),
                Err(e) => {
                    warn!(error = %e, "recorder: attach failed, recording disabled");
                    None
                }
            }
        }
        None => None,
    };

    // ---- Notification log -> tracing ----
    let _notif_log = session.subscribe_to_notifications(|n| {
        info!(kind = n.kind.as_str(), title = %n.title, symbol = ?n.symbol, "{}", n.message);
    });

    // ---- Demo alert rules ----
    if args.demo_alerts {
        for &(watchlist, symbol, condition, threshold) in DEMO_ALERTS {
            if let Err(e) = session.create_alert_rule(watchlist, symbol, condition, threshold) {
                warn!(error = %e, %symbol, "demo alert rejected");
            }
        }
    }

    // ---- Run ----
    session.start();
    let deadline = args.run_for_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_ticks = metrics::TICKS.get();

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                info!("run_for elapsed, shutting down");
                break;
            }
            _ = sleep(Duration::from_secs(10)) => {
                let ticks = metrics::TICKS.get();
                info!(ticks = ticks - last_ticks, unread = session.unread_count(), "heartbeat");
                last_ticks = ticks;
            }
        }
    }

    // ---- Shutdown ----
    session.stop().await;
    info!(
        notifications = session.notifications().len(),
        unread = session.unread_count(),
        rules = session.alert_rules().len(),
        "session summary"
    );
    // drop hub + subscribers -> channel recorder tertutup -> flush
    drop(session);
    if let Some(task) = recorder_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "recorder stopped with error"),
            Err(e) => warn!(error = %e, "recorder task failed"),
        }
    }
}
