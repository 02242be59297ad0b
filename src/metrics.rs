// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed / fan-out --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "scheduler ticks (all feeds)").unwrap());

pub static TICKS_BY_FEED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("ticks_total_by_feed", "scheduler ticks per feed"), &["feed"]).unwrap()
});

pub static PUBLISHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("publishes_total", "snapshots published (label: topic kind)"),
        &["topic"],
    )
    .unwrap()
});

pub static DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deliveries_total", "callback invocations that returned normally"),
        &["topic"],
    )
    .unwrap()
});

pub static SUBSCRIBER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subscriber_failures_total", "callback invocations that panicked"),
        &["topic"],
    )
    .unwrap()
});

pub static CANDLES_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("candles_evicted_total", "candles dropped from full chart windows").unwrap()
});

// -------- Alerts / notifications --------
pub static ALERTS_TRIGGERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("alerts_triggered_total", "alert rules that fired (label: condition)"),
        &["condition"],
    )
    .unwrap()
});

pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notifications_recorded_total", "notifications appended to the log"),
        &["kind"],
    )
    .unwrap()
});

pub static NOTIFICATIONS_UNREAD: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("notifications_unread", "unread notifications").unwrap());

// ---- Config visibility (feed periods / symbols) ----
pub static CONFIG_FEED_PERIOD_MS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_period_ms", "feed period in ms (label: feed)"),
        &["feed"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "seeded symbols (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_FEED.clone())),
        REGISTRY.register(Box::new(PUBLISHES.clone())),
        REGISTRY.register(Box::new(DELIVERIES.clone())),
        REGISTRY.register(Box::new(SUBSCRIBER_FAILURES.clone())),
        REGISTRY.register(Box::new(CANDLES_EVICTED.clone())),
        REGISTRY.register(Box::new(ALERTS_TRIGGERED.clone())),
        REGISTRY.register(Box::new(NOTIFICATIONS.clone())),
        REGISTRY.register(Box::new(NOTIFICATIONS_UNREAD.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_PERIOD_MS.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        // double init -> AlreadyReg, harmless
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                // metrics optional: simulator tetap jalan tanpa endpoint
                error!(?e, %addr, "metrics bind failed");
                return;
            }
        };
        info!(%addr, "metrics listening (GET / or /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
