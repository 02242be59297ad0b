// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder yang ringan & tahan banting:
// - Setiap snapshot yang di-publish Hub + setiap notifikasi -> satu baris JSON.
// - Subscriber hanya `try_send` ke channel; IO terjadi di task terpisah.
// - Kalau task recorder berhenti, semua subscription dilepas sendiri.
// - BufWriter, flush periodik tiap 1s dan/atau tiap 1000 event.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, coba reopen file dan lanjut.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif (lihat main.rs).
//
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{self, error::TrySendError},
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::hub::{Category, FeedError, Hub, Subscription};
use crate::model::{Candle, OptionChain, Quote};
use crate::notifications::{Notification, NotificationCenter};

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Stocks(Vec<Quote>),
    Indices(Vec<Quote>),
    /// Only the newest candle; the window itself is reconstructible from the log.
    Candle { symbol: String, candle: Candle },
    OptionChain(OptionChain),
    Notification(Notification),
    Note(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub ts: DateTime<Utc>,
    pub event: Event,
}

impl Record {
    pub fn now(event: Event) -> Self {
        Self { ts: Utc::now(), event }
    }
}

async fn open_writer(path: &str) -> io::Result<BufWriter<tokio::fs::File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Drains `rx` into `path` until every sender is dropped.
pub async fn run(mut rx: mpsc::Receiver<Record>, path: String) -> io::Result<()> {
    let mut writer = open_writer(&path).await?;
    info!(%path, "recorder: started");

    // Flush periodik (tiap 1 detik) + flush berbasis jumlah event
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            maybe_rec = rx.recv() => {
                let Some(rec) = maybe_rec else {
                    // Channel closed: flush dan keluar
                    writer.flush().await?;
                    info!(written, "recorder: channel closed, stopped");
                    return Ok(());
                };
                let line = match serde_json::to_string(&rec) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e) => {
                            error!(?e, %path, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    // coba lagi sekali setelah reopen
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }
                written += 1;

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                // Flush periodik
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

// Shared by every recorder callback; owns the handles so the first callback
// that finds the recorder gone can detach all of them.
struct Sink {
    tx: mpsc::Sender<Record>,
    subs: OnceLock<Vec<Subscription>>,
}

impl Sink {
    fn forward(&self, event: Event) {
        match self.tx.try_send(Record::now(event)) {
            Ok(()) => {}
            // channel penuh -> event di-drop, feed jalan terus
            Err(TrySendError::Full(_)) => warn!("recorder: channel full, event dropped"),
            // recorder task sudah berhenti -> lepas semua subscription
            Err(TrySendError::Closed(_)) => {
                self.detach();
            }
        }
    }

    fn detach(&self) -> usize {
        let detached = self
            .subs
            .get()
            .map_or(0, |subs| subs.iter().filter(|s| s.unsubscribe()).count());
        if detached > 0 {
            warn!(subscriptions = detached, "recorder: stopped, detached from all feeds");
        }
        detached
    }
}

/// The recorder's subscriptions. Dropping it does not detach; the recorder
/// detaches itself once its channel closes.
pub struct RecorderLink {
    sink: Arc<Sink>,
}

impl RecorderLink {
    pub fn len(&self) -> usize {
        self.sink.subs.get().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscriptions still delivering to the recorder.
    pub fn active(&self) -> usize {
        self.sink.subs.get().map_or(0, |subs| subs.iter().filter(|s| s.is_active()).count())
    }

    /// Unsubscribes everything; returns how many were still active.
    pub fn detach(&self) -> usize {
        self.sink.detach()
    }
}

/// Subscribes the recorder to every topic the hub serves plus the
/// notification log.
pub fn attach(
    hub: &Hub,
    notifications: &NotificationCenter,
    tx: mpsc::Sender<Record>,
) -> Result<RecorderLink, FeedError> {
    let sink = Arc::new(Sink { tx, subs: OnceLock::new() });
    let mut subs = Vec::new();

    let s = Arc::clone(&sink);
    subs.push(hub.subscribe_to_category(Category::Stocks, move |q| s.forward(Event::Stocks(q.clone()))));
    let s = Arc::clone(&sink);
    subs.push(hub.subscribe_to_category(Category::Indices, move |q| s.forward(Event::Indices(q.clone()))));

    for symbol in hub.symbols() {
        let s = Arc::clone(&sink);
        subs.push(hub.subscribe_to_chart(&symbol, move |u| {
            if let Some(c) = u.last() {
                s.forward(Event::Candle { symbol: u.symbol.clone(), candle: c.clone() });
            }
        })?);
        let s = Arc::clone(&sink);
        subs.push(hub.subscribe_to_option_chain(&symbol, move |c| s.forward(Event::OptionChain(c.clone())))?);
    }

    let s = Arc::clone(&sink);
    subs.push(notifications.subscribe(move |n| s.forward(Event::Notification(n.clone()))));

    // fresh cell, set exactly once
    let _ = sink.subs.set(subs);
    Ok(RecorderLink { sink })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Topic;
    use crate::notifications::NotificationEvent;
    use crate::seed::default_universe;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/events.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run(rx, path_str));

        let hub = Hub::new(["TCS"]);
        let center = NotificationCenter::new();
        let link = attach(&hub, &center, tx.clone()).unwrap();
        assert_eq!(link.len(), 2 + 2 + 1);

        hub.publish_quotes(Category::Stocks, default_universe().stocks);
        center.record(NotificationEvent::system("hello"));
        tx.send(Record::now(Event::Note("bye".into()))).await.unwrap();

        drop(link);
        drop(hub);
        drop(center);
        drop(tx);
        task.await.unwrap().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let kinds: Vec<String> = text
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event"]["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["stocks", "notification", "note"]);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let hub = Hub::new(Vec::<String>::new());
        let center = NotificationCenter::new();
        let _link = attach(&hub, &center, tx).unwrap();

        hub.publish_quotes(Category::Indices, default_universe().indices);
        hub.publish_quotes(Category::Indices, default_universe().indices);

        assert!(matches!(rx.recv().await.map(|r| r.event), Some(Event::Indices(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_recorder_detaches_instead_of_warning_forever() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be -> open fails, run returns
        let path = dir.path().to_string_lossy().to_string();
        let (tx, rx) = mpsc::channel(8);
        assert!(run(rx, path).await.is_err());

        let hub = Hub::new(["INFY"]);
        let center = NotificationCenter::new();
        let link = attach(&hub, &center, tx).unwrap();
        assert_eq!(link.active(), 5);

        hub.publish_quotes(Category::Stocks, default_universe().stocks);
        assert_eq!(link.active(), 0);
        assert_eq!(hub.subscriber_count(&Topic::Stocks), 0);
        assert_eq!(hub.subscriber_count(&Topic::Chart("INFY".into())), 0);
        assert_eq!(center.subscriber_count(), 0);

        // later publishes reach nobody
        let d = hub.publish_quotes(Category::Stocks, default_universe().stocks);
        assert_eq!(d.delivered, 0);
        assert_eq!(link.detach(), 0);
    }
}
