// ===============================
// src/runtime.rs
// ===============================
//
// Wall-clock driver: moves a MarketEngine onto a tokio task and maps tokio
// time onto the scheduler's logical clock.
//
//   logical = Instant::now() - origin
//
// The task sleeps until the next feed deadline, runs everything due, and
// goes back to sleep. Pause/resume go through a control channel so the
// engine is only ever touched from its own task. On shutdown all feeds are
// stopped and the engine is handed back.
//

use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

use crate::engine::MarketEngine;
use crate::hub::Hub;
use crate::scheduler::Feed;

const CONTROL_CAPACITY: usize = 32;

enum Control {
    Start(Feed, oneshot::Sender<bool>),
    Stop(Feed, oneshot::Sender<bool>),
}

pub struct RunningEngine {
    hub: Hub,
    control_tx: mpsc::Sender<Control>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<MarketEngine>>,
}

/// Starts driving `engine` on the current tokio runtime. Feeds keep whatever
/// running state they had; call `MarketEngine::start` first to run them all.
pub fn spawn(engine: MarketEngine) -> RunningEngine {
    let hub = engine.hub().clone();
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(drive(engine, control_rx, shutdown_rx));
    RunningEngine { hub, control_tx, shutdown_tx, task: Some(task) }
}

async fn drive(
    mut engine: MarketEngine,
    mut control: mpsc::Receiver<Control>,
    mut shutdown: watch::Receiver<bool>,
) -> MarketEngine {
    let origin = Instant::now()
        .checked_sub(engine.scheduler().now())
        .unwrap_or_else(Instant::now);
    let logical_now = || Instant::now().saturating_duration_since(origin);
    let feeds: Vec<Feed> = Feed::ALL.into_iter().filter(|f| engine.is_running(*f)).collect();
    info!(?feeds, "engine driver started");

    loop {
        // no running feed -> only control/shutdown can wake us
        let deadline = engine.next_deadline();

        select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            cmd = control.recv() => {
                let Some(cmd) = cmd else { break };
                // catch up first so the command applies at the current instant
                engine.advance_to(logical_now());
                match cmd {
                    Control::Start(feed, reply) => {
                        let _ = reply.send(engine.start_feed(feed));
                    }
                    Control::Stop(feed, reply) => {
                        let _ = reply.send(engine.stop_feed(feed));
                    }
                }
            }
            _ = sleep_until(origin + deadline.unwrap_or_default()), if deadline.is_some() => {
                engine.advance_to(logical_now());
            }
        }
    }

    engine.stop();
    info!(logical_ms = engine.scheduler().now().as_millis() as u64, "engine driver stopped");
    engine
}

impl RunningEngine {
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops one feed. False if it was already stopped or the driver is gone.
    pub async fn pause_feed(&self, feed: Feed) -> bool {
        self.request(|reply| Control::Stop(feed, reply)).await
    }

    /// Restarts one feed; its first tick is one period from now.
    pub async fn resume_feed(&self, feed: Feed) -> bool {
        self.request(|reply| Control::Start(feed, reply)).await
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<bool>) -> Control) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control_tx.send(make(reply_tx)).await.is_err() {
            warn!("engine driver not running; control request dropped");
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Stops every feed and returns the engine. Idempotent: later calls
    /// return None. No subscriber is invoked after this resolves.
    pub async fn stop(&mut self) -> Option<MarketEngine> {
        let task = self.task.take()?;
        let _ = self.shutdown_tx.send(true);
        match task.await {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!(error = %e, "engine driver failed");
                None
            }
        }
    }
}

impl Drop for RunningEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}
