// ===============================
// src/session.rs
// ===============================
//
// MarketSession: one engine + its hub + alert rules + notification log,
// behind a single handle. This is the surface main.rs (or an embedding
// app) talks to.
//

use std::mem;

use tokio::runtime::Handle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::{AlertCondition, AlertError, AlertRule, AlertService};
use crate::config::SimConfig;
use crate::engine::MarketEngine;
use crate::hub::{normalize_symbol, Category, ChartUpdate, FeedError, Hub, Subscription};
use crate::model::{OptionChain, Quote};
use crate::notifications::{Notification, NotificationCenter};
use crate::runtime::{self, RunningEngine};
use crate::scheduler::Feed;

enum EngineSlot {
    Idle(MarketEngine),
    Running(RunningEngine),
    /// Driver task died; nothing left to restart.
    Gone,
}

pub struct MarketSession {
    hub: Hub,
    alerts: AlertService,
    notifications: NotificationCenter,
    alert_link: Subscription,
    engine: EngineSlot,
}

impl MarketSession {
    pub fn new(cfg: SimConfig) -> Self {
        Self::with_engine(MarketEngine::new(cfg))
    }

    pub fn with_engine(engine: MarketEngine) -> Self {
        let hub = engine.hub().clone();
        let notifications = NotificationCenter::new();
        let alerts = AlertService::new(notifications.clone());
        let alert_link = alerts.attach(&hub);
        Self { hub, alerts, notifications, alert_link, engine: EngineSlot::Idle(engine) }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    // ---- subscriptions ----

    pub fn subscribe_to_category<F>(&self, category: Category, callback: F) -> Subscription
    where
        F: Fn(&Vec<Quote>) + Send + Sync + 'static,
    {
        self.hub.subscribe_to_category(category, callback)
    }

    pub fn subscribe_to_chart<F>(&self, symbol: &str, callback: F) -> Result<Subscription, FeedError>
    where
        F: Fn(&ChartUpdate) + Send + Sync + 'static,
    {
        self.hub.subscribe_to_chart(symbol, callback)
    }

    pub fn subscribe_to_option_chain<F>(&self, symbol: &str, callback: F) -> Result<Subscription, FeedError>
    where
        F: Fn(&OptionChain) + Send + Sync + 'static,
    {
        self.hub.subscribe_to_option_chain(symbol, callback)
    }

    pub fn subscribe_to_notifications<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notifications.subscribe(callback)
    }

    // ---- lifecycle ----

    /// Starts every feed on a background task. False if already running or
    /// when called outside a tokio runtime.
    pub fn start(&mut self) -> bool {
        if Handle::try_current().is_err() {
            warn!("market session start ignored: no tokio runtime");
            return false;
        }
        match mem::replace(&mut self.engine, EngineSlot::Gone) {
            EngineSlot::Idle(mut engine) => {
                engine.start();
                self.engine = EngineSlot::Running(runtime::spawn(engine));
                info!("market session started");
                true
            }
            other => {
                self.engine = other;
                false
            }
        }
    }

    /// Stops every feed; once this resolves no subscriber is invoked by the
    /// engine. False if it was not running.
    pub async fn stop(&mut self) -> bool {
        let EngineSlot::Running(running) = &mut self.engine else {
            return false;
        };
        match running.stop().await {
            Some(engine) => {
                self.engine = EngineSlot::Idle(engine);
                info!("market session stopped");
            }
            None => {
                warn!("market session stopped without recovering the engine");
                self.engine = EngineSlot::Gone;
            }
        }
        true
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.engine, EngineSlot::Running(r) if r.is_running())
    }

    pub async fn pause_feed(&mut self, feed: Feed) -> bool {
        match &mut self.engine {
            EngineSlot::Idle(engine) => engine.stop_feed(feed),
            EngineSlot::Running(running) => running.pause_feed(feed).await,
            EngineSlot::Gone => false,
        }
    }

    pub async fn resume_feed(&mut self, feed: Feed) -> bool {
        match &mut self.engine {
            // idle engine: feed will run on the next start()
            EngineSlot::Idle(_) => false,
            EngineSlot::Running(running) => running.resume_feed(feed).await,
            EngineSlot::Gone => false,
        }
    }

    /// Direct access to the engine while it is not running.
    pub fn engine(&self) -> Option<&MarketEngine> {
        match &self.engine {
            EngineSlot::Idle(e) => Some(e),
            _ => None,
        }
    }

    pub fn engine_mut(&mut self) -> Option<&mut MarketEngine> {
        match &mut self.engine {
            EngineSlot::Idle(e) => Some(e),
            _ => None,
        }
    }

    // ---- alerts ----

    pub fn create_alert_rule(
        &self,
        watchlist_id: &str,
        symbol: &str,
        condition: &str,
        threshold: &str,
    ) -> Result<AlertRule, AlertError> {
        let condition: AlertCondition = condition.parse()?;
        if !self.hub.knows(symbol) {
            return Err(AlertError::UnknownSymbol(normalize_symbol(symbol)));
        }
        self.alerts.create_rule(watchlist_id, symbol, condition, threshold)
    }

    pub fn delete_alert_rule(&self, watchlist_id: &str, symbol: &str, rule_id: Uuid) -> bool {
        self.alerts.delete_rule(watchlist_id, symbol, rule_id)
    }

    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.alerts.rules()
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    /// Stops alert evaluation on new stock snapshots. Idempotent.
    pub fn detach_alerts(&self) -> bool {
        self.alert_link.unsubscribe()
    }

    // ---- notifications ----

    /// Newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.notifications()
    }

    pub fn mark_read(&self, id: Uuid) -> bool {
        self.notifications.mark_read(id)
    }

    pub fn mark_all_read(&self) -> usize {
        self.notifications.mark_all_read()
    }

    pub fn delete_notification(&self, id: Uuid) -> bool {
        self.notifications.delete(id)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }

    pub fn notification_center(&self) -> &NotificationCenter {
        &self.notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> MarketSession {
        MarketSession::new(SimConfig::seeded(11))
    }

    #[test]
    fn alert_rules_validate_symbol_condition_and_threshold() {
        let s = session();
        assert_eq!(
            s.create_alert_rule("wl", "ACME", "above", "10").unwrap_err(),
            AlertError::UnknownSymbol("ACME".into())
        );
        assert!(matches!(
            s.create_alert_rule("wl", "TCS", "sideways", "10"),
            Err(AlertError::InvalidCondition(_))
        ));
        assert!(matches!(
            s.create_alert_rule("wl", "TCS", "below", "abc"),
            Err(AlertError::InvalidThreshold(_))
        ));
        assert!(s.alert_rules().is_empty());

        let r = s.create_alert_rule("wl", "tcs", "below", "3900").unwrap();
        assert_eq!(s.alert_rules(), vec![r.clone()]);
        assert!(s.delete_alert_rule("wl", "TCS", r.id));
        assert!(!s.delete_alert_rule("wl", "TCS", r.id));
    }

    #[test]
    fn stock_tick_turns_crossed_rule_into_one_notification() {
        let mut s = session();
        s.create_alert_rule("wl", "RELIANCE", "above", "2650").unwrap();
        assert_eq!(s.unread_count(), 0, "no evaluation at creation time");

        let engine = s.engine_mut().unwrap();
        engine.start();
        engine.advance(Duration::from_secs(5));
        assert_eq!(s.unread_count(), 1);

        s.engine_mut().unwrap().advance(Duration::from_secs(60));
        assert_eq!(s.notifications().len(), 1);

        let n = &s.notifications()[0];
        assert_eq!(n.symbol.as_deref(), Some("RELIANCE"));
        assert!(s.mark_read(n.id));
        assert_eq!(s.unread_count(), 0);
        assert!(s.alert_rules()[0].triggered);
    }

    #[test]
    fn detached_alerts_stop_evaluating() {
        let mut s = session();
        s.create_alert_rule("wl", "RELIANCE", "above", "2650").unwrap();
        assert!(s.detach_alerts());
        assert!(!s.detach_alerts());
        let engine = s.engine_mut().unwrap();
        engine.start();
        engine.advance(Duration::from_secs(30));
        assert!(s.notifications().is_empty());
    }

    #[test]
    fn start_outside_a_runtime_is_refused() {
        let mut s = session();
        assert!(!s.start());
        assert!(!s.is_running());
        assert!(s.engine().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_round_trip() {
        let mut s = session();
        assert!(s.start());
        assert!(!s.start());
        assert!(s.is_running());
        assert!(s.engine().is_none());

        assert!(s.pause_feed(Feed::Chart).await);
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert!(s.stop().await);
        assert!(!s.stop().await);
        assert!(!s.is_running());
        let engine = s.engine().unwrap();
        assert!(!engine.is_running(Feed::Stocks));

        // restart picks the logical clock up where it stopped
        assert!(s.start());
        assert!(s.stop().await);
    }
}
