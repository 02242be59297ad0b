// ===============================
// src/lib.rs
// ===============================
//
// Simulated real-time market data: seeded NSE universe, per-feed random-walk
// ticks, in-process fan-out, alert rules and a notification log.
//
pub mod alerts;
pub mod config;
pub mod engine;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod notifications;
pub mod recorder;
pub mod runtime;
pub mod scheduler;
pub mod seed;
pub mod session;

pub use alerts::{AlertCondition, AlertError, AlertRule, AlertService, TriggeredAlert};
pub use config::SimConfig;
pub use engine::MarketEngine;
pub use hub::{Category, ChartUpdate, Delivery, FeedError, Hub, Subscription, Topic, TopicKey};
pub use model::{Candle, CandleWindow, OptionChain, OptionKind, OptionLeg, Quote};
pub use notifications::{Notification, NotificationCenter, NotificationEvent, NotificationKind};
pub use scheduler::{Feed, FeedPeriods};
pub use session::MarketSession;
