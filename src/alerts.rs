// ===============================
// src/alerts.rs
// ===============================
//
// Alert rules per (watchlist, symbol), checked against every stock snapshot.
//
//   above X           -> price > X
//   below X           -> price < X
//   percent_change X  -> |change_percent| > X
//   volume X          -> volume > X
//
// A rule fires once: triggered goes false -> true and never back. Rules for
// symbols with no snapshot are skipped, not errors.
//

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::hub::{normalize_symbol, Category, Hub, Subscription};
use crate::metrics::ALERTS_TRIGGERED;
use crate::model::Quote;
use crate::notifications::{Notification, NotificationCenter, NotificationEvent, NotificationKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("invalid threshold {0:?}: expected a non-negative number")]
    InvalidThreshold(String),
    #[error("unknown alert condition {0:?}")]
    InvalidCondition(String),
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Above,
    Below,
    PercentChange,
    Volume,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
            AlertCondition::PercentChange => "percent_change",
            AlertCondition::Volume => "volume",
        }
    }

    pub fn is_met(&self, quote: &Quote, threshold: f64) -> bool {
        match self {
            AlertCondition::Above => quote.price > threshold,
            AlertCondition::Below => quote.price < threshold,
            AlertCondition::PercentChange => quote.change_percent.abs() > threshold,
            AlertCondition::Volume => quote.volume as f64 > threshold,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCondition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | "price_above" | ">" => Ok(AlertCondition::Above),
            "below" | "price_below" | "<" => Ok(AlertCondition::Below),
            "percent_change" | "change" | "%" => Ok(AlertCondition::PercentChange),
            "volume" | "vol" => Ok(AlertCondition::Volume),
            _ => Err(AlertError::InvalidCondition(s.to_string())),
        }
    }
}

/// Parses user threshold text; rejects non-numeric, non-finite and negative input.
pub fn parse_threshold(input: &str) -> Result<f64, AlertError> {
    let cleaned: String = input.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(AlertError::InvalidThreshold(input.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub watchlist_id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub triggered: bool,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// A rule that crossed its threshold, with the snapshot values that did it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub rule_id: Uuid,
    pub watchlist_id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub price: f64,
    pub change_percent: f64,
    pub volume: u64,
}

impl TriggeredAlert {
    fn new(rule: &AlertRule, quote: &Quote) -> Self {
        Self {
            rule_id: rule.id,
            watchlist_id: rule.watchlist_id.clone(),
            symbol: rule.symbol.clone(),
            condition: rule.condition,
            threshold: rule.threshold,
            price: quote.price,
            change_percent: quote.change_percent,
            volume: quote.volume,
        }
    }

    pub fn message(&self) -> String {
        match self.condition {
            AlertCondition::Above => format!(
                "{} price is above ₹{:.2} (now ₹{:.2})",
                self.symbol, self.threshold, self.price
            ),
            AlertCondition::Below => format!(
                "{} price is below ₹{:.2} (now ₹{:.2})",
                self.symbol, self.threshold, self.price
            ),
            AlertCondition::PercentChange => format!(
                "{} moved {:+.2}% (threshold {:.2}%)",
                self.symbol, self.change_percent, self.threshold
            ),
            AlertCondition::Volume => format!(
                "{} volume {} exceeded {:.0}",
                self.symbol, self.volume, self.threshold
            ),
        }
    }
}

impl From<&TriggeredAlert> for NotificationEvent {
    fn from(t: &TriggeredAlert) -> Self {
        NotificationEvent {
            kind: NotificationKind::Alert,
            title: format!("Price alert: {}", t.symbol),
            message: t.message(),
            symbol: Some(t.symbol.clone()),
        }
    }
}

/// Pure check: every not-yet-triggered rule whose symbol's snapshot meets
/// its condition. Does not mutate the rules.
pub fn evaluate(stocks: &[Quote], rules: &[AlertRule]) -> Vec<TriggeredAlert> {
    let by_symbol: HashMap<&str, &Quote> = stocks.iter().map(|q| (q.symbol.as_str(), q)).collect();
    rules
        .iter()
        .filter(|r| !r.triggered)
        .filter_map(|r| {
            let quote = by_symbol.get(r.symbol.as_str())?;
            r.condition
                .is_met(quote, r.threshold)
                .then(|| TriggeredAlert::new(r, quote))
        })
        .collect()
}

type RuleKey = (String, String);

/// Rules grouped by (watchlist_id, symbol).
#[derive(Debug, Default)]
pub struct AlertBook {
    rules: BTreeMap<RuleKey, Vec<AlertRule>>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_rule(
        &mut self,
        watchlist_id: &str,
        symbol: &str,
        condition: AlertCondition,
        threshold: &str,
    ) -> Result<AlertRule, AlertError> {
        let threshold = parse_threshold(threshold)?;
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::UnknownSymbol(symbol));
        }
        let rule = AlertRule {
            id: Uuid::new_v4(),
            watchlist_id: watchlist_id.to_string(),
            symbol: symbol.clone(),
            condition,
            threshold,
            triggered: false,
            created_at: Utc::now(),
            triggered_at: None,
        };
        self.rules
            .entry((watchlist_id.to_string(), symbol))
            .or_default()
            .push(rule.clone());
        Ok(rule)
    }

    /// Idempotent; true if a rule was removed.
    pub fn delete_rule(&mut self, watchlist_id: &str, symbol: &str, rule_id: Uuid) -> bool {
        let key = (watchlist_id.to_string(), normalize_symbol(symbol));
        let Some(list) = self.rules.get_mut(&key) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != rule_id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.rules.remove(&key);
        }
        removed
    }

    pub fn rules_for(&self, watchlist_id: &str, symbol: &str) -> &[AlertRule] {
        self.rules
            .get(&(watchlist_id.to_string(), normalize_symbol(symbol)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rules(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks every pending rule and latches the ones that fire.
    pub fn evaluate(&mut self, stocks: &[Quote]) -> Vec<TriggeredAlert> {
        let by_symbol: HashMap<&str, &Quote> = stocks.iter().map(|q| (q.symbol.as_str(), q)).collect();
        let now = Utc::now();
        let mut fired = Vec::new();
        for rule in self.rules.values_mut().flatten() {
            if rule.triggered {
                continue;
            }
            let Some(quote) = by_symbol.get(rule.symbol.as_str()) else {
                continue;
            };
            if rule.condition.is_met(quote, rule.threshold) {
                rule.triggered = true;
                rule.triggered_at = Some(now);
                fired.push(TriggeredAlert::new(rule, quote));
            }
        }
        fired
    }
}

/// Shared alert book wired to the stock feed; every trigger becomes one
/// notification.
#[derive(Clone)]
pub struct AlertService {
    book: Arc<Mutex<AlertBook>>,
    notifications: NotificationCenter,
}

impl AlertService {
    pub fn new(notifications: NotificationCenter) -> Self {
        Self { book: Arc::new(Mutex::new(AlertBook::new())), notifications }
    }

    pub fn create_rule(
        &self,
        watchlist_id: &str,
        symbol: &str,
        condition: AlertCondition,
        threshold: &str,
    ) -> Result<AlertRule, AlertError> {
        let rule = self.book.lock().create_rule(watchlist_id, symbol, condition, threshold)?;
        info!(
            rule = %rule.id,
            watchlist = %rule.watchlist_id,
            symbol = %rule.symbol,
            condition = %rule.condition,
            threshold = rule.threshold,
            "alert rule created"
        );
        Ok(rule)
    }

    pub fn delete_rule(&self, watchlist_id: &str, symbol: &str, rule_id: Uuid) -> bool {
        self.book.lock().delete_rule(watchlist_id, symbol, rule_id)
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.book.lock().rules().cloned().collect()
    }

    pub fn rules_for(&self, watchlist_id: &str, symbol: &str) -> Vec<AlertRule> {
        self.book.lock().rules_for(watchlist_id, symbol).to_vec()
    }

    /// Evaluates `stocks` and records a notification per fired rule.
    pub fn process(&self, stocks: &[Quote]) -> Vec<Notification> {
        // lock dilepas sebelum record() -> subscriber notifikasi bebas memanggil kita lagi
        let fired = self.book.lock().evaluate(stocks);
        fired
            .iter()
            .map(|t| {
                ALERTS_TRIGGERED.with_label_values(&[t.condition.as_str()]).inc();
                info!(rule = %t.rule_id, symbol = %t.symbol, condition = %t.condition, price = t.price, "alert triggered");
                self.notifications.record(t.into())
            })
            .collect()
    }

    /// Subscribes to the stock category and processes every snapshot.
    pub fn attach(&self, hub: &Hub) -> Subscription {
        let svc = self.clone();
        hub.subscribe_to_category(Category::Stocks, move |stocks| {
            svc.process(stocks);
        })
    }
}
