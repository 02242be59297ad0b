// ===============================
// src/hub.rs
// ===============================
//
// Fan-out registry: Topic -> ordered list of callbacks.
// - publish() calls every live callback synchronously, in registration order.
// - Each call is wrapped in catch_unwind: a panicking subscriber is logged and
//   counted, the rest still run, the publisher never unwinds.
// - No lock is held while callbacks run, so a callback may subscribe or
//   unsubscribe (itself included) mid-publish.
// - Unsubscribe flips the handle's flag and removes the entry right away.
//   The flag is re-checked right before every call, so a handle unsubscribed
//   during an in-flight publish is never invoked again.
//

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{DELIVERIES, PUBLISHES, SUBSCRIBER_FAILURES};
use crate::model::{Candle, OptionChain, Quote};

/// Registry key: Eq + Hash for lookup, Display for logs, `kind` for metrics.
pub trait TopicKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    /// Low-cardinality label for metrics.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Stocks,
    Indices,
    Chart(String),
    OptionChain(String),
}

impl TopicKey for Topic {
    fn kind(&self) -> &'static str {
        match self {
            Topic::Stocks => "stocks",
            Topic::Indices => "indices",
            Topic::Chart(_) => "chart",
            Topic::OptionChain(_) => "option_chain",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Chart(sym) | Topic::OptionChain(sym) => write!(f, "{}:{}", self.kind(), sym),
            _ => f.write_str(self.kind()),
        }
    }
}

/// Global quote categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Stocks,
    Indices,
}

impl From<Category> for Topic {
    fn from(c: Category) -> Self {
        match c {
            Category::Stocks => Topic::Stocks,
            Category::Indices => Topic::Indices,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for Delivery {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.failed += rhs.failed;
    }
}

/// Handle returned by `subscribe`. Dropping it does NOT unsubscribe.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    topic: String,
    active: Arc<AtomicBool>,
    detach: Box<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Stops further deliveries and drops the registry entry. Returns true
    /// only on the first call.
    pub fn unsubscribe(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if was_active {
            (self.detach)();
            debug!(topic = %self.topic, id = self.id, "unsubscribed");
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display form of the key, e.g. `chart:TCS`.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<T>,
}

struct Inner<K, T> {
    next_id: u64,
    subscribers: HashMap<K, Vec<Entry<T>>>,
    latest: HashMap<K, Arc<T>>,
}

impl<K: TopicKey, T> Inner<K, T> {
    fn remove(&mut self, topic: &K, id: u64) {
        if let Some(list) = self.subscribers.get_mut(topic) {
            list.retain(|e| e.id != id);
            if list.is_empty() {
                self.subscribers.remove(topic);
            }
        }
    }
}

/// Keyed callback registry for one snapshot type. Cheap to clone.
pub struct Registry<K, T> {
    inner: Arc<Mutex<Inner<K, T>>>,
}

impl<K, T> Clone for Registry<K, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: TopicKey, T: Send + Sync + 'static> Default for Registry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<K: TopicKey, T: Send + Sync + 'static> Registry<K, T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                subscribers: HashMap::new(),
                latest: HashMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, topic: K, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .subscribers
                .entry(topic.clone())
                .or_default()
                .push(Entry { id, active: Arc::clone(&active), callback: Arc::new(callback) });
            id
        };
        debug!(%topic, id, "subscribed");

        let weak: Weak<Mutex<Inner<K, T>>> = Arc::downgrade(&self.inner);
        let label = topic.to_string();
        let detach = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().remove(&topic, id);
            }
        });
        Subscription { id, topic: label, active, detach }
    }

    /// Stores `snapshot` as the latest value for `topic` and hands it to every
    /// live subscriber.
    pub fn publish(&self, topic: &K, snapshot: T) -> Delivery {
        let snapshot = Arc::new(snapshot);
        let targets: Vec<(Arc<AtomicBool>, Callback<T>)> = {
            let mut inner = self.inner.lock();
            inner.latest.insert(topic.clone(), Arc::clone(&snapshot));
            inner.subscribers.get(topic).map_or_else(Vec::new, |list| {
                list.iter()
                    .map(|e| (Arc::clone(&e.active), Arc::clone(&e.callback)))
                    .collect()
            })
        };
        PUBLISHES.with_label_values(&[topic.kind()]).inc();

        let mut out = Delivery::default();
        for (active, callback) in targets {
            // may have been unsubscribed by an earlier callback of this publish
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot))) {
                Ok(()) => out.delivered += 1,
                Err(payload) => {
                    out.failed += 1;
                    SUBSCRIBER_FAILURES.with_label_values(&[topic.kind()]).inc();
                    warn!(%topic, reason = %panic_message(payload.as_ref()), "subscriber callback panicked");
                }
            }
        }
        DELIVERIES
            .with_label_values(&[topic.kind()])
            .inc_by(out.delivered as u64);
        out
    }

    pub fn latest(&self, topic: &K) -> Option<Arc<T>> {
        self.inner.lock().latest.get(topic).cloned()
    }

    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(topic)
            .map_or(0, |list| list.iter().filter(|e| e.active.load(Ordering::Acquire)).count())
    }

    /// Entries held for `topic`, live or not.
    #[cfg(test)]
    pub(crate) fn stored(&self, topic: &K) -> usize {
        self.inner.lock().subscribers.get(topic).map_or(0, Vec::len)
    }
}

/// Full chart window for one symbol, as published on `Topic::Chart`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartUpdate {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

impl ChartUpdate {
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// The market-data side of the fan-out: one registry per snapshot shape plus
/// the set of symbols that have per-symbol feeds.
#[derive(Clone)]
pub struct Hub {
    quotes: Registry<Topic, Vec<Quote>>,
    charts: Registry<Topic, ChartUpdate>,
    chains: Registry<Topic, OptionChain>,
    universe: Arc<HashSet<String>>,
}

impl Hub {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let universe = symbols.into_iter().map(|s| normalize_symbol(s.as_ref())).collect();
        Self {
            quotes: Registry::new(),
            charts: Registry::new(),
            chains: Registry::new(),
            universe: Arc::new(universe),
        }
    }

    pub fn knows(&self, symbol: &str) -> bool {
        self.universe.contains(&normalize_symbol(symbol))
    }

    /// Symbols with chart / option-chain feeds, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.universe.iter().cloned().collect();
        out.sort();
        out
    }

    fn resolve(&self, symbol: &str) -> Result<String, FeedError> {
        let sym = normalize_symbol(symbol);
        if self.universe.contains(&sym) {
            Ok(sym)
        } else {
            Err(FeedError::UnknownSymbol(sym))
        }
    }

    pub fn subscribe_to_category<F>(&self, category: Category, callback: F) -> Subscription
    where
        F: Fn(&Vec<Quote>) + Send + Sync + 'static,
    {
        self.quotes.subscribe(category.into(), callback)
    }

    pub fn subscribe_to_chart<F>(&self, symbol: &str, callback: F) -> Result<Subscription, FeedError>
    where
        F: Fn(&ChartUpdate) + Send + Sync + 'static,
    {
        let sym = self.resolve(symbol)?;
        Ok(self.charts.subscribe(Topic::Chart(sym), callback))
    }

    pub fn subscribe_to_option_chain<F>(&self, symbol: &str, callback: F) -> Result<Subscription, FeedError>
    where
        F: Fn(&OptionChain) + Send + Sync + 'static,
    {
        let sym = self.resolve(symbol)?;
        Ok(self.chains.subscribe(Topic::OptionChain(sym), callback))
    }

    pub fn publish_quotes(&self, category: Category, quotes: Vec<Quote>) -> Delivery {
        self.quotes.publish(&category.into(), quotes)
    }

    pub fn publish_chart(&self, update: ChartUpdate) -> Delivery {
        let topic = Topic::Chart(update.symbol.clone());
        self.charts.publish(&topic, update)
    }

    pub fn publish_option_chain(&self, chain: OptionChain) -> Delivery {
        let topic = Topic::OptionChain(chain.symbol.clone());
        self.chains.publish(&topic, chain)
    }

    pub fn latest_quotes(&self, category: Category) -> Option<Arc<Vec<Quote>>> {
        self.quotes.latest(&category.into())
    }

    pub fn latest_chart(&self, symbol: &str) -> Option<Arc<ChartUpdate>> {
        self.charts.latest(&Topic::Chart(normalize_symbol(symbol)))
    }

    pub fn latest_option_chain(&self, symbol: &str) -> Option<Arc<OptionChain>> {
        self.chains.latest(&Topic::OptionChain(normalize_symbol(symbol)))
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::Stocks | Topic::Indices => self.quotes.subscriber_count(topic),
            Topic::Chart(_) => self.charts.subscriber_count(topic),
            Topic::OptionChain(_) => self.chains.subscriber_count(topic),
        }
    }
}
