// ===============================
// src/notifications.rs
// ===============================
//
// Notification sink: append-only log + read flags + its own subscribers.
// mark_read / mark_all_read / delete are no-ops on unknown ids.
// unread_count() is always recomputed from the log, never cached.
//

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::hub::{Registry, Subscription, TopicKey};
use crate::metrics::{NOTIFICATIONS, NOTIFICATIONS_UNREAD};

/// Registry key for the notification stream; there is only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inbox;

impl fmt::Display for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl TopicKey for Inbox {
    fn kind(&self) -> &'static str {
        "notifications"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    News,
    Trade,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::News => "news",
            NotificationKind::Trade => "trade",
            NotificationKind::System => "system",
        }
    }
}

/// Something worth telling the user; becomes a `Notification` once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub symbol: Option<String>,
}

impl NotificationEvent {
    pub fn news(title: impl Into<String>, message: impl Into<String>, symbol: Option<&str>) -> Self {
        Self {
            kind: NotificationKind::News,
            title: title.into(),
            message: message.into(),
            symbol: symbol.map(str::to_string),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self { kind: NotificationKind::System, title: "System".into(), message: message.into(), symbol: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub symbol: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Clone, Default)]
pub struct NotificationCenter {
    log: Arc<Mutex<Vec<Notification>>>,
    listeners: Registry<Inbox, Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an unread notification and re-notifies subscribers.
    pub fn record(&self, event: NotificationEvent) -> Notification {
        let n = Notification {
            id: Uuid::new_v4(),
            kind: event.kind,
            title: event.title,
            message: event.message,
            symbol: event.symbol,
            created_at: Utc::now(),
            read: false,
        };
        {
            let mut log = self.log.lock();
            log.push(n.clone());
            NOTIFICATIONS_UNREAD.set(unread_in(&log) as i64);
        }
        NOTIFICATIONS.with_label_values(&[n.kind.as_str()]).inc();
        debug!(id = %n.id, kind = n.kind.as_str(), "notification recorded");
        self.listeners.publish(&Inbox, n.clone());
        n
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Inbox, callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.subscriber_count(&Inbox)
    }

    /// Newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().iter().rev().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.log.lock().iter().find(|n| n.id == id).cloned()
    }

    /// True when the notification existed and was unread.
    pub fn mark_read(&self, id: Uuid) -> bool {
        self.mutate(|log| match log.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        })
    }

    /// Number of notifications flipped to read.
    pub fn mark_all_read(&self) -> usize {
        self.mutate(|log| {
            let mut flipped = 0;
            for n in log.iter_mut().filter(|n| !n.read) {
                n.read = true;
                flipped += 1;
            }
            flipped
        })
    }

    pub fn delete(&self, id: Uuid) -> bool {
        self.mutate(|log| {
            let before = log.len();
            log.retain(|n| n.id != id);
            log.len() != before
        })
    }

    pub fn unread_count(&self) -> usize {
        unread_in(&self.log.lock())
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Notification>) -> R) -> R {
        let mut log = self.log.lock();
        let out = f(&mut log);
        NOTIFICATIONS_UNREAD.set(unread_in(&log) as i64);
        out
    }
}

fn unread_in(log: &[Notification]) -> usize {
    log.iter().filter(|n| !n.read).count()
}
