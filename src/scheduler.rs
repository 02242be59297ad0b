// ===============================
// src/scheduler.rs
// ===============================
//
// Four independent fixed-period triggers on a logical clock.
// - No jitter, no backoff: trigger k fires at start + n * period.
// - The clock only moves through `pop_due` / `advance_to`, so tests can drive
//   time deterministically; `runtime` maps it onto tokio wall-clock time.
//

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Stocks,
    Indices,
    OptionChain,
    Chart,
}

impl Feed {
    /// Tie-break order when several triggers share a deadline.
    pub const ALL: [Feed; 4] = [Feed::Stocks, Feed::Indices, Feed::OptionChain, Feed::Chart];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Stocks => "stocks",
            Feed::Indices => "indices",
            Feed::OptionChain => "option_chain",
            Feed::Chart => "chart",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firing period per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPeriods {
    pub stocks: Duration,
    pub indices: Duration,
    pub option_chain: Duration,
    pub chart: Duration,
}

impl Default for FeedPeriods {
    fn default() -> Self {
        Self {
            stocks: Duration::from_secs(5),
            indices: Duration::from_secs(10),
            option_chain: Duration::from_secs(15),
            chart: Duration::from_secs(10),
        }
    }
}

impl FeedPeriods {
    pub fn get(&self, feed: Feed) -> Duration {
        match feed {
            Feed::Stocks => self.stocks,
            Feed::Indices => self.indices,
            Feed::OptionChain => self.option_chain,
            Feed::Chart => self.chart,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Trigger {
    period: Duration,
    next_due: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    now: Duration,
    triggers: [Trigger; 4],
}

impl Scheduler {
    /// All triggers start stopped.
    pub fn new(periods: FeedPeriods) -> Self {
        let triggers = Feed::ALL.map(|feed| Trigger {
            period: periods.get(feed).max(MIN_PERIOD),
            next_due: None,
        });
        Self { now: Duration::ZERO, triggers }
    }

    /// Logical time since the scheduler was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn period(&self, feed: Feed) -> Duration {
        self.triggers[feed.index()].period
    }

    pub fn is_running(&self, feed: Feed) -> bool {
        self.triggers[feed.index()].next_due.is_some()
    }

    /// First firing one period from now. No-op (returns false) if already running.
    pub fn start(&mut self, feed: Feed) -> bool {
        let now = self.now;
        let t = &mut self.triggers[feed.index()];
        if t.next_due.is_some() {
            return false;
        }
        t.next_due = Some(now + t.period);
        true
    }

    /// Cancels one trigger. Safe to call on a stopped trigger.
    pub fn stop(&mut self, feed: Feed) -> bool {
        self.triggers[feed.index()].next_due.take().is_some()
    }

    pub fn start_all(&mut self) {
        for feed in Feed::ALL {
            self.start(feed);
        }
    }

    pub fn stop_all(&mut self) {
        for t in self.triggers.iter_mut() {
            t.next_due = None;
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.triggers.iter().filter_map(|t| t.next_due).min()
    }

    /// Pops the earliest trigger due at or before `until`, moving the clock to
    /// its deadline and re-arming it one period later.
    pub fn pop_due(&mut self, until: Duration) -> Option<Feed> {
        let (idx, due) = self
            .triggers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.next_due.map(|due| (i, due)))
            .filter(|&(_, due)| due <= until)
            .min_by_key(|&(i, due)| (due, i))?;

        self.now = self.now.max(due);
        let t = &mut self.triggers[idx];
        t.next_due = Some(due + t.period);
        Some(Feed::ALL[idx])
    }

    /// Moves the clock forward without firing anything. Call after draining
    /// `pop_due`; never moves backwards.
    pub fn settle(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }

    /// Every firing up to and including `until`, in deadline order.
    pub fn advance_to(&mut self, until: Duration) -> Vec<Feed> {
        let mut fired = Vec::new();
        while let Some(feed) = self.pop_due(until) {
            fired.push(feed);
        }
        self.settle(until);
        fired
    }

    pub fn advance(&mut self, dt: Duration) -> Vec<Feed> {
        self.advance_to(self.now + dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn running() -> Scheduler {
        let mut s = Scheduler::new(FeedPeriods::default());
        s.start_all();
        s
    }

    #[test]
    fn nothing_fires_until_started() {
        let mut s = Scheduler::new(FeedPeriods::default());
        assert!(s.advance(secs(60)).is_empty());
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.now(), secs(60));
    }

    #[test]
    fn fires_each_feed_at_its_own_period() {
        let mut s = running();
        let fired = s.advance(secs(30));
        let count = |f: Feed| fired.iter().filter(|&&x| x == f).count();
        assert_eq!(count(Feed::Stocks), 6);
        assert_eq!(count(Feed::Indices), 3);
        assert_eq!(count(Feed::OptionChain), 2);
        assert_eq!(count(Feed::Chart), 3);
    }

    #[test]
    fn firings_come_out_in_deadline_order_with_feed_tiebreak() {
        let mut s = running();
        let fired = s.advance(secs(10));
        assert_eq!(fired, vec![Feed::Stocks, Feed::Stocks, Feed::Indices, Feed::Chart]);
    }

    #[test]
    fn stopping_one_feed_leaves_the_others_alone() {
        let mut s = running();
        assert!(s.stop(Feed::Indices));
        assert!(!s.stop(Feed::Indices));
        let fired = s.advance(secs(20));
        assert!(!fired.contains(&Feed::Indices));
        assert!(fired.contains(&Feed::Stocks));
        assert!(fired.contains(&Feed::Chart));
        assert!(s.is_running(Feed::Stocks));
    }

    #[test]
    fn start_is_idempotent_and_restart_rearms_from_now() {
        let mut s = running();
        assert!(!s.start(Feed::Stocks));
        s.advance(secs(3));
        assert_eq!(s.next_deadline(), Some(secs(5)));

        s.stop(Feed::Stocks);
        s.advance(secs(4));
        assert!(s.start(Feed::Stocks));
        // re-armed at now (7s) + 5s
        s.stop(Feed::Indices);
        s.stop(Feed::OptionChain);
        s.stop(Feed::Chart);
        assert_eq!(s.next_deadline(), Some(secs(12)));
    }

    #[test]
    fn stop_all_clears_every_trigger() {
        let mut s = running();
        s.stop_all();
        s.stop_all();
        assert_eq!(s.next_deadline(), None);
        assert!(Feed::ALL.iter().all(|&f| !s.is_running(f)));
        assert!(s.advance(secs(120)).is_empty());
    }

    #[test]
    fn pop_due_moves_clock_to_deadline() {
        let mut s = running();
        assert_eq!(s.pop_due(secs(4)), None);
        assert_eq!(s.pop_due(secs(100)), Some(Feed::Stocks));
        assert_eq!(s.now(), secs(5));
    }
}
