//! Alert cooldown: suppresses duplicate alerts for the same anomaly
//! class and resource set within a configurable window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::detect::Anomaly;

/// Tracks the last fire time per `(kind, sorted resources)` key. Entries
/// older than twice the window are pruned on every write.
pub struct CooldownTracker {
    window: Duration,
    recent: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(cooldown_minutes: i64) -> Self {
        Self {
            window: Duration::minutes(cooldown_minutes.max(0)),
            recent: HashMap::new(),
        }
    }

    fn key(anomaly: &Anomaly) -> String {
        let mut resources = anomaly.affected_resources.clone();
        resources.sort();
        format!("{}:{}", anomaly.kind.as_str(), resources.join("-"))
    }

    /// True iff an alert with the same key fired less than one window ago.
    pub fn is_on_cooldown(&self, anomaly: &Anomaly, now: DateTime<Utc>) -> bool {
        match self.recent.get(&Self::key(anomaly)) {
            Some(last_fired) => now < *last_fired + self.window,
            None => false,
        }
    }

    /// Record a fired alert and prune stale entries.
    pub fn track(&mut self, anomaly: &Anomaly, now: DateTime<Utc>) {
        self.recent.insert(Self::key(anomaly), now);
        let cutoff = now - self.window * 2;
        self.recent.retain(|_, fired| *fired > cutoff);
    }

    pub fn tracked_count(&self) -> usize {
        self.recent.len()
    }
}
