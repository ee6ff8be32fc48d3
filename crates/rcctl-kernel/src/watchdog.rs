//! [`Watchdog`] – input-source liveness monitor.
//!
//! Streaming input sources (a pose classifier delivering one inference per
//! camera frame) call [`Watchdog::heartbeat`] for every frame.  The control
//! loop calls [`Watchdog::poll_expired`] on every tick; a source that missed
//! its deadline is reported exactly once, so the loop can inject a single
//! focus-loss stop instead of one per tick.  The next heartbeat re-arms it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Liveness reported for a single input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHealth {
    /// A heartbeat arrived within the deadline.
    Alive,
    /// The source has been silent for longer than its deadline.
    Silent,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct SourceEntry {
    last_heartbeat: Instant,
    timeout: Duration,
    /// Set once the expiry has been reported; cleared by the next heartbeat.
    reported: bool,
}

impl SourceEntry {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks heartbeats from registered input sources.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use rcctl_kernel::watchdog::{SourceHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register("pose", Duration::from_secs(1));
/// wd.heartbeat("pose");
/// assert_eq!(wd.health("pose"), SourceHealth::Alive);
///
/// let later = Instant::now() + Duration::from_secs(2);
/// assert_eq!(wd.poll_expired_at(later), vec!["pose".to_string()]);
/// assert!(wd.poll_expired_at(later).is_empty()); // reported once
/// ```
#[derive(Default)]
pub struct Watchdog {
    sources: HashMap<String, SourceEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` with a maximum heartbeat interval.
    ///
    /// The deadline starts now.  Re-registering resets it.
    pub fn register(&mut self, source: &str, timeout: Duration) {
        self.sources.insert(
            source.to_string(),
            SourceEntry {
                last_heartbeat: Instant::now(),
                timeout,
                reported: false,
            },
        );
    }

    /// Stop monitoring `source`.
    pub fn deregister(&mut self, source: &str) {
        self.sources.remove(source);
    }

    pub fn is_registered(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    /// Record a heartbeat for `source`.  No-op for unregistered sources.
    pub fn heartbeat(&mut self, source: &str) {
        self.heartbeat_at(source, Instant::now());
    }

    pub fn heartbeat_at(&mut self, source: &str, now: Instant) {
        if let Some(entry) = self.sources.get_mut(source) {
            entry.last_heartbeat = now;
            entry.reported = false;
        }
    }

    /// Unknown sources are reported as [`SourceHealth::Silent`].
    pub fn health(&self, source: &str) -> SourceHealth {
        match self.sources.get(source) {
            Some(entry) if !entry.expired(Instant::now()) => SourceHealth::Alive,
            _ => SourceHealth::Silent,
        }
    }

    /// Return the sources that went silent since the last poll.
    pub fn poll_expired(&mut self) -> Vec<String> {
        self.poll_expired_at(Instant::now())
    }

    pub fn poll_expired_at(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for (id, entry) in self.sources.iter_mut() {
            if !entry.reported && entry.expired(now) {
                entry.reported = true;
                warn!(source = %id, timeout_ms = entry.timeout.as_millis() as u64, "input source went silent");
                expired.push(id.clone());
            }
        }
        expired
    }
}
