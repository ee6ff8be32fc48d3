//! [`TelemetryLog`] – bounded, in-memory telemetry history.
//!
//! Holds the most recent entries shown in the operator's log view.  When the
//! log is full the oldest entry is evicted first.
//!
//! ```rust
//! use rcctl_runtime::telemetry_log::TelemetryLog;
//! use rcctl_types::TelemetryEvent;
//!
//! let mut log = TelemetryLog::new(2);
//! log.push(TelemetryEvent::sys("one"));
//! log.push(TelemetryEvent::tele("two"));
//! log.push(TelemetryEvent::err("three"));
//! let kept: Vec<_> = log.iter().map(|e| e.payload.as_str()).collect();
//! assert_eq!(kept, ["two", "three"]);
//! ```

use std::collections::VecDeque;

use rcctl_types::TelemetryEvent;

/// Number of entries kept by default.
pub const DEFAULT_CAPACITY: usize = 250;

pub struct TelemetryLog {
    capacity: usize,
    entries: VecDeque<TelemetryEvent>,
}

impl TelemetryLog {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.entries.iter()
    }

    /// Owned copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.entries.iter().cloned().collect()
    }

    /// Entries rendered as `HH:MM:SS [kind] payload`.
    pub fn render(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_250_of_260() {
        let mut log = TelemetryLog::default();
        for i in 0..260 {
            log.push(TelemetryEvent::tele(format!("msg {i}")));
        }
        assert_eq!(log.len(), 250);
        let snap = log.snapshot();
        assert_eq!(snap.first().unwrap().payload, "msg 10");
        assert_eq!(snap.last().unwrap().payload, "msg 259");
    }

    #[test]
    fn render_uses_time_kind_payload() {
        let mut log = TelemetryLog::new(4);
        log.push(TelemetryEvent::sys("connected"));
        let line = &log.render()[0];
        // "HH:MM:SS [sys] connected"
        assert_eq!(line.len(), 8 + " [sys] connected".len());
        assert!(line.ends_with(" [sys] connected"));
        assert_eq!(&line[2..3], ":");
    }

    #[test]
    fn zero_capacity_is_raised() {
        let mut log = TelemetryLog::new(0);
        log.push(TelemetryEvent::err("a"));
        log.push(TelemetryEvent::err("b"));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot()[0].payload, "b");
    }

    #[test]
    fn new_log_is_empty() {
        let log = TelemetryLog::default();
        assert!(log.is_empty());
        assert!(log.render().is_empty());
    }
}
