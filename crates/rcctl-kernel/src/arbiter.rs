//! [`Arbiter`] – the command-arbitration state machine.
//!
//! One decision step runs per [`AbstractSignal`].  The direction/stop command
//! is chosen in strict priority order:
//!
//! 1. `stop` set → [`Command::Stop`]
//! 2. Forward held → [`Command::Forward`]
//! 3. Backward held → [`Command::Backward`]
//! 4. Left held → [`Command::Left`]
//! 5. Right held → [`Command::Right`]
//! 6. nothing held → [`Command::Stop`] on the active→idle edge, otherwise no
//!    command.
//!
//! A decided command is only emitted when it differs from the last command
//! that was actually delivered.  The caller reports deliveries through
//! [`Arbiter::record_sent`]; a publish that was dropped (link down) leaves
//! the state untouched, so the next tick naturally retries.
//!
//! Two liveness rules sit on top of the priority table:
//!
//! * While idle, a motion command that is still the last delivered command
//!   keeps producing a stop until that stop is delivered.  A release edge
//!   that coincided with a link outage is therefore not lost.
//! * After a reconnect, [`Arbiter::resync`] makes the next direction/stop
//!   command and the current speed go out even if they equal the last
//!   delivered values.  An idle signal re-asserts a delivered stop: a stop
//!   accepted by the transport may still have died with the old link.
//!
//! `speed:*` commands are tracked separately and never interact with
//! direction de-duplication.
//!
//! # Example
//!
//! ```rust
//! use rcctl_kernel::Arbiter;
//! use rcctl_types::{AbstractSignal, Command, Direction};
//!
//! let mut arbiter = Arbiter::new();
//! let held = AbstractSignal::direction(Direction::Forward);
//!
//! let cmd = arbiter.decide(&held).command;
//! assert_eq!(cmd, Some(Command::Forward));
//! arbiter.record_sent(Command::Forward);
//!
//! assert_eq!(arbiter.decide(&held).command, None); // de-duplicated
//! assert_eq!(arbiter.decide(&AbstractSignal::idle()).command, Some(Command::Stop));
//! ```

use rcctl_types::{AbstractSignal, Command};
use tracing::trace;

/// Commands produced by one decision step, in emission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    /// Direction or stop command, if one must be emitted.
    pub command: Option<Command>,
    /// `speed:N` command, if the speed changed.
    pub speed: Option<Command>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.speed.is_none()
    }

    /// The commands to publish, direction/stop first.
    pub fn commands(&self) -> impl Iterator<Item = Command> {
        self.command.into_iter().chain(self.speed)
    }
}

/// Arbitration state for one control session.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    /// Last direction/stop command that was actually delivered.
    last_sent: Option<Command>,
    /// Whether the previous signal held at least one direction.
    last_signal_had_activity: bool,
    last_speed_sent: Option<u8>,
    resync_command: bool,
    resync_speed: bool,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self) -> Option<Command> {
        self.last_sent
    }

    pub fn last_speed_sent(&self) -> Option<u8> {
        self.last_speed_sent
    }

    /// Run one full decision step for `signal`.
    pub fn decide(&mut self, signal: &AbstractSignal) -> Decision {
        Decision {
            command: self.decide_direction(signal),
            speed: self.decide_speed(signal.speed_percent),
        }
    }

    /// Direction/stop half of a decision step.
    ///
    /// Always advances the activity edge detector, even when the result is
    /// suppressed by de-duplication.
    pub fn decide_direction(&mut self, signal: &AbstractSignal) -> Option<Command> {
        let decided = if signal.stop {
            Some(Command::Stop)
        } else if let Some(direction) = signal.directions.first() {
            // BTreeSet iterates in priority order.
            Some(direction.command())
        } else if self.last_signal_had_activity
            || self.last_sent.is_some_and(|c| c.is_motion())
            || (self.resync_command && self.last_sent == Some(Command::Stop))
        {
            Some(Command::Stop)
        } else {
            None
        };

        self.last_signal_had_activity = signal.has_direction();

        let emitted = decided.filter(|c| self.resync_command || Some(*c) != self.last_sent);
        trace!(?decided, ?emitted, last_sent = ?self.last_sent, "direction decision");
        emitted
    }

    /// Speed half of a decision step: emits `speed:N` when `N` differs from
    /// the last delivered value.
    pub fn decide_speed(&mut self, speed_percent: Option<u8>) -> Option<Command> {
        let pct = speed_percent?;
        if !self.resync_speed && self.last_speed_sent == Some(pct) {
            return None;
        }
        Some(Command::Speed(pct))
    }

    /// Record that `command` was handed to a connected transport.
    pub fn record_sent(&mut self, command: Command) {
        match command {
            Command::Speed(pct) => {
                self.last_speed_sent = Some(pct);
                self.resync_speed = false;
            }
            other => {
                self.last_sent = Some(other);
                self.resync_command = false;
            }
        }
    }

    /// The delivered direction/stop command still owed to the vehicle after
    /// a [`resync`](Self::resync), for sources that produce no per-tick
    /// signal.
    pub fn pending_resync(&self) -> Option<Command> {
        self.last_sent.filter(|_| self.resync_command)
    }

    /// Force the next direction/stop command and the current speed to be
    /// re-asserted.  Called when the link comes (back) up.
    pub fn resync(&mut self) {
        self.resync_command = true;
        self.resync_speed = true;
    }
}
