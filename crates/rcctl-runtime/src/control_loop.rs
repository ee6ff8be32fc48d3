//! [`ControlLoop`] – the single task that turns operator input into vehicle
//! commands.
//!
//! The loop owns every piece of per-session state: the [`Normalizer`], the
//! [`Arbiter`], the input [`Watchdog`] and the [`TelemetryLog`].  Nothing
//! else writes to them.  It talks to the network only through a
//! [`CommandLink`] and the session-event receiver.
//!
//! # Cycle
//!
//! Every tick (100 ms by default, missed ticks skipped):
//!
//! 1. Drain session events: link status changes (a transition to
//!    `Connected` triggers [`Arbiter::resync`]) and telemetry for the log.
//!    The link's own status is checked last in case a status event was lost.
//! 2. Poll the watchdog; a silent streaming source injects one focus-loss
//!    stop.
//! 3. Held-state modes (keyboard, pointer) are sampled and arbitrated.
//!    Discrete modes (voice, pose) retry an undelivered stop, re-assert the
//!    last command after a reconnect and send a changed speed once the link
//!    is up.
//!
//! Discrete inputs (utterances, pose frames, focus loss) are arbitrated as
//! soon as they arrive.  Every decided command is published immediately and
//! recorded as sent only when the link accepted it.

use std::time::Duration;

use rcctl_input::{InputEvent, InputMode, Normalizer, NormalizerConfig};
use rcctl_kernel::{Arbiter, Watchdog};
use rcctl_middleware::{CommandLink, SessionEvent};
use rcctl_types::{AbstractSignal, Command, LinkStatus, RcError, TelemetryEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::telemetry_log::{DEFAULT_CAPACITY, TelemetryLog};

/// Watchdog key of the pose classifier frame stream.
pub const POSE_SOURCE: &str = "pose";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ControlLoop`].
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Sampling period of held-state inputs.
    pub tick: Duration,
    pub normalizer: NormalizerConfig,
    /// Maximum gap between frames of a streaming source before the vehicle
    /// is stopped.
    pub input_timeout: Duration,
    /// Entries kept in the telemetry log.
    pub telemetry_capacity: usize,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            normalizer: NormalizerConfig::default(),
            input_timeout: Duration::from_secs(1),
            telemetry_capacity: DEFAULT_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests and snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Messages accepted by [`ControlLoop::run`].
#[derive(Debug)]
pub enum ControlRequest {
    Input(InputEvent),
    SetMode(InputMode),
    Snapshot(oneshot::Sender<ControlSnapshot>),
}

/// Point-in-time view of the loop for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSnapshot {
    pub mode: InputMode,
    pub link: LinkStatus,
    pub last_sent: Option<Command>,
    pub last_speed_sent: Option<u8>,
    /// Slider value, whether or not it has been delivered yet.
    pub speed: Option<u8>,
    /// Names of the controls currently held.
    pub held: Vec<&'static str>,
    /// Rendered telemetry log, oldest first.
    pub telemetry: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop<L: CommandLink> {
    config: ControlLoopConfig,
    link: L,
    session_events: mpsc::Receiver<SessionEvent>,
    normalizer: Normalizer,
    arbiter: Arbiter,
    watchdog: Watchdog,
    log: TelemetryLog,
    link_status: LinkStatus,
    /// A discrete-mode stop that the link refused; retried once connected.
    stop_pending: bool,
}

impl<L: CommandLink> ControlLoop<L> {
    pub fn new(config: ControlLoopConfig, link: L, session_events: mpsc::Receiver<SessionEvent>) -> Self {
        let normalizer = Normalizer::new(config.normalizer);
        let mut watchdog = Watchdog::new();
        if normalizer.mode().is_streaming() {
            watchdog.register(POSE_SOURCE, config.input_timeout);
        }
        let log = TelemetryLog::new(config.telemetry_capacity);
        let link_status = link.status();
        Self {
            config,
            link,
            session_events,
            normalizer,
            arbiter: Arbiter::new(),
            watchdog,
            log,
            link_status,
            stop_pending: false,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.normalizer.mode()
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn log(&self) -> &TelemetryLog {
        &self.log
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            mode: self.normalizer.mode(),
            link: self.link.status(),
            last_sent: self.arbiter.last_sent(),
            last_speed_sent: self.arbiter.last_speed_sent(),
            speed: self.normalizer.speed(),
            held: self.normalizer.held().describe(),
            telemetry: self.log.render(),
        }
    }

    pub fn handle_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Input(event) => self.handle_input(event),
            ControlRequest::SetMode(mode) => self.set_mode(mode),
            ControlRequest::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Apply one raw input event.  Discrete events are arbitrated at once;
    /// held-state edges wait for the next tick.
    pub fn handle_input(&mut self, event: InputEvent) {
        let is_frame = matches!(event, InputEvent::PoseFrame { .. });
        let is_speed = matches!(event, InputEvent::Speed(_));
        let mode = self.normalizer.mode();

        if is_frame && mode == InputMode::Pose {
            self.watchdog.heartbeat(POSE_SOURCE);
        }

        if let Some(signal) = self.normalizer.apply(event) {
            self.arbitrate(&signal);
        } else if is_speed
            && !mode.is_held_state()
            && let Some(cmd) = self.arbiter.decide_speed(self.normalizer.speed())
        {
            self.send(cmd);
        }
    }

    /// Switch input modality.  The vehicle is stopped before the new source
    /// takes over.
    pub fn set_mode(&mut self, mode: InputMode) {
        if mode == self.normalizer.mode() {
            return;
        }
        let signal = self.normalizer.set_mode(mode).with_speed(self.normalizer.speed());
        self.arbitrate(&signal);

        if mode.is_streaming() {
            self.watchdog.register(POSE_SOURCE, self.config.input_timeout);
        } else {
            self.watchdog.deregister(POSE_SOURCE);
        }
        info!(mode = %mode, "input mode changed");
        self.log.push(TelemetryEvent::sys(format!("input mode: {mode}")));
    }

    /// One sampling tick.
    pub fn on_tick(&mut self) {
        self.drain_session_events();

        for source in self.watchdog.poll_expired() {
            self.log.push(TelemetryEvent::err(format!(
                "{source} input went silent; stopping"
            )));
            let signal = AbstractSignal::focus_lost().with_speed(self.normalizer.speed());
            self.arbitrate(&signal);
        }

        if let Some(signal) = self.normalizer.sample() {
            self.arbitrate(&signal);
        } else if self.link_status == LinkStatus::Connected {
            if self.stop_pending {
                self.arbitrate(&AbstractSignal::stop());
            } else if let Some(cmd) = self.arbiter.pending_resync() {
                self.send(cmd);
            }
            if let Some(cmd) = self.arbiter.decide_speed(self.normalizer.speed()) {
                self.send(cmd);
            }
        }
    }

    /// Consume every queued session event without waiting, then settle on
    /// the link's current status.
    ///
    /// Status events can be dropped when the event queue overflows, so the
    /// link itself has the final word.
    pub fn drain_session_events(&mut self) {
        while let Ok(event) = self.session_events.try_recv() {
            match event {
                SessionEvent::Status(status) => self.observe_status(status),
                SessionEvent::Telemetry(event) => self.log.push(event),
            }
        }
        self.observe_status(self.link.status());
    }

    /// Drive the loop until `shutdown` flips to `true` (or its sender is
    /// dropped) or the request channel closes, then stop the vehicle and
    /// disconnect.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<ControlRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(mode = %self.normalizer.mode(), tick_ms = self.config.tick.as_millis() as u64, "control loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        info!("input channel closed; stopping vehicle");
                        self.handle_input(InputEvent::FocusLost);
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Publish a final stop (best effort) and close the link.  No decision
    /// logic runs afterwards.
    pub async fn shutdown(mut self) {
        match self.link.publish(&Command::Stop) {
            Ok(()) => debug!("final stop queued"),
            Err(e) => debug!(error = %e, "final stop not delivered"),
        }
        self.link.disconnect().await;
        info!("control loop stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn observe_status(&mut self, status: LinkStatus) {
        if status == self.link_status {
            return;
        }
        if status == LinkStatus::Connected {
            debug!("link up; resyncing vehicle state");
            self.arbiter.resync();
        }
        self.link_status = status;
    }

    fn arbitrate(&mut self, signal: &AbstractSignal) {
        let decision = self.arbiter.decide(signal);
        match decision.command {
            Some(cmd) => {
                let delivered = self.send(cmd);
                self.stop_pending = cmd == Command::Stop && !delivered;
            }
            None if signal.stop => self.stop_pending = false,
            None => {}
        }
        if let Some(cmd) = decision.speed {
            self.send(cmd);
        }
    }

    /// Publish `cmd`; returns whether the link accepted it.
    fn send(&mut self, cmd: Command) -> bool {
        match self.link.publish(&cmd) {
            Ok(()) => {
                self.arbiter.record_sent(cmd);
                debug!(command = %cmd, "command sent");
                true
            }
            Err(RcError::NotConnected) => false,
            Err(e) => {
                warn!(command = %cmd, error = %e, "command dropped");
                self.log.push(TelemetryEvent::err(format!("{cmd} dropped: {e}")));
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
