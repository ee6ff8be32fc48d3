use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A directional intent.  Variants are declared in arbitration priority
/// order, so `Ord` ranks `Forward` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

impl Direction {
    /// The command that drives the vehicle in this direction.
    pub fn command(self) -> Command {
        match self {
            Direction::Forward => Command::Forward,
            Direction::Backward => Command::Backward,
            Direction::Left => Command::Left,
            Direction::Right => Command::Right,
        }
    }
}

/// One discrete control token sent to the vehicle.
///
/// The wire representation is the literal ASCII token produced by
/// [`Display`](fmt::Display): `F`, `B`, `L`, `R`, `S` or `speed:<0-100>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Motor speed in percent, `0..=100`.
    Speed(u8),
}

impl Command {
    /// `true` for the commands that keep the vehicle moving.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Command::Forward | Command::Backward | Command::Left | Command::Right
        )
    }

    /// `true` for the direction/stop alphabet that takes part in
    /// de-duplication; `false` for `speed:*`.
    pub fn is_directional(&self) -> bool {
        !matches!(self, Command::Speed(_))
    }

    /// Wire bytes for the command topic.
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Forward => f.write_str("F"),
            Command::Backward => f.write_str("B"),
            Command::Left => f.write_str("L"),
            Command::Right => f.write_str("R"),
            Command::Stop => f.write_str("S"),
            Command::Speed(pct) => write!(f, "speed:{pct}"),
        }
    }
}

impl FromStr for Command {
    type Err = RcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "F" => Ok(Command::Forward),
            "B" => Ok(Command::Backward),
            "L" => Ok(Command::Left),
            "R" => Ok(Command::Right),
            "S" => Ok(Command::Stop),
            other => {
                let pct = other
                    .strip_prefix("speed:")
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| *n <= 100)
                    .ok_or_else(|| RcError::InvalidCommand(other.to_string()))?;
                Ok(Command::Speed(pct))
            }
        }
    }
}

/// A normalised snapshot of operator intent, decoupled from the input
/// modality that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractSignal {
    /// Currently active directions.  Several may be active at once; the
    /// arbiter picks one by priority.
    pub directions: BTreeSet<Direction>,
    pub stop: bool,
    /// Continuous speed parameter, already clamped to `0..=100`.
    pub speed_percent: Option<u8>,
}

impl AbstractSignal {
    /// No direction, no stop, no speed.
    pub fn idle() -> Self {
        Self::default()
    }

    /// An explicit stop request.
    pub fn stop() -> Self {
        Self {
            stop: true,
            ..Self::default()
        }
    }

    /// Signal used when the input source loses focus or disappears: every
    /// direction released and stop asserted.
    pub fn focus_lost() -> Self {
        Self::stop()
    }

    pub fn direction(direction: Direction) -> Self {
        Self::from_directions([direction])
    }

    pub fn from_directions(directions: impl IntoIterator<Item = Direction>) -> Self {
        Self {
            directions: directions.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Builder-style speed attachment.
    pub fn with_speed(mut self, speed_percent: Option<u8>) -> Self {
        self.speed_percent = speed_percent;
        self
    }

    /// `true` when at least one direction is held.
    pub fn has_direction(&self) -> bool {
        !self.directions.is_empty()
    }
}

/// Category of an inbound or locally generated telemetry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    /// Session lifecycle notices (connected, subscribed, reconnecting…).
    Sys,
    /// Text echoed back by the vehicle on the telemetry topic.
    Tele,
    /// Transport failures.
    Err,
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryKind::Sys => f.write_str("sys"),
            TelemetryKind::Tele => f.write_str("tele"),
            TelemetryKind::Err => f.write_str("err"),
        }
    }
}

/// One entry of the telemetry log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TelemetryKind,
    pub payload: String,
}

impl TelemetryEvent {
    pub fn new(kind: TelemetryKind, payload: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            payload: payload.into(),
        }
    }

    pub fn sys(payload: impl Into<String>) -> Self {
        Self::new(TelemetryKind::Sys, payload)
    }

    pub fn tele(payload: impl Into<String>) -> Self {
        Self::new(TelemetryKind::Tele, payload)
    }

    pub fn err(payload: impl Into<String>) -> Self {
        Self::new(TelemetryKind::Err, payload)
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind,
            self.payload
        )
    }
}

/// Connection state of the transport session, as shown in the status
/// indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => f.write_str("disconnected"),
            LinkStatus::Connecting => f.write_str("connecting"),
            LinkStatus::Connected => f.write_str("connected"),
        }
    }
}

/// Error type shared by every rcctl crate.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RcError {
    /// A command was submitted while the link was down; it has been dropped.
    #[error("transport not connected; command dropped")]
    NotConnected,

    #[error("outbound queue full; command dropped")]
    QueueFull,

    #[error("broker connect failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),
}

impl From<std::io::Error> for RcError {
    fn from(e: std::io::Error) -> Self {
        RcError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_tokens() {
        assert_eq!(Command::Forward.to_string(), "F");
        assert_eq!(Command::Backward.to_string(), "B");
        assert_eq!(Command::Left.to_string(), "L");
        assert_eq!(Command::Right.to_string(), "R");
        assert_eq!(Command::Stop.to_string(), "S");
        assert_eq!(Command::Speed(0).to_string(), "speed:0");
        assert_eq!(Command::Speed(100).to_wire(), b"speed:100".to_vec());
    }

    #[test]
    fn command_parses_wire_tokens() {
        assert_eq!("F".parse::<Command>().unwrap(), Command::Forward);
        assert_eq!("S".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!("speed:42".parse::<Command>().unwrap(), Command::Speed(42));
    }

    #[test]
    fn command_rejects_out_of_range_speed_and_garbage() {
        assert!("speed:101".parse::<Command>().is_err());
        assert!("speed:-1".parse::<Command>().is_err());
        assert!("speed:".parse::<Command>().is_err());
        assert!("f".parse::<Command>().is_err());
        assert!("FORWARD".parse::<Command>().is_err());
    }

    #[test]
    fn direction_priority_order() {
        let mut dirs = vec![
            Direction::Right,
            Direction::Left,
            Direction::Backward,
            Direction::Forward,
        ];
        dirs.sort();
        assert_eq!(
            dirs,
            vec![
                Direction::Forward,
                Direction::Backward,
                Direction::Left,
                Direction::Right
            ]
        );
    }

    #[test]
    fn motion_and_directional_classification() {
        assert!(Command::Forward.is_motion());
        assert!(!Command::Stop.is_motion());
        assert!(Command::Stop.is_directional());
        assert!(!Command::Speed(10).is_directional());
        assert!(!Command::Speed(10).is_motion());
    }

    #[test]
    fn focus_lost_is_stop_without_directions() {
        let sig = AbstractSignal::focus_lost();
        assert!(sig.stop);
        assert!(!sig.has_direction());
        assert_eq!(sig.speed_percent, None);
    }

    #[test]
    fn telemetry_event_display_has_kind_tag() {
        let ev = TelemetryEvent::err("MQTT connect error: refused");
        let line = ev.to_string();
        assert!(line.contains("[err]"));
        assert!(line.ends_with("MQTT connect error: refused"));
    }

    #[test]
    fn telemetry_kind_serializes_lowercase() {
        let json = serde_json::to_string(&TelemetryKind::Tele).unwrap();
        assert_eq!(json, "\"tele\"");
    }

    #[test]
    fn rc_error_display() {
        assert!(RcError::NotConnected.to_string().contains("not connected"));
        let err = RcError::Connect("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
