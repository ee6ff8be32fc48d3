//! `rcctl-kernel` – Command Arbitration & Liveness
//!
//! Decides, from a stream of normalised signals, which single command goes to
//! the vehicle and when; and makes sure the vehicle stops when input goes
//! quiet.
//!
//! # Modules
//!
//! - [`arbiter`] – [`Arbiter`][arbiter::Arbiter]: the fixed-priority
//!   (Stop > Forward > Backward > Left > Right) state machine with
//!   de-duplication and stop-on-release.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: heartbeat deadlines for
//!   streaming input sources; a missed deadline is reported once so the
//!   control loop can inject a focus-loss stop.

pub mod arbiter;
pub mod watchdog;

pub use arbiter::{Arbiter, Decision};
pub use watchdog::{SourceHealth, Watchdog};
