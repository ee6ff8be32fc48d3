//! `rcctl-runtime` – Control Loop Engine
//!
//! Runs the sampling loop that connects operator input to the transport
//! session, and owns the operator-facing telemetry history.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   single task that normalises input, arbitrates commands, enforces input
//!   liveness and publishes through a
//!   [`CommandLink`][rcctl_middleware::CommandLink].
//! - [`telemetry_log`] – [`TelemetryLog`][telemetry_log::TelemetryLog]:
//!   bounded history of `sys`/`tele`/`err` entries (250 by default).
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export.

pub mod control_loop;
pub mod telemetry;
pub mod telemetry_log;

pub use control_loop::{ControlLoop, ControlLoopConfig, ControlRequest, ControlSnapshot};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use telemetry_log::TelemetryLog;
