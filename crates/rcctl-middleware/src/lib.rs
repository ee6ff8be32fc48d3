//! `rcctl-middleware` – Transport Session
//!
//! Carries commands to the vehicle and telemetry back over an MQTT broker,
//! without caring what the commands mean.
//!
//! # Modules
//!
//! - [`adapter`] – [`CommandLink`][adapter::CommandLink], the trait the
//!   control loop publishes through.
//! - [`session`] – [`TransportSession`][session::TransportSession]: single
//!   network worker, connect/subscribe, ordered fire-and-forget publish,
//!   keepalive and reconnect.
//! - [`codec`] – MQTT 3.1.1 packet encoding and incremental decoding.
//! - [`link`] – TCP and WebSocket byte transports.
//! - [`backoff`] – capped exponential reconnect delays.
//! - [`config`] – [`BrokerConfig`][config::BrokerConfig], transports,
//!   credentials and topic names.

pub mod adapter;
pub mod backoff;
pub mod codec;
pub mod config;
pub mod link;
pub mod session;

pub use adapter::CommandLink;
pub use backoff::{Backoff, ReconnectPolicy};
pub use config::{BrokerConfig, Credentials, Transport, command_topic, telemetry_topic};
pub use session::{SessionEvent, TransportSession};
