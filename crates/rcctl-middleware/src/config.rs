//! Broker connection settings and topic naming.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rcctl_types::RcError;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::backoff::ReconnectPolicy;

/// How MQTT bytes reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Plain MQTT over TCP (usually port 1883).
    #[default]
    Tcp,
    /// MQTT inside binary WebSocket frames (`ws://host:port/path`).
    Ws,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Ws => f.write_str("ws"),
        }
    }
}

impl FromStr for Transport {
    type Err = RcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(Transport::Tcp),
            "ws" | "websocket" => Ok(Transport::Ws),
            "wss" | "mqtts" | "ssl" | "tls" => Err(RcError::Config(format!(
                "transport '{s}' requires TLS, which is not supported"
            ))),
            other => Err(RcError::Config(format!(
                "unknown transport '{other}' (expected tcp or ws)"
            ))),
        }
    }
}

/// Broker username/password.  Wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Topic on which commands for `device_id` are published.
pub fn command_topic(device_id: &str) -> String {
    format!("rc/{device_id}/cmd")
}

/// Topic on which `device_id` echoes telemetry.
pub fn telemetry_topic(device_id: &str) -> String {
    format!("rc/{device_id}/tele")
}

/// Everything the transport session needs to reach one vehicle.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// Request path for [`Transport::Ws`].
    pub ws_path: String,
    /// MQTT keepalive in seconds; `0` disables pings.
    pub keepalive_secs: u16,
    pub device_id: String,
    pub client_id_prefix: String,
    pub credentials: Option<Credentials>,
    pub reconnect: ReconnectPolicy,
    /// Bound of the outbound command queue.
    pub outbound_capacity: usize,
    /// Bound of the session-event queue read by the control loop.
    pub event_capacity: usize,
    /// Limit for TCP/WebSocket connect plus CONNACK.
    pub connect_timeout: Duration,
    /// How long `disconnect` waits for the worker to flush and exit.
    pub disconnect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            transport: Transport::Tcp,
            ws_path: "/mqtt".to_string(),
            keepalive_secs: 30,
            device_id: "robotcar_umk1".to_string(),
            client_id_prefix: "rcctl".to_string(),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
            outbound_capacity: 32,
            event_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

impl BrokerConfig {
    pub fn command_topic(&self) -> String {
        command_topic(&self.device_id)
    }

    pub fn telemetry_topic(&self) -> String {
        telemetry_topic(&self.device_id)
    }

    /// `ws://host:port/path`, with a leading `/` added to the path if missing.
    pub fn ws_url(&self) -> String {
        let path = self.ws_path.trim();
        if path.starts_with('/') {
            format!("ws://{}:{}{}", self.host, self.port, path)
        } else {
            format!("ws://{}:{}/{}", self.host, self.port, path)
        }
    }

    /// `None` when keepalive is disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(u64::from(self.keepalive_secs)))
    }

    /// Silence after which the link is considered lost (1.5 × keepalive).
    pub fn inbound_timeout(&self) -> Option<Duration> {
        self.keepalive().map(|ka| ka + ka / 2)
    }

    /// `host:port` for log lines.
    pub fn endpoint(&self) -> String {
        match self.transport {
            Transport::Tcp => format!("{}:{}", self.host, self.port),
            Transport::Ws => self.ws_url(),
        }
    }
}
