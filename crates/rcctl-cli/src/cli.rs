//! Command-line flags using clap derive.

use std::path::PathBuf;

use clap::Parser;
use rcctl_input::InputMode;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "rcctl", version, about = "Drive an MQTT robot car from the terminal")]
pub struct Cli {
    /// Settings file (default: ~/.rcctl/config.toml)
    #[arg(long, short = 'c', env = "RCCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input modality at startup: keyboard, pointer, voice or pose
    #[arg(long, short = 'm')]
    pub mode: Option<InputMode>,

    /// Broker host
    #[arg(long, short = 'b')]
    pub broker: Option<String>,

    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Vehicle id used in the topic names
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// tcp or ws
    #[arg(long, short = 't')]
    pub transport: Option<String>,

    /// WebSocket request path
    #[arg(long)]
    pub ws_path: Option<String>,

    /// MQTT keepalive in seconds (0 disables)
    #[arg(long)]
    pub keepalive: Option<u16>,
}

impl Cli {
    /// Overlay the flags that were given onto `cfg`.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(broker) = &self.broker {
            cfg.broker = broker.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(device) = &self.device {
            cfg.device_id = device.clone();
        }
        if let Some(transport) = &self.transport {
            cfg.transport = transport.clone();
        }
        if let Some(path) = &self.ws_path {
            cfg.ws_path = path.clone();
        }
        if let Some(secs) = self.keepalive {
            cfg.keepalive_secs = secs;
        }
    }
}
