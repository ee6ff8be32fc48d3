//! Settings file – reads/writes `~/.rcctl/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `RCCTL_*`
//! environment variables, command-line flags (applied in `main`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcctl_input::{InputMode, NormalizerConfig};
use rcctl_middleware::{BrokerConfig, Credentials, Transport};
use rcctl_runtime::ControlLoopConfig;
use rcctl_types::RcError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Persisted user configuration stored in `~/.rcctl/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker host name.
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Vehicle id; topics are `rc/<device_id>/cmd` and `rc/<device_id>/tele`.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// MQTT keepalive in seconds (0 disables pings).
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,

    /// `tcp` or `ws`.
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Request path when `transport = "ws"`.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Stored as plain text; the file is written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Input modality at startup.
    #[serde(default)]
    pub mode: InputMode,

    /// Speed slider granularity in percent.
    #[serde(default = "default_speed_step")]
    pub speed_step: u8,

    /// Minimum classifier confidence for pose frames.
    #[serde(default = "default_pose_min_confidence")]
    pub pose_min_confidence: f32,

    /// Silence after which a pose stream is considered lost.
    #[serde(default = "default_input_timeout_ms")]
    pub input_timeout_ms: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("device_id", &self.device_id)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("transport", &self.transport)
            .field("ws_path", &self.ws_path)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("mode", &self.mode)
            .field("speed_step", &self.speed_step)
            .field("pose_min_confidence", &self.pose_min_confidence)
            .field("input_timeout_ms", &self.input_timeout_ms)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

fn default_broker() -> String {
    "broker.hivemq.com".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_device_id() -> String {
    "robotcar_umk1".to_string()
}
fn default_keepalive() -> u16 {
    30
}
fn default_transport() -> String {
    "tcp".to_string()
}
fn default_ws_path() -> String {
    "/mqtt".to_string()
}
fn default_speed_step() -> u8 {
    5
}
fn default_pose_min_confidence() -> f32 {
    0.5
}
fn default_input_timeout_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            device_id: default_device_id(),
            keepalive_secs: default_keepalive(),
            transport: default_transport(),
            ws_path: default_ws_path(),
            username: String::new(),
            password: String::new(),
            mode: InputMode::default(),
            speed_step: default_speed_step(),
            pose_min_confidence: default_pose_min_confidence(),
            input_timeout_ms: default_input_timeout_ms(),
        }
    }
}

impl Config {
    /// Transport-session settings derived from this config.
    ///
    /// # Errors
    ///
    /// [`RcError::Config`] for an unknown or TLS transport, or an empty
    /// broker host or device id.
    pub fn broker_config(&self) -> Result<BrokerConfig, RcError> {
        let transport: Transport = self.transport.parse()?;
        if self.broker.trim().is_empty() {
            return Err(RcError::Config("broker host is empty".into()));
        }
        if self.device_id.trim().is_empty() {
            return Err(RcError::Config("device id is empty".into()));
        }
        let credentials = (!self.username.is_empty()).then(|| Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        });
        Ok(BrokerConfig {
            host: self.broker.trim().to_string(),
            port: self.port,
            transport,
            ws_path: self.ws_path.clone(),
            keepalive_secs: self.keepalive_secs,
            device_id: self.device_id.trim().to_string(),
            client_id_prefix: format!("rc_{}", self.mode),
            credentials,
            ..BrokerConfig::default()
        })
    }

    /// Control-loop settings derived from this config.
    pub fn control_loop_config(&self) -> ControlLoopConfig {
        ControlLoopConfig {
            normalizer: NormalizerConfig {
                mode: self.mode,
                speed_step: self.speed_step,
                pose_min_confidence: self.pose_min_confidence,
            },
            input_timeout: Duration::from_millis(self.input_timeout_ms),
            ..ControlLoopConfig::default()
        }
    }
}

/// Return the path to `~/.rcctl/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rcctl").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `RCCTL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RCCTL_BROKER` | `broker` |
/// | `RCCTL_PORT` | `port` |
/// | `RCCTL_DEVICE_ID` | `device_id` |
/// | `RCCTL_KEEPALIVE` | `keepalive_secs` |
/// | `RCCTL_TRANSPORT` | `transport` |
/// | `RCCTL_WS_PATH` | `ws_path` |
/// | `RCCTL_USERNAME` | `username` |
/// | `RCCTL_PASSWORD` | `password` |
///
/// Unparsable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RCCTL_BROKER") {
        cfg.broker = v;
    }
    if let Some(v) = lookup("RCCTL_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = lookup("RCCTL_DEVICE_ID") {
        cfg.device_id = v;
    }
    if let Some(v) = lookup("RCCTL_KEEPALIVE")
        && let Ok(secs) = v.trim().parse::<u16>()
    {
        cfg.keepalive_secs = secs;
    }
    if let Some(v) = lookup("RCCTL_TRANSPORT") {
        cfg.transport = v;
    }
    if let Some(v) = lookup("RCCTL_WS_PATH") {
        cfg.ws_path = v;
    }
    if let Some(v) = lookup("RCCTL_USERNAME") {
        cfg.username = v;
    }
    if let Some(v) = lookup("RCCTL_PASSWORD") {
        cfg.password = v;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
