use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::endpoint::Scheme;
use crate::error::Error;

// =============================================================================
// File config (figment-deserialized from defaults / pad.toml / env vars)
// =============================================================================
//
//   pad.toml:   [connection]
//               reconnect_delay_ms = 3000
//
//   env var:    PAD_CONNECTION__RECONNECT_DELAY_MS=3000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub endpoint: EndpointFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub stream: StreamFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Endpoint derivation (lives under `[endpoint]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointFileConfig {
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_touch_port_offset")]
    pub touch_port_offset: u16,
    #[serde(default = "default_motion_path")]
    pub motion_path: String,
    #[serde(default = "default_touch_path")]
    pub touch_path: String,
}

impl Default for EndpointFileConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            base_port: default_base_port(),
            touch_port_offset: default_touch_port_offset(),
            motion_path: default_motion_path(),
            touch_path: default_touch_path(),
        }
    }
}

/// Socket lifecycle knobs (lives under `[connection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for the peer to finish a close handshake.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

/// Outbound throttling (lives under `[stream]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            min_send_interval_ms: default_min_send_interval_ms(),
        }
    }
}

/// Session-level behavior (lives under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Interval of the connection status log line; 0 disables it.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

fn default_base_port() -> u16 {
    8080
}
fn default_touch_port_offset() -> u16 {
    2
}
fn default_motion_path() -> String {
    "/motion".to_string()
}
fn default_touch_path() -> String {
    "/touch".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_close_timeout_ms() -> u64 {
    2000
}
fn default_min_send_interval_ms() -> u64 {
    16 // ~60 updates/s
}
fn default_status_interval_ms() -> u64 {
    3000
}

/// Build a figment that layers: defaults → config file → PAD_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PAD_ENDPOINT__BASE_PORT=9000`  →  `endpoint.base_port = 9000`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("PAD_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the crate)
// =============================================================================

/// How channel endpoints are derived from a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub scheme: Scheme,
    pub base_port: u16,
    pub touch_port_offset: u16,
    pub motion_path: String,
    pub touch_path: String,
}

impl EndpointConfig {
    pub fn from_file(fc: &EndpointFileConfig) -> Self {
        Self {
            scheme: fc.scheme,
            base_port: fc.base_port,
            touch_port_offset: fc.touch_port_offset,
            motion_path: normalize_path(&fc.motion_path),
            touch_path: normalize_path(&fc.touch_path),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from_file(&EndpointFileConfig::default())
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Fixed delay before retrying after an unexpected close. No backoff.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(fc.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(fc.connect_timeout_ms),
            close_timeout: Duration::from_millis(fc.close_timeout_ms),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Samples arriving sooner than this after the last one are dropped.
    pub min_send_interval: Duration,
}

impl StreamConfig {
    pub fn from_file(fc: &StreamFileConfig) -> Self {
        Self {
            min_send_interval: Duration::from_millis(fc.min_send_interval_ms),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_file(&StreamFileConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` disables the status heartbeat.
    pub status_interval: Option<Duration>,
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            status_interval: (fc.status_interval_ms > 0)
                .then(|| Duration::from_millis(fc.status_interval_ms)),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&SessionFileConfig::default())
    }
}

/// Fully resolved settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub endpoint: EndpointConfig,
    pub connection: ConnectionConfig,
    pub stream: StreamConfig,
    pub session: SessionConfig,
}

impl Settings {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            endpoint: EndpointConfig::from_file(&fc.endpoint),
            connection: ConnectionConfig::from_file(&fc.connection),
            stream: StreamConfig::from_file(&fc.stream),
            session: SessionConfig::from_file(&fc.session),
        }
    }

    /// Load settings from `config_path` (missing file is fine) and the environment.
    pub fn load(config_path: &Path) -> Result<Self, Error> {
        let fc: FileConfig = load_config(config_path).extract()?;
        Ok(Self::from_file(&fc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_defaults_match_protocol() {
        let s = Settings::default();
        assert_eq!(s.endpoint.scheme, Scheme::Ws);
        assert_eq!(s.endpoint.base_port, 8080);
        assert_eq!(s.endpoint.touch_port_offset, 2);
        assert_eq!(s.endpoint.motion_path, "/motion");
        assert_eq!(s.endpoint.touch_path, "/touch");
        assert_eq!(s.connection.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(s.connection.close_timeout, Duration::from_millis(2000));
        assert_eq!(s.stream.min_send_interval, Duration::from_millis(16));
        assert_eq!(
            s.session.status_interval,
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn test_zero_status_interval_disables_heartbeat() {
        let sc = SessionConfig::from_file(&SessionFileConfig {
            status_interval_ms: 0,
        });
        assert!(sc.status_interval.is_none());
    }

    #[test]
    fn test_paths_get_leading_slash() {
        let ec = EndpointConfig::from_file(&EndpointFileConfig {
            motion_path: "gyro".into(),
            ..Default::default()
        });
        assert_eq!(ec.motion_path, "/gyro");
        assert_eq!(ec.touch_path, "/touch");
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let s = Settings::load(&tmp.path().join("pad.toml")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_load_toml_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pad.toml");
        std::fs::write(
            &path,
            "[endpoint]\nscheme = \"wss\"\nbase_port = 9000\n\n[connection]\nreconnect_delay_ms = 500\n",
        )
        .unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.endpoint.scheme, Scheme::Wss);
        assert_eq!(s.endpoint.base_port, 9000);
        assert_eq!(s.endpoint.touch_port_offset, 2);
        assert_eq!(s.connection.reconnect_delay, Duration::from_millis(500));
        assert_eq!(s.stream.min_send_interval, Duration::from_millis(16));
    }

    #[test]
    fn test_load_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pad.toml");
        std::fs::write(&path, "[endpoint]\nbase_port = \"eighty\"\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
    }
}
