//! Link configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KEELDB_LINK_CONFIG)
//! 3. Environment variables

use crate::liveness::AliveCheckMode;
use keeldb_protocol::DEFAULT_MASTER_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Socket file name the master listens on inside the socket directory.
pub const MASTER_SOCKET_NAME: &str = "keeldb_master.sock";

/// Connection substrate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// TCP port of the master's well-known endpoint.
    pub master_port: u16,
    /// Transport connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout for a handshake request/reply round trip in milliseconds.
    pub response_timeout_ms: u64,
    /// Upper bound on a single receive poll slice in milliseconds.
    pub poll_slice_ms: u64,
    /// SO_SNDBUF hint for TCP connections (None = OS default).
    pub tcp_send_buffer_size: Option<u32>,
    /// SO_RCVBUF hint for TCP connections (None = OS default).
    pub tcp_recv_buffer_size: Option<u32>,
    /// Enable TCP keepalive.
    pub keepalive: bool,
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// Which endpoint kinds probe peer liveness during long waits.
    pub alive_check: AliveCheckMode,
    /// Timeout for a single peer-alive probe in milliseconds.
    pub alive_probe_timeout_ms: u64,
    /// Directory holding Unix-domain sockets for same-host connections.
    pub socket_dir: PathBuf,
    /// Prefer the master's Unix socket when the host is local.
    pub prefer_unix_socket: bool,
    /// Delay between handshake retries while a server is booting, in
    /// milliseconds.
    pub boot_retry_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            master_port: DEFAULT_MASTER_PORT,
            connect_timeout_ms: 5_000,
            response_timeout_ms: 30_000,
            poll_slice_ms: 5_000,
            tcp_send_buffer_size: None,
            tcp_recv_buffer_size: None,
            keepalive: true,
            no_delay: true,
            alive_check: AliveCheckMode::default(),
            alive_probe_timeout_ms: 1_000,
            socket_dir: PathBuf::from("/tmp/keeldb"),
            prefer_unix_socket: true,
            boot_retry_delay_ms: 500,
        }
    }
}

impl LinkConfig {
    /// Loads configuration from file, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("KEELDB_LINK_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: LinkConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("KEELDB_MASTER_PORT") {
            if let Ok(parsed) = port.parse() {
                self.master_port = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("KEELDB_CONNECT_TIMEOUT") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }
        if let Ok(timeout) = std::env::var("KEELDB_RESPONSE_TIMEOUT") {
            if let Ok(ms) = timeout.parse() {
                self.response_timeout_ms = ms;
            }
        }
        if let Ok(size) = std::env::var("KEELDB_TCP_SNDBUF") {
            if let Ok(parsed) = size.parse() {
                self.tcp_send_buffer_size = Some(parsed);
            }
        }
        if let Ok(size) = std::env::var("KEELDB_TCP_RCVBUF") {
            if let Ok(parsed) = size.parse() {
                self.tcp_recv_buffer_size = Some(parsed);
            }
        }
        if let Ok(flag) = std::env::var("KEELDB_KEEPALIVE") {
            self.keepalive = flag == "1" || flag.to_lowercase() == "true";
        }
        if let Ok(flag) = std::env::var("KEELDB_NODELAY") {
            self.no_delay = flag == "1" || flag.to_lowercase() == "true";
        }
        if let Ok(mode) = std::env::var("KEELDB_ALIVE_CHECK") {
            match mode.to_lowercase().as_str() {
                "none" => self.alive_check = AliveCheckMode::None,
                "server_only" => self.alive_check = AliveCheckMode::ServerOnly,
                "client_only" => self.alive_check = AliveCheckMode::ClientOnly,
                "both" => self.alive_check = AliveCheckMode::Both,
                other => tracing::warn!("ignoring unknown KEELDB_ALIVE_CHECK value '{}'", other),
            }
        }
        if let Ok(dir) = std::env::var("KEELDB_SOCKET_DIR") {
            self.socket_dir = PathBuf::from(dir);
        }
        if let Ok(delay) = std::env::var("KEELDB_BOOT_RETRY_DELAY") {
            if let Ok(ms) = delay.parse() {
                self.boot_retry_delay_ms = ms;
            }
        }
    }

    /// Returns the transport connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the handshake response timeout as a Duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Returns the receive poll slice as a Duration.
    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }

    /// Returns the peer-alive probe timeout as a Duration.
    pub fn alive_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.alive_probe_timeout_ms)
    }

    /// Returns the boot-retry delay as a Duration.
    pub fn boot_retry_delay(&self) -> Duration {
        Duration::from_millis(self.boot_retry_delay_ms)
    }

    /// Returns the Unix socket path for a named same-host process.
    pub fn unix_socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(format!("{name}.sock"))
    }

    /// Returns the master's Unix socket path.
    pub fn master_socket_path(&self) -> PathBuf {
        self.socket_dir.join(MASTER_SOCKET_NAME)
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.master_port, DEFAULT_MASTER_PORT);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_slice(), Duration::from_secs(5));
        assert_eq!(config.alive_check, AliveCheckMode::None);
        assert!(config.keepalive);
        assert!(config.no_delay);
    }

    #[test]
    fn test_socket_paths() {
        let config = LinkConfig {
            socket_dir: PathBuf::from("/var/run/keeldb"),
            ..Default::default()
        };
        assert_eq!(
            config.unix_socket_path("demodb"),
            PathBuf::from("/var/run/keeldb/demodb.sock")
        );
        assert_eq!(
            config.master_socket_path(),
            PathBuf::from("/var/run/keeldb/keeldb_master.sock")
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "master_port: 9001\nconnect_timeout_ms: 250\nalive_check: both\nkeepalive: false"
        )
        .unwrap();

        let config = LinkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.master_port, 9001);
        assert_eq!(config.connect_timeout_ms, 250);
        assert_eq!(config.alive_check, AliveCheckMode::Both);
        assert!(!config.keepalive);
        // Unspecified fields keep their defaults
        assert_eq!(config.response_timeout_ms, 30_000);
    }

    #[test]
    fn test_from_file_missing() {
        let result = LinkConfig::from_file("/nonexistent/keeldb-link.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "master_port: [not, a, port]").unwrap();
        let result = LinkConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }
}
