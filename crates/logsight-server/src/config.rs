// logsight-server/src/config.rs
//! Environment-backed server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, resolved once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Root of all persistent state
    pub data_dir: PathBuf,
    /// Session idle window before eviction
    pub session_idle_timeout: Duration,
}

impl ServerConfig {
    /// Resolve configuration from the environment
    ///
    /// Recognized variables: `LOGSIGHT_ADDR`, `DATA_DIR`,
    /// `SESSION_IDLE_TIMEOUT_SECONDS`. `MAX_INTERN_POOL_SIZE` is read by
    /// the intern pool itself on first use.
    pub fn from_env() -> Self {
        let addr = std::env::var("LOGSIGHT_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let session_idle_timeout = std::env::var("SESSION_IDLE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(1800));

        Self {
            addr,
            data_dir,
            session_idle_timeout,
        }
    }

    /// Permanent file store directory
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Chunk staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.uploads_dir().join(".ws_temp")
    }

    /// Per-session analytical store directory
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Default assets directory (maps, rules)
    pub fn defaults_dir(&self) -> PathBuf {
        self.data_dir.join("defaults")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("./data"),
            session_idle_timeout: Duration::from_secs(1800),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_data_dir() {
        let config = ServerConfig {
            data_dir: PathBuf::from("/var/logsight"),
            ..Default::default()
        };
        assert_eq!(config.uploads_dir(), PathBuf::from("/var/logsight/uploads"));
        assert_eq!(
            config.staging_dir(),
            PathBuf::from("/var/logsight/uploads/.ws_temp")
        );
        assert_eq!(
            config.sessions_dir(),
            PathBuf::from("/var/logsight/sessions")
        );
    }
}
