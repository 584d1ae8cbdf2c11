use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default port the dispatcher listens on for builder connections.
pub const DEFAULT_PORT: u16 = 47374;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// TLS settings for the dispatcher's listening socket (PEM cert + key).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsServerConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// TLS settings for a builder connecting to the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsClientConfig {
    /// PEM file holding the CA (or self-signed server) certificate to trust.
    pub ca_cert_path: PathBuf,
    /// Name the server certificate must present.
    pub server_name: String,
}

/// Configuration for the dispatcher side: the server that accepts
/// builder connections and queues submissions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub port: u16,
    /// TLS for inbound builder connections; plain TCP when absent.
    pub tls: Option<TlsServerConfig>,
    /// For plain TCP, peer addresses allowed to connect in addition
    /// to loopback.
    pub allowed_hosts: Vec<String>,
    /// Maximum testing attempts per submission before it is failed
    /// permanently.
    pub max_attempts: u32,
    /// How long a worker session waits on the queue before checking
    /// for shutdown and idle keepalive.
    pub queue_poll_interval_ms: u64,
    /// Idle time after which a keepalive sentinel is sent to the builder.
    pub idle_keepalive_ms: u64,
    /// How often the queue depth is sampled for health reporting.
    pub health_sample_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tls: None,
            allowed_hosts: Vec::new(),
            max_attempts: 10,
            queue_poll_interval_ms: 1_000,
            idle_keepalive_ms: 5_000,
            health_sample_interval_ms: 5_000,
        }
    }
}

/// Configuration for a builder worker process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Dispatcher host to connect to.
    pub server_host: String,
    pub server_port: u16,
    pub tls: Option<TlsClientConfig>,
    /// Delay before retrying a failed connection to the dispatcher.
    pub reconnect_delay_ms: u64,
    pub build: BuildConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: DEFAULT_PORT,
            tls: None,
            reconnect_delay_ms: 5_000,
            build: BuildConfig::default(),
        }
    }
}

/// Settings the build pipeline needs to compile and run submissions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Native compiler executable.
    pub compiler_path: PathBuf,
    /// Interpreter executable for script problems.
    pub interpreter_path: PathBuf,
    /// Where per-submission scratch directories are created;
    /// system temp dir when absent.
    pub scratch_root: Option<PathBuf>,
    /// Hard ceiling on compile time; compiles are trusted less than
    /// they should be (template abuse, include bombs).
    pub compile_timeout_ms: u64,
    /// Interval at which the command executor polls a test process.
    pub executor_poll_interval_ms: u64,
    /// Wall-clock ceiling = cpu limit * multiplier. Catches processes
    /// that sleep or block without consuming CPU time.
    pub wall_clock_multiplier: u64,
    /// Wall-clock ceiling when no CPU limit is configured.
    pub default_wall_clock_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compiler_path: PathBuf::from("cc"),
            interpreter_path: PathBuf::from("python3"),
            scratch_root: None,
            compile_timeout_ms: 30_000,
            executor_poll_interval_ms: 500,
            wall_clock_multiplier: 2,
            default_wall_clock_secs: 8,
        }
    }
}

/// Load a YAML config file into any of the config types above.
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_attempts, 10);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.yaml");
        std::fs::write(&path, "port: 9000\nmax_attempts: 3\n").unwrap();

        let cfg: DispatchConfig = load_config(&path).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_attempts, 3);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.queue_poll_interval_ms, 1_000);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config::<DispatchConfig>(Path::new("/nonexistent/cfg.yaml"));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }
}
