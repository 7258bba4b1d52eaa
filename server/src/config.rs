//! Server configuration: `port`, `basePath`, `healthPath`, `snapshotDebounceMs`, `idleEvictMs`,
//! `heartbeatMs`, loaded from the CLI or from environment variables with the spec's defaults.
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub base_path: String,
    pub health_path: String,
    pub snapshot_debounce: Duration,
    pub idle_evict: Duration,
    pub heartbeat: Duration,
    pub storage_dir: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            base_path: lively_protocol::DEFAULT_BASE_PATH.to_string(),
            health_path: lively_protocol::DEFAULT_HEALTH_PATH.to_string(),
            snapshot_debounce: Duration::from_millis(lively_protocol::DEFAULT_SNAPSHOT_DEBOUNCE_MS),
            idle_evict: Duration::from_millis(lively_protocol::DEFAULT_IDLE_EVICT_MS),
            heartbeat: Duration::from_millis(lively_protocol::DEFAULT_HEARTBEAT_MS),
            storage_dir: std::path::PathBuf::from("./rooms"),
        }
    }
}

impl Config {
    /// Starts from [`Config::default`] and overrides any field whose environment variable is
    /// set. Unset or unparsable variables fall back to the default silently for booleans/paths,
    /// with a warning for malformed numeric overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LIVELY_PORT") {
            match v.parse() {
                Ok(port) => cfg.port = port,
                Err(_) => tracing::warn!(value = %v, "ignoring malformed LIVELY_PORT"),
            }
        }
        if let Ok(v) = std::env::var("LIVELY_BASE_PATH") {
            cfg.base_path = v;
        }
        if let Ok(v) = std::env::var("LIVELY_HEALTH_PATH") {
            cfg.health_path = v;
        }
        if let Ok(v) = std::env::var("LIVELY_SNAPSHOT_DEBOUNCE_MS") {
            match v.parse() {
                Ok(ms) => cfg.snapshot_debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %v, "ignoring malformed LIVELY_SNAPSHOT_DEBOUNCE_MS"),
            }
        }
        if let Ok(v) = std::env::var("LIVELY_IDLE_EVICT_MS") {
            match v.parse() {
                Ok(ms) => cfg.idle_evict = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %v, "ignoring malformed LIVELY_IDLE_EVICT_MS"),
            }
        }
        if let Ok(v) = std::env::var("LIVELY_HEARTBEAT_MS") {
            match v.parse() {
                Ok(ms) => cfg.heartbeat = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %v, "ignoring malformed LIVELY_HEARTBEAT_MS"),
            }
        }
        if let Ok(v) = std::env::var("LIVELY_STORAGE_DIR") {
            cfg.storage_dir = std::path::PathBuf::from(v);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.base_path, "/rooms");
        assert_eq!(cfg.health_path, "/health");
        assert_eq!(cfg.snapshot_debounce, Duration::from_secs(2));
        assert_eq!(cfg.idle_evict, Duration::from_secs(60));
        assert_eq!(cfg.heartbeat, Duration::from_secs(20));
    }
}
