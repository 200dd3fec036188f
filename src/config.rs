//! Runtime configuration loaded from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Width of the codes seeded into a new room (4 => 0000..9999)
    pub code_digits: u32,
    /// Retry policy for claims and outcome writes
    pub retry: RetryPolicy,
    /// Optional newline-separated popularity list replacing the built-in one
    pub rank_file: Option<PathBuf>,
    /// Events kept per room for replay on reconnect
    pub replay_buffer: usize,
    /// Keys remembered by each connection's dedup seen-set
    pub dedup_capacity: usize,
    /// How often a connected observer's tally is reset from a fresh scan
    pub stats_refresh: Duration,
    /// Participants without a heartbeat for this long are dropped from presence
    pub presence_timeout: Duration,
    /// Directory served as static files
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            code_digits: 4,
            retry: RetryPolicy::default(),
            rank_file: None,
            replay_buffer: 1024,
            dedup_capacity: 4096,
            stats_refresh: Duration::from_millis(5000),
            presence_timeout: Duration::from_secs(30),
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Parse an env var, falling back to the default when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring malformed config value");
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let code_digits = env_or("CODERAID_CODE_DIGITS", defaults.code_digits).clamp(1, 6);

        let retry = RetryPolicy {
            max_attempts: env_or("CODERAID_CLAIM_ATTEMPTS", defaults.retry.max_attempts).max(1),
            base_backoff: Duration::from_millis(env_or(
                "CODERAID_RETRY_BACKOFF_MS",
                defaults.retry.base_backoff.as_millis() as u64,
            )),
        };

        let rank_file = std::env::var("CODERAID_RANK_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let config = Self {
            bind_addr: env_or("CODERAID_BIND", defaults.bind_addr),
            code_digits,
            retry,
            rank_file,
            replay_buffer: env_or("CODERAID_REPLAY_BUFFER", defaults.replay_buffer).max(1),
            dedup_capacity: env_or("CODERAID_DEDUP_CAPACITY", defaults.dedup_capacity).max(1),
            stats_refresh: Duration::from_millis(
                env_or("CODERAID_STATS_REFRESH_MS", 5000u64).max(100),
            ),
            presence_timeout: Duration::from_secs(env_or("CODERAID_PRESENCE_TIMEOUT_SECS", 30u64)),
            static_dir: env_or("CODERAID_STATIC_DIR", defaults.static_dir),
        };

        tracing::info!(
            bind = %config.bind_addr,
            code_digits = config.code_digits,
            claim_attempts = config.retry.max_attempts,
            rank_file = ?config.rank_file,
            replay_buffer = config.replay_buffer,
            "Config loaded"
        );

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "CODERAID_BIND",
        "CODERAID_CODE_DIGITS",
        "CODERAID_CLAIM_ATTEMPTS",
        "CODERAID_RETRY_BACKOFF_MS",
        "CODERAID_RANK_FILE",
        "CODERAID_REPLAY_BUFFER",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.code_digits, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.rank_file.is_none());
        assert_eq!(config.bind_addr.port(), 3000);
    }

    #[test]
    #[serial]
    fn test_reads_overrides() {
        clear_env();
        std::env::set_var("CODERAID_CODE_DIGITS", "3");
        std::env::set_var("CODERAID_CLAIM_ATTEMPTS", "5");
        std::env::set_var("CODERAID_RANK_FILE", "/tmp/pins.txt");
        std::env::set_var("CODERAID_BIND", "127.0.0.1:8080");
        let config = Config::from_env();
        assert_eq!(config.code_digits, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rank_file, Some(PathBuf::from("/tmp/pins.txt")));
        assert_eq!(config.bind_addr.port(), 8080);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_malformed_values_fall_back() {
        clear_env();
        std::env::set_var("CODERAID_CLAIM_ATTEMPTS", "lots");
        std::env::set_var("CODERAID_REPLAY_BUFFER", "0");
        let config = Config::from_env();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.replay_buffer, 1);
        clear_env();
    }
}
