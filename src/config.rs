//! Client configuration with environment variable and config file support.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set through [`ClientConfig`] setters
//! 2. **Environment variables** — values from `EVFETCH_*` env vars
//! 3. **Config file** — values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults** — built-in defaults from [`ClientConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EVFETCH_CONNECT_TIMEOUT_MS` | `u64` | `connect_timeout` |
//! | `EVFETCH_HANDSHAKE_TIMEOUT_MS` | `u64` | `handshake_timeout` |
//! | `EVFETCH_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `EVFETCH_READ_CHUNK_SIZE` | `usize` | `read_chunk_size` |
//! | `EVFETCH_MAX_HEADER_SIZE` | `usize` | `max_header_size` |
//! | `EVFETCH_MAX_BODY_SIZE` | `usize` | `max_body_size` |
//! | `EVFETCH_VERIFY_PEER` | `bool` | `verify_peer` |

use crate::http::h1::DecoderLimits;
use crate::http::h1::decoder::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
use std::time::Duration;

/// Environment variable name for the connect deadline in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "EVFETCH_CONNECT_TIMEOUT_MS";
/// Environment variable name for the TLS handshake deadline in milliseconds.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "EVFETCH_HANDSHAKE_TIMEOUT_MS";
/// Environment variable name for the idle-read deadline in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "EVFETCH_IDLE_TIMEOUT_MS";
/// Environment variable name for the socket read chunk size.
pub const ENV_READ_CHUNK_SIZE: &str = "EVFETCH_READ_CHUNK_SIZE";
/// Environment variable name for the response head size limit.
pub const ENV_MAX_HEADER_SIZE: &str = "EVFETCH_MAX_HEADER_SIZE";
/// Environment variable name for the response body size limit.
pub const ENV_MAX_BODY_SIZE: &str = "EVFETCH_MAX_BODY_SIZE";
/// Environment variable name for TLS peer verification.
pub const ENV_VERIFY_PEER: &str = "EVFETCH_VERIFY_PEER";

/// Default connect deadline (resolution plus TCP connect).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default TLS handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default idle-read deadline.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default socket read chunk size.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Errors from building or loading a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The config file could not be read or parsed.
    #[error("config file error: {0}")]
    File(String),
    /// The client was built without a sink.
    #[error("no sink configured")]
    MissingSink,
}

/// Settings shared by every request a client issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for resolution plus TCP connect.
    pub connect_timeout: Duration,
    /// Deadline for the TLS handshake, armed once TCP is connected.
    pub handshake_timeout: Duration,
    /// Longest gap without response bytes, armed once the request is sent.
    pub idle_timeout: Duration,
    /// Bytes read from the socket per read call.
    pub read_chunk_size: usize,
    /// Cap on the response status line plus headers.
    pub max_header_size: usize,
    /// Cap on the decoded response body.
    pub max_body_size: usize,
    /// Verify the server certificate chain and name.
    pub verify_peer: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            verify_peer: true,
        }
    }
}

impl ClientConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Defaults, then the TOML file at `path`, then environment overrides.
    #[cfg(feature = "config-file")]
    pub fn from_file_and_env(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_toml_config(&mut config, &parse_toml_file(path)?);
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Sets the connect deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the TLS handshake deadline.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the idle-read deadline.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the socket read chunk size.
    #[must_use]
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Sets the response head size limit.
    #[must_use]
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Sets the response body size limit.
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Enables or disables TLS peer verification.
    #[must_use]
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Decoder limits derived from this configuration.
    #[must_use]
    pub fn decoder_limits(&self) -> DecoderLimits {
        DecoderLimits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
        }
    }

    /// Rejects zero timeouts and sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("connect_timeout", self.connect_timeout.is_zero()),
            ("handshake_timeout", self.handshake_timeout.is_zero()),
            ("idle_timeout", self.idle_timeout.is_zero()),
            ("read_chunk_size", self.read_chunk_size == 0),
            ("max_header_size", self.max_header_size == 0),
            ("max_body_size", self.max_body_size == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("{name} must be non-zero"))),
            None => Ok(()),
        }
    }
}

/// Apply environment variable overrides to a [`ClientConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut ClientConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_CONNECT_TIMEOUT_MS) {
        config.connect_timeout = Duration::from_millis(parse_u64(ENV_CONNECT_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_HANDSHAKE_TIMEOUT_MS) {
        config.handshake_timeout =
            Duration::from_millis(parse_u64(ENV_HANDSHAKE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Duration::from_millis(parse_u64(ENV_IDLE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_READ_CHUNK_SIZE) {
        config.read_chunk_size = parse_usize(ENV_READ_CHUNK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_HEADER_SIZE) {
        config.max_header_size = parse_usize(ENV_MAX_HEADER_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_BODY_SIZE) {
        config.max_body_size = parse_usize(ENV_MAX_BODY_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_VERIFY_PEER) {
        config.verify_peer = parse_bool(ENV_VERIFY_PEER, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| ConfigError::Env {
        var,
        value: val.to_owned(),
        expected: "unsigned integer",
    })
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::Env {
        var,
        value: val.to_owned(),
        expected: "unsigned integer",
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var,
            value: val.to_owned(),
            expected: "bool (true/false/1/0/yes/no)",
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable client configuration.
///
/// ```toml
/// connect_timeout_ms = 5000
/// handshake_timeout_ms = 5000
/// idle_timeout_ms = 30000
/// read_chunk_size = 16384
/// max_header_size = 65536
/// max_body_size = 67108864
/// verify_peer = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClientTomlConfig {
    /// Connect deadline in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// TLS handshake deadline in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
    /// Idle-read deadline in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Socket read chunk size.
    pub read_chunk_size: Option<usize>,
    /// Response head size limit.
    pub max_header_size: Option<usize>,
    /// Response body size limit.
    pub max_body_size: Option<usize>,
    /// TLS peer verification.
    pub verify_peer: Option<bool>,
}

/// Apply a parsed TOML config to a [`ClientConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut ClientConfig, toml: &ClientTomlConfig) {
    if let Some(ms) = toml.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.handshake_timeout_ms {
        config.handshake_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(ms);
    }
    if let Some(v) = toml.read_chunk_size {
        config.read_chunk_size = v;
    }
    if let Some(v) = toml.max_header_size {
        config.max_header_size = v;
    }
    if let Some(v) = toml.max_body_size {
        config.max_body_size = v;
    }
    if let Some(v) = toml.verify_peer {
        config.verify_peer = v;
    }
}

/// Parse a TOML string into a [`ClientTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ClientTomlConfig, ConfigError> {
    toml::from_str(toml_str)
        .map_err(|e| ConfigError::File(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`ClientTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ClientTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::File(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 7] = [
        ENV_CONNECT_TIMEOUT_MS,
        ENV_HANDSHAKE_TIMEOUT_MS,
        ENV_IDLE_TIMEOUT_MS,
        ENV_READ_CHUNK_SIZE,
        ENV_MAX_HEADER_SIZE,
        ENV_MAX_BODY_SIZE,
        ENV_VERIFY_PEER,
    ];

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        // SAFETY: env mutation is serialized by the env lock.
        unsafe {
            for var in ALL_VARS {
                std::env::remove_var(var);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }
        let result = f();
        // SAFETY: as above.
        unsafe {
            for (k, _) in vars {
                std::env::remove_var(k);
            }
        }
        result
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.read_chunk_size, 8192);
        assert_eq!(config.max_header_size, 64 * 1024);
        assert_eq!(config.max_body_size, 64 * 1024 * 1024);
        assert!(config.verify_peer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_u64("T", " 250 ").unwrap(), 250);
        assert!(parse_u64("T", "-1").is_err());
        assert_eq!(parse_usize("T", "4096").unwrap(), 4096);
        for truthy in ["true", "1", "YES", "on"] {
            assert!(parse_bool("T", truthy).unwrap());
        }
        for falsy in ["false", "0", "no", "OFF"] {
            assert!(!parse_bool("T", falsy).unwrap());
        }
        assert!(parse_bool("T", "maybe").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let config = with_envs(
            &[
                (ENV_CONNECT_TIMEOUT_MS, "1500"),
                (ENV_IDLE_TIMEOUT_MS, "250"),
                (ENV_READ_CHUNK_SIZE, "1024"),
                (ENV_VERIFY_PEER, "off"),
            ],
            ClientConfig::from_env,
        )
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.read_chunk_size, 1024);
        assert!(!config.verify_peer);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn env_unset_leaves_defaults() {
        let config = with_envs(&[], ClientConfig::from_env).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn env_invalid_value_is_reported() {
        let err = with_envs(&[(ENV_MAX_BODY_SIZE, "lots")], ClientConfig::from_env).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Env {
                var: ENV_MAX_BODY_SIZE,
                value: "lots".into(),
                expected: "unsigned integer",
            }
        );
        assert!(err.to_string().contains(ENV_MAX_BODY_SIZE));
    }

    #[test]
    fn validate_rejects_zeroes() {
        let err = ClientConfig::default()
            .idle_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid("idle_timeout must be non-zero".into())
        );
        assert!(ClientConfig::default().read_chunk_size(0).validate().is_err());
    }

    #[test]
    fn decoder_limits_follow_config() {
        let limits = ClientConfig::default()
            .max_header_size(100)
            .max_body_size(200)
            .decoder_limits();
        assert_eq!(limits.max_header_size, 100);
        assert_eq!(limits.max_body_size, 200);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_partial_config_applies() {
        let toml = parse_toml_str("idle_timeout_ms = 750\nverify_peer = false\n").unwrap();
        let mut config = ClientConfig::default();
        apply_toml_config(&mut config, &toml);
        assert_eq!(config.idle_timeout, Duration::from_millis(750));
        assert!(!config.verify_peer);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_rejects_unknown_keys_and_bad_types() {
        assert!(parse_toml_str("idle_timeout = 5").is_err());
        assert!(parse_toml_str("read_chunk_size = \"big\"").is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn env_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evfetch.toml");
        std::fs::write(&path, "connect_timeout_ms = 100\nmax_header_size = 512\n").unwrap();
        let config = with_envs(&[(ENV_CONNECT_TIMEOUT_MS, "200")], || {
            ClientConfig::from_file_and_env(&path)
        })
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(200));
        assert_eq!(config.max_header_size, 512);

        let missing = ClientConfig::from_file_and_env(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::File(_))));
    }
}
