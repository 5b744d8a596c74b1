//! TOML-based configuration persistence for the host.
//!
//! The default location is the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Peershare\config.toml`
//! - Linux:    `~/.config/peershare/config.toml`
//! - macOS:    `~/Library/Application Support/Peershare/config.toml`
//!
//! Example:
//!
//! ```toml
//! [host]
//! display_name = "Design review"
//! log_level = "debug"
//!
//! [handshake]
//! pin_timeout_secs = 10
//! name_timeout_secs = 60
//!
//! [discovery]
//! identity = "DISCOVERY"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a missing file, a
//! missing section, or a missing key all fall back to the production values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use peershare_core::discovery::{DiscoveryConfig, DISCOVERY_PEER_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::handshake::{HandshakeTimeouts, NAME_TIMEOUT, PIN_TIMEOUT};
use crate::infrastructure::network::host_session::{
    HostSessionConfig, CLOSE_LINGER, MAX_CODE_ATTEMPTS,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub handshake: HandshakeSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

/// General host behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// Name advertised in the session list.  Absent means unnamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Join handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeSection {
    #[serde(default = "default_pin_timeout_secs")]
    pub pin_timeout_secs: u64,
    #[serde(default = "default_name_timeout_secs")]
    pub name_timeout_secs: u64,
    /// Delay between a final rejection message and the disconnect.
    #[serde(default = "default_close_linger_ms")]
    pub close_linger_ms: u64,
    /// Fresh session codes tried when the first is already taken.
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,
}

/// Discovery service tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Well-known identity every instance competes to claim.
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_pin_timeout_secs() -> u64 {
    PIN_TIMEOUT.as_secs()
}
fn default_name_timeout_secs() -> u64 {
    NAME_TIMEOUT.as_secs()
}
fn default_close_linger_ms() -> u64 {
    CLOSE_LINGER.as_millis() as u64
}
fn default_max_code_attempts() -> u32 {
    MAX_CODE_ATTEMPTS
}
fn default_identity() -> String {
    DISCOVERY_PEER_ID.to_string()
}
fn default_sweep_interval_secs() -> u64 {
    DiscoveryConfig::default().sweep_interval.as_secs()
}
fn default_session_lifetime_secs() -> u64 {
    DiscoveryConfig::default().session_lifetime.as_secs()
}
fn default_request_timeout_secs() -> u64 {
    DiscoveryConfig::default().request_timeout.as_secs()
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            display_name: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            pin_timeout_secs: default_pin_timeout_secs(),
            name_timeout_secs: default_name_timeout_secs(),
            close_linger_ms: default_close_linger_ms(),
            max_code_attempts: default_max_code_attempts(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            sweep_interval_secs: default_sweep_interval_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl HostConfig {
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            identity: self.discovery.identity.clone(),
            sweep_interval: Duration::from_secs(self.discovery.sweep_interval_secs),
            session_lifetime: Duration::from_secs(self.discovery.session_lifetime_secs),
            request_timeout: Duration::from_secs(self.discovery.request_timeout_secs),
        }
    }

    pub fn session_config(&self) -> HostSessionConfig {
        HostSessionConfig {
            timeouts: HandshakeTimeouts {
                pin: Duration::from_secs(self.handshake.pin_timeout_secs),
                name: Duration::from_secs(self.handshake.name_timeout_secs),
            },
            close_linger: Duration::from_millis(self.handshake.close_linger_ms),
            // At least one attempt, whatever the file says.
            max_code_attempts: self.handshake.max_code_attempts.max(1),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path for this platform.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `HostConfig` from `path`, returning `HostConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &HostConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Peershare"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("peershare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Peershare")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
