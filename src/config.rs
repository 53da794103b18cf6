//! Configuration loading using Figment.
//!
//! Configuration is read from:
//! 1. a TOML file (`config/sonia.toml` by default),
//! 2. environment variables prefixed with `SONIA_`, where `__` separates nesting
//!    levels (e.g. `SONIA_SERIAL__SETTINGS__BAUDRATE=115200`).
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration with no serial port.
//!
//! Besides the typed [`SoniaConfig`], components can look values up by name
//! through a [`ParameterSource`]. Lookups never fail: a missing or mistyped key
//! keeps the caller's default and logs a warning.
//!
//! # Example
//! ```no_run
//! use sonia_common::config::SoniaConfig;
//!
//! let config = SoniaConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), sonia_common::error::SoniaError>(())
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SoniaError};
use crate::io::serial::{Serial, SerialBuilder, SerialSettings, Timeout};
use crate::logging::OutputFormat;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sonia.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "SONIA_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoniaConfig {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Default serial port.
    pub serial: SerialConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sonia".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Serial port configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path; empty means "not configured".
    pub port: String,
    /// Framing.
    pub settings: SerialSettings,
    /// Read and write timeouts.
    pub timeout: Timeout,
}

impl SerialConfig {
    /// A [`Serial`] builder preloaded with this configuration.
    pub fn builder(&self) -> SerialBuilder {
        Serial::builder(self.port.clone())
            .settings(self.settings)
            .timeout(self.timeout)
    }

    /// Build the port and open it when a path is configured.
    pub fn open(&self) -> Result<Serial> {
        self.builder().open()
    }
}

impl SoniaConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`SoniaConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate values serde cannot check.
    pub fn validate(&self) -> Result<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(SoniaError::invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }
        self.serial.settings.validate()
    }
}

// =============================================================================
// Named parameter lookup
// =============================================================================

/// Soft lookup of named configuration values within a namespace.
pub trait ParameterSource {
    /// Namespace prepended to every key, `/`-separated in messages.
    fn namespace(&self) -> &str;

    /// Fetch `key`, or `None` if it is missing or has the wrong type.
    fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V>;

    /// Overwrite `value` with `key` when present. Otherwise keep it and warn.
    /// Returns whether the value was found.
    fn find_parameter<V: DeserializeOwned>(&self, key: &str, value: &mut V) -> bool {
        self.find_parameter_with(key, |found| *value = found)
    }

    /// Call `apply` with `key` when present. Otherwise warn.
    /// Returns whether the value was found.
    fn find_parameter_with<V, F>(&self, key: &str, apply: F) -> bool
    where
        V: DeserializeOwned,
        F: FnOnce(V),
    {
        match self.lookup(key) {
            Some(found) => {
                apply(found);
                true
            }
            None => {
                warn!(
                    "Did not find {}/{}. Using default value instead.",
                    self.namespace(),
                    key
                );
                false
            }
        }
    }
}

/// [`ParameterSource`] over a Figment provider stack.
///
/// The namespace `"sensors/dvl"` maps onto the table path `sensors.dvl`.
#[derive(Debug, Clone)]
pub struct FigmentParameters {
    figment: Figment,
    namespace: String,
}

impl FigmentParameters {
    /// Look keys up under `namespace` in `figment`.
    pub fn new(figment: Figment, namespace: impl Into<String>) -> Self {
        Self {
            figment,
            namespace: namespace.into(),
        }
    }

    /// Look keys up under `namespace` in a configuration file plus environment.
    pub fn from_file(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self::new(SoniaConfig::figment(path.into()), namespace)
    }

    fn key_path(&self, key: &str) -> String {
        let namespace = self.namespace.trim_matches('/').replace('/', ".");
        let key = key.trim_matches('/').replace('/', ".");
        if namespace.is_empty() {
            key
        } else {
            format!("{namespace}.{key}")
        }
    }
}

impl ParameterSource for FigmentParameters {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.figment.extract_inner(&self.key_path(key)).ok()
    }
}
