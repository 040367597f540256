// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! YAML configuration for InfluxDB destinations.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Smallest accepted batch buffer.
pub const MIN_BUFFER_SIZE: usize = 256;

const DEFAULT_BUFFER_SIZE: usize = 65536;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PORT: u16 = 8086;

/// Top-level writer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    /// One entry per InfluxDB endpoint to write to.
    pub destinations: Vec<DestinationConfig>,
    /// Upper bound on concurrent HTTP connections. None = default (4).
    pub max_connections: Option<usize>,
    /// Upper bound on pooled connections per endpoint host. None or 0 =
    /// unlimited.
    pub max_host_connections: Option<usize>,
}

/// Configuration for a single InfluxDB endpoint.
///
/// Either `url` is given, or `host` plus `database` (with an optional
/// `port`) from which the write URL is derived. The two styles are
/// mutually exclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Name used in log messages.
    pub name: String,

    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Convert cumulative values to per-second gauge rates.
    #[serde(default)]
    pub store_rates: bool,
    /// Write integer fields as floats instead of with the `i` suffix.
    #[serde(default)]
    pub int_as_float: bool,

    /// Measurement template. None = default (`%p_%f` with host,
    /// instance, type and type_instance tags).
    pub format: Option<String>,
    /// Extra tag templates, applied in order.
    #[serde(default)]
    pub tags: Vec<TagConfig>,

    /// Per-request timeout in milliseconds. None = default (10000).
    pub request_timeout_ms: Option<u64>,
    /// Batch buffer size in bytes. None = default (65536).
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    pub name: String,
    pub template: String,
}

/// Configuration parsing and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    /// YAML parsing failed.
    Yaml(serde_yaml::Error),
    /// File I/O failed.
    Io(std::io::Error),
    /// The parsed configuration is inconsistent.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Yaml(e) => write!(f, "YAML parse error: {}", e),
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Yaml(e) => Some(e),
            ConfigError::Io(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl WriterConfig {
    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: WriterConfig = serde_yaml::from_str(yaml)?;
        for dest in &config.destinations {
            dest.validate()?;
        }
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Invalid(msg));

        if self.url.is_some() {
            if self.host.is_some() {
                return fail(format!("{}: host cannot be given together with url", self.name));
            }
            if self.port.is_some() {
                return fail(format!("{}: port cannot be given together with url", self.name));
            }
            if self.database.is_some() {
                return fail(format!(
                    "{}: database cannot be given together with url",
                    self.name
                ));
            }
        } else {
            if self.host.is_none() {
                return fail(format!("{}: no host given", self.name));
            }
            if self.database.is_none() {
                return fail(format!("{}: no database given", self.name));
            }
        }

        if self.username.is_some() != self.password.is_some() {
            return fail(format!(
                "{}: username and password must be given together",
                self.name
            ));
        }

        if self.request_timeout_ms == Some(0) {
            return fail(format!("{}: request_timeout_ms must be positive", self.name));
        }

        if self.buffer_size.is_some_and(|n| n < MIN_BUFFER_SIZE) {
            return fail(format!(
                "{}: buffer_size must be at least {} bytes",
                self.name, MIN_BUFFER_SIZE
            ));
        }

        Ok(())
    }

    /// The URL writes go to, derived from host/port/database unless
    /// given verbatim.
    pub fn effective_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        // validate() guarantees host and database are present here.
        let host = self.host.as_deref().unwrap_or("localhost");
        let db = self.database.as_deref().unwrap_or("");
        let port = self.port.unwrap_or(DEFAULT_PORT);
        format!("http://{}:{}/write?db={}", host, port, db)
    }

    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    pub fn effective_request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
    }
}
