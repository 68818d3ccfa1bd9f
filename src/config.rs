//! Configuration module for the exporter.
//!
//! Targets are read from a YAML file; process-level settings come from the
//! command line and may be defaulted from the file's `server` section.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDRESS: &str = "localhost:9101";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_HOPS: u32 = 30;
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_HOPS_LIMIT: u32 = 64;

/// Paths served by the exporter itself; the metrics path may not shadow them.
pub const RESERVED_PATHS: [&str; 2] = ["/-/healthy", "/-/reload"];

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid duration {0:?}")]
    Duration(String),
    #[error("config validation failed: {0}")]
    Invalid(String),
}

/// A host to trace on a fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub host: String,
    /// Unique display name, defaults to the host.
    pub name: String,
    pub interval: Duration,
    pub max_hops: u32,
}

impl Target {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            name: host.to_string(),
            interval: DEFAULT_INTERVAL,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }
}

/// Optional `server` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_address: Option<String>,
    pub metrics_path: Option<String>,
}

/// Validated exporter configuration.
#[derive(Debug, Clone, Default)]
pub struct ExporterConfig {
    pub server: ServerSection,
    pub targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: Option<ServerSection>,
    #[serde(default)]
    targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    #[serde(default)]
    host: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    interval: Option<RawDuration>,
    #[serde(default)]
    max_hops: Option<i64>,
}

/// Durations are written either as `"5m"`-style strings or as plain seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

impl RawDuration {
    fn resolve(&self) -> Result<Duration, ConfigError> {
        match self {
            RawDuration::Seconds(secs) => Duration::try_from_secs_f64(*secs)
                .map_err(|_| ConfigError::Duration(secs.to_string())),
            RawDuration::Text(text) if text.trim().is_empty() => Ok(DEFAULT_INTERVAL),
            RawDuration::Text(text) => parse_duration(text),
        }
    }
}

impl ExporterConfig {
    /// Load, default and validate the config file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(data)?;

        let targets = raw
            .targets
            .into_iter()
            .map(RawTarget::into_target)
            .collect::<Result<Vec<_>, _>>()?;

        let cfg = Self {
            server: raw.server.unwrap_or_default(),
            targets,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid(
                "no targets defined in configuration".to_string(),
            ));
        }

        if let Some(path) = &self.server.metrics_path {
            validate_metrics_path(path)?;
        }

        let mut names = HashSet::new();
        for (i, target) in self.targets.iter().enumerate() {
            if target.host.is_empty() {
                return Err(ConfigError::Invalid(format!("target {}: host is required", i)));
            }
            if target.interval < MIN_INTERVAL {
                return Err(ConfigError::Invalid(format!(
                    "target {}: interval must be at least 1 second",
                    target.host
                )));
            }
            if target.max_hops < 1 || target.max_hops > MAX_HOPS_LIMIT {
                return Err(ConfigError::Invalid(format!(
                    "target {}: max_hops must be between 1 and {}",
                    target.host, MAX_HOPS_LIMIT
                )));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
        }

        Ok(())
    }
}

impl RawTarget {
    fn into_target(self) -> Result<Target, ConfigError> {
        let interval = match &self.interval {
            Some(raw) => raw.resolve().map_err(|e| {
                ConfigError::Invalid(format!("invalid interval for target {}: {}", self.host, e))
            })?,
            None => DEFAULT_INTERVAL,
        };

        let max_hops = match self.max_hops {
            None | Some(0) => DEFAULT_MAX_HOPS,
            // Out-of-range values are reported by validate().
            Some(n) => u32::try_from(n).unwrap_or(0),
        };

        let name = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => self.host.clone(),
        };

        Ok(Target {
            host: self.host,
            name,
            interval,
            max_hops,
        })
    }
}

/// Check that `path` can be mounted as the metrics route.
pub fn validate_metrics_path(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "metrics path {:?} must start with '/'",
            path
        )));
    }
    if path.contains(['{', '}']) {
        return Err(ConfigError::Invalid(format!(
            "metrics path {:?} must not contain '{{' or '}}'",
            path
        )));
    }
    if RESERVED_PATHS.contains(&path) {
        return Err(ConfigError::Invalid(format!(
            "metrics path {:?} collides with a built-in endpoint",
            path
        )));
    }
    Ok(())
}

/// Parse a Go-style duration such as `300ms`, `1.5s`, `5m` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    static FULL: OnceLock<Regex> = OnceLock::new();
    static PART: OnceLock<Regex> = OnceLock::new();
    let full = FULL.get_or_init(|| {
        Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|μs|ms|s|m|h))+$").unwrap()
    });
    let part = PART.get_or_init(|| {
        Regex::new(r"(?P<val>\d+(?:\.\d*)?|\.\d+)(?P<unit>ns|us|µs|μs|ms|s|m|h)").unwrap()
    });

    let text = input.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if !full.is_match(text) {
        return Err(ConfigError::Duration(input.to_string()));
    }

    let mut nanos = 0.0f64;
    for caps in part.captures_iter(text) {
        let value: f64 = caps["val"]
            .parse()
            .map_err(|_| ConfigError::Duration(input.to_string()))?;
        let unit = match &caps["unit"] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            _ => 3600e9,
        };
        nanos += value * unit;
    }

    if nanos > u64::MAX as f64 {
        return Err(ConfigError::Duration(input.to_string()));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
