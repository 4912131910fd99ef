//! Driver configuration, read from the `fargate` section of the shared
//! configuration file.

use std::{collections::BTreeMap, path::Path, time::Duration};

use adjust_driver::{
    error::Failure,
    schema::{SettingKind, SettingValue},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

pub const SECTION: &str = "fargate";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Pins the ECS cluster; the target then only names the application.
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default = "default_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
    #[serde(default = "default_poll_interval", deserialize_with = "duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_true")]
    pub validate_sizing: bool,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    /// ECS service name; defaults to the component name
    #[serde(default)]
    pub service: Option<String>,
    /// Container receiving the environment settings; defaults to the first
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, SettingConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingConfig {
    #[serde(rename = "type", default)]
    pub kind: Option<SettingKind>,
    #[serde(default)]
    pub min: Option<serde_json::Number>,
    #[serde(default)]
    pub max: Option<serde_json::Number>,
    #[serde(default)]
    pub step: Option<serde_json::Number>,
    #[serde(default)]
    pub values: Option<Vec<SettingValue>>,
    /// Reported by query when the container does not set the variable
    #[serde(default)]
    pub default: Option<SettingValue>,
    /// Environment variable name, if it differs from the setting name
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            region: None,
            endpoint_url: None,
            cluster: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            validate_sizing: true,
            components: BTreeMap::new(),
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_true() -> bool {
    true
}

/// Durations are written the humantime way (`90s`, `10m`); a bare number is
/// seconds.
fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Seconds(s) => Ok(Duration::from_secs(s)),
        Raw::Text(t) => humantime::parse_duration(&t).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct File {
    #[serde(default)]
    fargate: Option<Config>,
}

impl Config {
    /// Load the configuration from `path`. A missing file yields the default
    /// configuration when `optional` is set.
    pub fn load(path: &Path, optional: bool) -> Result<Config> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(Failure::InvalidInput(format!(
                    "could not read configuration file {}: {}",
                    path.display(),
                    e
                ))
                .into())
            }
        };
        Self::parse(&text).with_context(|| format!("in configuration file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Config> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        let file: Option<File> = serde_yaml::from_str(text).map_err(|e| {
            Failure::InvalidInput(format!("invalid {} configuration: {}", SECTION, e))
        })?;
        Ok(file.and_then(|f| f.fargate).unwrap_or_default())
    }

    /// The ECS cluster for `target`.
    pub fn cluster<'a>(&'a self, target: &'a str) -> &'a str {
        self.cluster.as_deref().unwrap_or(target)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentConfig> {
        self.components.get(name)
    }

    pub fn service<'a>(&'a self, component: &'a str) -> &'a str {
        self.component(component)
            .and_then(|c| c.service.as_deref())
            .unwrap_or(component)
    }
}

impl SettingConfig {
    pub fn env_name<'a>(&'a self, setting: &'a str) -> &'a str {
        self.env.as_deref().unwrap_or(setting)
    }

    /// `enum` when choices are listed, `range` otherwise.
    pub fn kind(&self) -> SettingKind {
        self.kind.unwrap_or(if self.values.is_some() {
            SettingKind::Enum
        } else {
            SettingKind::Range
        })
    }
}
