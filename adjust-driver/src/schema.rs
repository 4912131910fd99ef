//! Messages exchanged with the orchestrator.
//!
//! The settings document has the shape
//! `application.components[<name>].settings[<name>].value`; the same type is
//! used for adjust input and query output.

use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// A settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub application: Application,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub components: BTreeMap<String, Component>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub settings: BTreeMap<String, Setting>,
}

/// A single tunable value, with the optional bounds that a query reports.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Setting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<serde_json::Number>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SettingKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<SettingValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Setting {
    pub fn with_value(value: impl Into<SettingValue>) -> Self {
        Setting {
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Range,
    Enum,
}

/// Setting values are JSON numbers or strings; anything else is rejected
/// while parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(serde_json::Number),
    Text(String),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => n.as_f64(),
            SettingValue::Text(_) => None,
        }
    }

    /// The value as a whole number, accepting floats without a fractional part.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SettingValue::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            SettingValue::Text(_) => None,
        }
    }
}

impl Display for SettingValue {
    /// Renders the value the way it would appear in an environment variable.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Number(n) => write!(f, "{}", n),
            SettingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for SettingValue {
    fn from(n: u64) -> Self {
        SettingValue::Number(n.into())
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Text(s)
    }
}

/// Values requested for one component, by setting name.
pub type ComponentValues = BTreeMap<String, SettingValue>;

/// A validated adjust request: every setting carries a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Adjustment {
    pub components: BTreeMap<String, ComponentValues>,
}

impl Description {
    pub fn adjustment(&self) -> Result<Adjustment, Failure> {
        let mut components = BTreeMap::new();
        for (component_name, component) in &self.application.components {
            let mut values = ComponentValues::new();
            for (setting_name, setting) in &component.settings {
                let value = setting.value.clone().ok_or_else(|| {
                    Failure::InvalidInput(format!(
                        "setting {} of component {} has no value",
                        setting_name, component_name
                    ))
                })?;
                values.insert(setting_name.clone(), value);
            }
            components.insert(component_name.clone(), values);
        }
        Ok(Adjustment { components })
    }
}

/// The `--info` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub description: String,
    pub version: String,
    pub has_cancel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Failed,
    Cancelled,
}

/// The final line written by an adjust, or by a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
