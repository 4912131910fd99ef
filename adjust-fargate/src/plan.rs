//! Turning a settings document into changes to ECS services.
//!
//! Everything here is checked before the first remote call; the only part
//! that needs remote state is [`ComponentPlan::revise`], which compares the
//! plan with the current task definition.

use std::collections::BTreeMap;

use adjust_driver::{
    error::Failure,
    schema::{Adjustment, ComponentValues, SettingKind, SettingValue},
};

use crate::{
    config::{Config, SettingConfig},
    ecs::{ServiceState, TaskDefinition},
    sizing,
};

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const REPLICAS: &str = "replicas";

/// What an adjust asks of one ECS service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentPlan {
    pub component: String,
    pub service: String,
    pub container: Option<String>,
    /// Task CPU units
    pub cpu: Option<u64>,
    /// Task memory in MiB
    pub memory: Option<u64>,
    pub replicas: Option<i32>,
    /// Environment overrides by variable name
    pub environment: BTreeMap<String, String>,
}

/// The remote changes needed to realize a [`ComponentPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// The task definition to register, if it differs from the current one
    pub task_definition: Option<TaskDefinition>,
    /// The new desired count, if it differs from the current one
    pub desired_count: Option<i32>,
}

impl Revision {
    pub fn is_noop(&self) -> bool {
        self.task_definition.is_none() && self.desired_count.is_none()
    }
}

/// Validate `adjustment` against `config`, component by component in name
/// order.
pub fn plan(adjustment: &Adjustment, config: &Config) -> Result<Vec<ComponentPlan>, Failure> {
    adjustment
        .components
        .iter()
        .map(|(name, values)| plan_component(name, values, config))
        .collect()
}

fn plan_component(
    name: &str,
    values: &ComponentValues,
    config: &Config,
) -> Result<ComponentPlan, Failure> {
    let component_config = config.component(name);
    if component_config.is_none() && !config.components.is_empty() {
        return Err(Failure::InvalidInput(format!(
            "component {} is not configured",
            name
        )));
    }
    let declared = component_config.map(|c| &c.settings).filter(|s| !s.is_empty());

    let mut plan = ComponentPlan {
        component: name.to_string(),
        service: config.service(name).to_string(),
        container: component_config.and_then(|c| c.container.clone()),
        ..Default::default()
    };

    for (setting, value) in values {
        let setting_config = match declared {
            Some(declared) => Some(declared.get(setting).ok_or_else(|| {
                Failure::UnknownSetting {
                    component: name.to_string(),
                    setting: setting.clone(),
                }
            })?),
            None => None,
        };
        if let Some(c) = setting_config {
            check_bounds(name, setting, value, c)?;
        }
        match setting.as_str() {
            CPU => plan.cpu = Some(positive(name, setting, value)?),
            MEMORY => plan.memory = Some(positive(name, setting, value)?),
            REPLICAS => {
                let n = positive(name, setting, value)?;
                let n = i32::try_from(n).map_err(|_| {
                    Failure::InvalidInput(format!("{} replicas is too many for {}", n, name))
                })?;
                plan.replicas = Some(n);
            }
            _ => {
                let var = setting_config.map_or(setting.as_str(), |c| c.env_name(setting));
                if plan
                    .environment
                    .insert(var.to_string(), value.to_string())
                    .is_some()
                {
                    return Err(Failure::InvalidInput(format!(
                        "component {}: more than one setting maps to environment variable {}",
                        name, var
                    )));
                }
            }
        }
    }
    Ok(plan)
}

fn whole(component: &str, setting: &str, value: &SettingValue) -> Result<u64, Failure> {
    value.as_u64().ok_or_else(|| {
        Failure::InvalidInput(format!(
            "setting {} of component {} must be a whole number, got {}",
            setting, component, value
        ))
    })
}

fn positive(component: &str, setting: &str, value: &SettingValue) -> Result<u64, Failure> {
    match whole(component, setting, value)? {
        0 => Err(Failure::InvalidInput(format!(
            "setting {} of component {} must be positive",
            setting, component
        ))),
        n => Ok(n),
    }
}

fn check_bounds(
    component: &str,
    setting: &str,
    value: &SettingValue,
    config: &SettingConfig,
) -> Result<(), Failure> {
    match config.kind() {
        SettingKind::Range => {
            let v = value.as_f64().ok_or_else(|| {
                Failure::InvalidInput(format!(
                    "setting {} of component {} must be a number, got {}",
                    setting, component, value
                ))
            })?;
            let below = config.min.as_ref().and_then(|m| m.as_f64()).is_some_and(|m| v < m);
            let above = config.max.as_ref().and_then(|m| m.as_f64()).is_some_and(|m| v > m);
            if below || above {
                return Err(Failure::InvalidInput(format!(
                    "setting {} of component {} is out of range: {}",
                    setting, component, value
                )));
            }
        }
        SettingKind::Enum => {
            let rendered = value.to_string();
            let allowed = config
                .values
                .as_ref()
                .is_some_and(|vs| vs.iter().any(|v| v.to_string() == rendered));
            if !allowed {
                return Err(Failure::InvalidInput(format!(
                    "setting {} of component {} has value {} which is not one of its choices",
                    setting, component, value
                )));
            }
        }
    }
    Ok(())
}

impl ComponentPlan {
    /// Compare with the current state of the service and compute what has
    /// to change. Environment overrides replace variables of the same name.
    pub fn revise(
        &self,
        service: &ServiceState,
        current: &TaskDefinition,
        validate_sizing: bool,
    ) -> Result<Revision, Failure> {
        let mut wanted = current.clone();
        if let Some(cpu) = self.cpu {
            wanted.cpu = Some(cpu.to_string());
        }
        if let Some(memory) = self.memory {
            wanted.memory = Some(memory.to_string());
        }

        if !self.environment.is_empty() {
            let index = match &self.container {
                Some(name) => wanted.containers.iter().position(|c| &c.name == name),
                None => (!wanted.containers.is_empty()).then_some(0),
            };
            let container = index
                .and_then(|i| wanted.containers.get_mut(i))
                .ok_or_else(|| {
                    Failure::NotFound(format!(
                        "container {} in task definition {}",
                        self.container.as_deref().unwrap_or("(any)"),
                        current.arn
                    ))
                })?;
            for (k, v) in &self.environment {
                container.environment.insert(k.clone(), v.clone());
            }
        }

        if validate_sizing && (self.cpu.is_some() || self.memory.is_some()) {
            match (wanted.cpu_units(), wanted.memory_mib()) {
                (Some(cpu), Some(memory)) => sizing::check(cpu, memory)?,
                _ => {
                    return Err(Failure::Rejected(format!(
                        "task definition {} has no task-level cpu and memory",
                        current.arn
                    )))
                }
            }
        }

        Ok(Revision {
            task_definition: (wanted != *current).then_some(wanted),
            desired_count: self.replicas.filter(|r| *r != service.desired_count),
        })
    }
}
