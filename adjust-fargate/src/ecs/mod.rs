//! The slice of the ECS API that the driver needs.

mod aws;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

pub use aws::AwsEcs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub name: String,
    /// ARN of the task definition the service is set to
    pub task_definition: String,
    pub desired_count: i32,
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// `PRIMARY`, `ACTIVE` or `INACTIVE`
    pub status: String,
    pub task_definition: String,
    pub desired_count: i32,
    pub running_count: i32,
    pub failed_tasks: i32,
    pub rollout: Option<Rollout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollout {
    InProgress,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Pending { running: i32, desired: i32 },
    Failed(String),
}

pub const PRIMARY: &str = "PRIMARY";

impl ServiceState {
    pub fn primary(&self) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.status == PRIMARY)
    }

    /// How far the service is from running `task_definition` everywhere.
    pub fn stability(&self, task_definition: &str) -> Stability {
        let primary = match self.primary() {
            Some(p) => p,
            None => {
                return Stability::Pending {
                    running: 0,
                    desired: self.desired_count,
                }
            }
        };
        if let Some(Rollout::Failed(reason)) = &primary.rollout {
            return Stability::Failed(format!("deployment failed: {}", reason));
        }
        if primary.task_definition != task_definition {
            return Stability::Failed(format!(
                "service {} moved to task definition {}",
                self.name, primary.task_definition
            ));
        }
        let settled = self.deployments.len() == 1
            && primary.running_count == primary.desired_count
            && primary.rollout != Some(Rollout::InProgress);
        if settled {
            Stability::Stable
        } else {
            Stability::Pending {
                running: primary.running_count,
                desired: primary.desired_count,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub arn: String,
    pub family: String,
    /// Task-level CPU units, as ECS reports them (e.g. `"256"`)
    pub cpu: Option<String>,
    /// Task-level memory in MiB
    pub memory: Option<String>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub environment: BTreeMap<String, String>,
}

impl TaskDefinition {
    /// The named container, or the first one.
    pub fn container(&self, name: Option<&str>) -> Option<&Container> {
        match name {
            Some(name) => self.containers.iter().find(|c| c.name == name),
            None => self.containers.first(),
        }
    }

    pub fn cpu_units(&self) -> Option<u64> {
        self.cpu.as_deref().and_then(|s| s.trim().parse().ok())
    }

    pub fn memory_mib(&self) -> Option<u64> {
        self.memory.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

#[async_trait]
pub trait EcsApi: Send + Sync {
    /// Names of the services in `cluster`.
    async fn list_services(&self, cluster: &str) -> Result<Vec<String>>;

    async fn describe_service(&self, cluster: &str, service: &str) -> Result<ServiceState>;

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition>;

    /// Register a new revision of `revision.family`, based on the task
    /// definition `revision.arn` with cpu, memory and container environments
    /// taken from `revision`. Returns the ARN of the new revision.
    async fn register_revision(&self, revision: &TaskDefinition) -> Result<String>;

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
        desired_count: Option<i32>,
    ) -> Result<()>;
}
