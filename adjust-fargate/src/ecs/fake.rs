//! In-memory ECS for tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use adjust_driver::error::Failure;
use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{Container, Deployment, EcsApi, Rollout, ServiceState, TaskDefinition, PRIMARY};

/// How a deployment started by `update_service` behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollouts {
    /// Settles after this many `describe_service` calls
    SettleAfter(usize),
    Never,
    Fail(String),
}

struct Service {
    task_definition: String,
    desired_count: i32,
    /// The deployment being rolled out and the polls left until it settles
    rolling: Option<(String, usize)>,
}

struct State {
    clusters: BTreeMap<String, BTreeMap<String, Service>>,
    task_definitions: BTreeMap<String, TaskDefinition>,
    calls: Vec<String>,
}

/// Clones share state, so a test can inspect what the driver did.
#[derive(Clone)]
pub struct FakeEcs {
    state: Arc<Mutex<State>>,
    rollouts: Rollouts,
}

impl FakeEcs {
    pub fn new(rollouts: Rollouts) -> Self {
        FakeEcs {
            state: Arc::new(Mutex::new(State {
                clusters: BTreeMap::new(),
                task_definitions: BTreeMap::new(),
                calls: Vec::new(),
            })),
            rollouts,
        }
    }

    /// A cluster with one Fargate service running revision 1 of a task
    /// definition named after the service.
    pub fn with_service(self, cluster: &str, service: &str, env: &[(&str, &str)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let arn = format!("arn:aws:ecs:us-east-1:123456789012:task-definition/{}:1", service);
            state.task_definitions.insert(
                arn.clone(),
                TaskDefinition {
                    arn: arn.clone(),
                    family: service.to_string(),
                    cpu: Some("512".to_string()),
                    memory: Some("1024".to_string()),
                    containers: vec![Container {
                        name: "app".to_string(),
                        environment: env
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    }],
                },
            );
            state.clusters.entry(cluster.to_string()).or_default().insert(
                service.to_string(),
                Service {
                    task_definition: arn,
                    desired_count: 1,
                    rolling: None,
                },
            );
        }
        self
    }

    /// Every remote call so far, as `operation:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn current_task_definition(&self, cluster: &str, service: &str) -> TaskDefinition {
        let state = self.state.lock().unwrap();
        let arn = &state.clusters[cluster][service].task_definition;
        state.task_definitions[arn].clone()
    }

    pub fn desired_count(&self, cluster: &str, service: &str) -> i32 {
        self.state.lock().unwrap().clusters[cluster][service].desired_count
    }
}

fn deployment(task_definition: &str, running: i32, desired: i32, rollout: Rollout) -> Deployment {
    Deployment {
        status: PRIMARY.to_string(),
        task_definition: task_definition.to_string(),
        desired_count: desired,
        running_count: running,
        failed_tasks: 0,
        rollout: Some(rollout),
    }
}

#[async_trait]
impl EcsApi for FakeEcs {
    async fn list_services(&self, cluster: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_services:{}", cluster));
        match state.clusters.get(cluster) {
            Some(services) => Ok(services.keys().cloned().collect()),
            None => Err(Failure::NotFound(format!("cluster {}", cluster)).into()),
        }
    }

    async fn describe_service(&self, cluster: &str, service: &str) -> Result<ServiceState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("describe_service:{}", service));
        let s = state
            .clusters
            .get_mut(cluster)
            .and_then(|c| c.get_mut(service))
            .ok_or_else(|| Failure::NotFound(format!("service {}", service)))?;

        let mut deployments = Vec::new();
        match &mut s.rolling {
            None => deployments.push(deployment(
                &s.task_definition,
                s.desired_count,
                s.desired_count,
                Rollout::Completed,
            )),
            Some((previous, polls_left)) => {
                let settled = match &self.rollouts {
                    Rollouts::SettleAfter(_) if *polls_left == 0 => true,
                    Rollouts::SettleAfter(_) => {
                        *polls_left -= 1;
                        false
                    }
                    Rollouts::Never => false,
                    Rollouts::Fail(reason) => {
                        deployments.push(deployment(
                            &s.task_definition,
                            0,
                            s.desired_count,
                            Rollout::Failed(reason.clone()),
                        ));
                        false
                    }
                };
                if settled {
                    s.rolling = None;
                    deployments.push(deployment(
                        &s.task_definition,
                        s.desired_count,
                        s.desired_count,
                        Rollout::Completed,
                    ));
                } else if deployments.is_empty() {
                    let mut old = deployment(previous, s.desired_count, 0, Rollout::Completed);
                    old.status = "ACTIVE".to_string();
                    deployments.push(deployment(
                        &s.task_definition,
                        0,
                        s.desired_count,
                        Rollout::InProgress,
                    ));
                    deployments.push(old);
                }
            }
        }

        Ok(ServiceState {
            name: service.to_string(),
            task_definition: s.task_definition.clone(),
            desired_count: s.desired_count,
            deployments,
        })
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("describe_task_definition:{}", arn));
        state
            .task_definitions
            .get(arn)
            .cloned()
            .ok_or_else(|| Failure::NotFound(format!("task definition {}", arn)).into())
    }

    async fn register_revision(&self, revision: &TaskDefinition) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("register_revision:{}", revision.family));
        if !state.task_definitions.contains_key(&revision.arn) {
            bail!("base task definition {} does not exist", revision.arn);
        }
        let number = state
            .task_definitions
            .values()
            .filter(|td| td.family == revision.family)
            .count()
            + 1;
        let arn = format!(
            "arn:aws:ecs:us-east-1:123456789012:task-definition/{}:{}",
            revision.family, number
        );
        let mut registered = revision.clone();
        registered.arn = arn.clone();
        state.task_definitions.insert(arn.clone(), registered);
        Ok(arn)
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
        desired_count: Option<i32>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update_service:{}", service));
        if !state.task_definitions.contains_key(task_definition) {
            return Err(Failure::Rejected(format!("unknown task definition {}", task_definition)).into());
        }
        let s = state
            .clusters
            .get_mut(cluster)
            .and_then(|c| c.get_mut(service))
            .ok_or_else(|| Failure::NotFound(format!("service {}", service)))?;
        let polls = match self.rollouts {
            Rollouts::SettleAfter(n) => n,
            _ => 0,
        };
        let previous = std::mem::replace(&mut s.task_definition, task_definition.to_string());
        s.rolling = Some((previous, polls));
        if let Some(n) = desired_count {
            s.desired_count = n;
        }
        Ok(())
    }
}
