use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_ecs::{
    error::{DisplayErrorContext, SdkError},
    types::{self as ecs, DeploymentRolloutState, KeyValuePair},
};

use adjust_driver::error::Failure;

use super::{Container, Deployment, EcsApi, Rollout, ServiceState, TaskDefinition};
use crate::config::Config;

/// [`EcsApi`] backed by the AWS SDK. Credentials come from the SDK's default
/// provider chain.
pub struct AwsEcs {
    client: aws_sdk_ecs::Client,
}

impl AwsEcs {
    pub async fn connect(config: &Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        AwsEcs {
            client: aws_sdk_ecs::Client::new(&sdk_config),
        }
    }

    async fn raw_task_definition(&self, arn: &str) -> Result<ecs::TaskDefinition> {
        let out = self
            .client
            .describe_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(|e| {
                sdk_error(e, format!("describing task definition {}", arn), |e| {
                    (e.is_client_exception() || e.is_invalid_parameter_exception())
                        .then_some(Kind::NotFound)
                })
            })?;
        out.task_definition()
            .cloned()
            .ok_or_else(|| Failure::NotFound(format!("task definition {}", arn)).into())
    }
}

enum Kind {
    NotFound,
    Rejected,
}

fn sdk_error<E, R>(
    err: SdkError<E, R>,
    action: String,
    kind: impl FnOnce(&E) -> Option<Kind>,
) -> anyhow::Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{}: {}", action, DisplayErrorContext(&err));
    match err.as_service_error().and_then(kind) {
        Some(Kind::NotFound) => Failure::NotFound(detail).into(),
        Some(Kind::Rejected) => Failure::Rejected(detail).into(),
        None => anyhow!(detail),
    }
}

fn service_state(s: &ecs::Service) -> ServiceState {
    ServiceState {
        name: s.service_name().unwrap_or_default().to_string(),
        task_definition: s.task_definition().unwrap_or_default().to_string(),
        desired_count: s.desired_count(),
        deployments: s
            .deployments()
            .iter()
            .map(|d| Deployment {
                status: d.status().unwrap_or_default().to_string(),
                task_definition: d.task_definition().unwrap_or_default().to_string(),
                desired_count: d.desired_count(),
                running_count: d.running_count(),
                failed_tasks: d.failed_tasks(),
                rollout: d.rollout_state().map(|r| match r {
                    DeploymentRolloutState::Completed => Rollout::Completed,
                    DeploymentRolloutState::Failed => {
                        Rollout::Failed(d.rollout_state_reason().unwrap_or_default().to_string())
                    }
                    _ => Rollout::InProgress,
                }),
            })
            .collect(),
    }
}

fn task_definition(td: &ecs::TaskDefinition) -> TaskDefinition {
    TaskDefinition {
        arn: td.task_definition_arn().unwrap_or_default().to_string(),
        family: td.family().unwrap_or_default().to_string(),
        cpu: td.cpu().map(str::to_string),
        memory: td.memory().map(str::to_string),
        containers: td
            .container_definitions()
            .iter()
            .map(|c| Container {
                name: c.name().unwrap_or_default().to_string(),
                environment: c
                    .environment()
                    .iter()
                    .filter_map(|kv| Some((kv.name()?.to_string(), kv.value()?.to_string())))
                    .collect(),
            })
            .collect(),
    }
}

fn environment(env: &BTreeMap<String, String>) -> Vec<KeyValuePair> {
    env.iter()
        .map(|(k, v)| KeyValuePair::builder().name(k).value(v).build())
        .collect()
}

fn service_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

#[async_trait]
impl EcsApi for AwsEcs {
    async fn list_services(&self, cluster: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_services()
                .cluster(cluster)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| {
                    sdk_error(e, format!("listing services of {}", cluster), |e| {
                        e.is_cluster_not_found_exception().then_some(Kind::NotFound)
                    })
                })?;
            names.extend(out.service_arns().iter().map(|a| service_name(a).to_string()));
            match out.next_token() {
                Some(t) => next_token = Some(t.to_string()),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }

    async fn describe_service(&self, cluster: &str, service: &str) -> Result<ServiceState> {
        let out = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(|e| {
                sdk_error(e, format!("describing service {}", service), |e| {
                    e.is_cluster_not_found_exception().then_some(Kind::NotFound)
                })
            })?;
        match out.services().iter().find(|s| s.status() != Some("INACTIVE")) {
            Some(s) => Ok(service_state(s)),
            None => {
                let reason = out
                    .failures()
                    .iter()
                    .find_map(|f| f.reason())
                    .unwrap_or("INACTIVE");
                Err(Failure::NotFound(format!(
                    "service {} in cluster {} ({})",
                    service, cluster, reason
                ))
                .into())
            }
        }
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition> {
        Ok(task_definition(&self.raw_task_definition(arn).await?))
    }

    async fn register_revision(&self, revision: &TaskDefinition) -> Result<String> {
        let base = self.raw_task_definition(&revision.arn).await?;

        let mut containers = base.container_definitions().to_vec();
        for container in containers.iter_mut() {
            let wanted = revision
                .containers
                .iter()
                .find(|c| Some(c.name.as_str()) == container.name());
            if let Some(wanted) = wanted {
                container.environment = Some(environment(&wanted.environment));
            }
        }

        let out = self
            .client
            .register_task_definition()
            .family(&revision.family)
            .set_container_definitions(Some(containers))
            .set_cpu(revision.cpu.clone())
            .set_memory(revision.memory.clone())
            .set_task_role_arn(base.task_role_arn.clone())
            .set_execution_role_arn(base.execution_role_arn.clone())
            .set_network_mode(base.network_mode.clone())
            .set_volumes(base.volumes.clone())
            .set_placement_constraints(base.placement_constraints.clone())
            .set_requires_compatibilities(base.requires_compatibilities.clone())
            .set_runtime_platform(base.runtime_platform.clone())
            .set_ephemeral_storage(base.ephemeral_storage.clone())
            .set_proxy_configuration(base.proxy_configuration.clone())
            .set_pid_mode(base.pid_mode.clone())
            .set_ipc_mode(base.ipc_mode.clone())
            .send()
            .await
            .map_err(|e| {
                sdk_error(
                    e,
                    format!("registering a revision of {}", revision.family),
                    |e| {
                        (e.is_client_exception() || e.is_invalid_parameter_exception())
                            .then_some(Kind::Rejected)
                    },
                )
            })?;

        out.task_definition()
            .and_then(|td| td.task_definition_arn())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("RegisterTaskDefinition returned no task definition ARN"))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
        desired_count: Option<i32>,
    ) -> Result<()> {
        self.client
            .update_service()
            .cluster(cluster)
            .service(service)
            .task_definition(task_definition)
            .set_desired_count(desired_count)
            .send()
            .await
            .map_err(|e| {
                sdk_error(e, format!("updating service {}", service), |e| {
                    if e.is_service_not_found_exception()
                        || e.is_cluster_not_found_exception()
                        || e.is_service_not_active_exception()
                    {
                        Some(Kind::NotFound)
                    } else if e.is_client_exception() || e.is_invalid_parameter_exception() {
                        Some(Kind::Rejected)
                    } else {
                        None
                    }
                })
            })?;
        Ok(())
    }
}
