use std::collections::BTreeMap;

use adjust_driver::{
    error::Failure,
    framework::AdjustDriver,
    progress::{percent, Reporter},
    schema::{Adjustment, Application, Component, Description, Setting, SettingKind, SettingValue},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::Instrument as _;

use crate::{
    config::{Config, SettingConfig},
    ecs::{EcsApi, ServiceState, Stability},
    plan::{plan, ComponentPlan, CPU, MEMORY, REPLICAS},
};

pub struct FargateDriver<E> {
    ecs: E,
    config: Config,
}

impl<E: EcsApi> FargateDriver<E> {
    pub fn new(ecs: E, config: Config) -> Self {
        FargateDriver { ecs, config }
    }

    async fn component_names(&self, cluster: &str) -> Result<Vec<String>> {
        if self.config.components.is_empty() {
            self.ecs
                .list_services(cluster)
                .await
                .with_context(|| format!("Could not list the services of cluster {}", cluster))
        } else {
            Ok(self.config.components.keys().cloned().collect())
        }
    }

    async fn query_component(&self, cluster: &str, component: &str) -> Result<Component> {
        let service_name = self.config.service(component);
        let service = self.ecs.describe_service(cluster, service_name).await?;
        let td = self
            .ecs
            .describe_task_definition(&service.task_definition)
            .await?;
        let component_config = self.config.component(component);
        let container = td.container(component_config.and_then(|c| c.container.as_deref()));

        let declared = component_config.map(|c| &c.settings).filter(|s| !s.is_empty());
        let mut settings = BTreeMap::new();
        match declared {
            Some(declared) => {
                for (name, setting_config) in declared {
                    let value = match name.as_str() {
                        CPU => td.cpu_units().map(SettingValue::from),
                        MEMORY => td.memory_mib().map(SettingValue::from),
                        REPLICAS => Some(SettingValue::from(service.desired_count.max(0) as u64)),
                        _ => container
                            .and_then(|c| c.environment.get(setting_config.env_name(name)))
                            .map(|raw| typed_value(raw, setting_config))
                            .or_else(|| setting_config.default.clone()),
                    };
                    settings.insert(name.clone(), described(value, name, setting_config));
                }
            }
            None => {
                settings.insert(
                    CPU.to_string(),
                    resource(td.cpu_units().map(SettingValue::from), None),
                );
                settings.insert(
                    MEMORY.to_string(),
                    resource(td.memory_mib().map(SettingValue::from), Some("MiB")),
                );
                settings.insert(
                    REPLICAS.to_string(),
                    resource(
                        Some(SettingValue::from(service.desired_count.max(0) as u64)),
                        None,
                    ),
                );
                for (k, v) in container.map(|c| &c.environment).into_iter().flatten() {
                    if settings.contains_key(k) {
                        tracing::warn!(variable = %k, "environment variable shadowed by a resource setting");
                        continue;
                    }
                    settings.insert(k.clone(), Setting::with_value(v.as_str()));
                }
            }
        }
        Ok(Component { settings })
    }

    /// Apply one component's plan. `step`/`steps` position it in the overall
    /// progress.
    async fn adjust_component(
        &self,
        cluster: &str,
        plan: &ComponentPlan,
        reporter: &mut Reporter<'_>,
        step: usize,
        steps: usize,
    ) -> Result<()> {
        let service = self.ecs.describe_service(cluster, &plan.service).await?;
        let current = self
            .ecs
            .describe_task_definition(&service.task_definition)
            .await?;
        let revision = plan.revise(&service, &current, self.config.validate_sizing)?;
        if revision.is_noop() {
            tracing::info!(service = %plan.service, "already up to date");
            reporter.progress(
                percent(step + 1, steps),
                format!("{}: already up to date", plan.component),
            )?;
            return Ok(());
        }

        let task_definition = match &revision.task_definition {
            Some(td) => {
                let arn = self.ecs.register_revision(td).await.with_context(|| {
                    format!("Could not register a new revision of {}", td.family)
                })?;
                tracing::info!(%arn, "registered task definition");
                arn
            }
            None => service.task_definition.clone(),
        };
        reporter.progress(
            percent(step, steps) + progress_within(steps, 1),
            format!("{}: updating service {}", plan.component, plan.service),
        )?;
        self.ecs
            .update_service(cluster, &plan.service, &task_definition, revision.desired_count)
            .await
            .with_context(|| format!("Could not update service {}", plan.service))?;

        self.wait_for_stable(cluster, plan, &task_definition, reporter, step, steps)
            .await
    }

    async fn wait_for_stable(
        &self,
        cluster: &str,
        plan: &ComponentPlan,
        task_definition: &str,
        reporter: &mut Reporter<'_>,
        step: usize,
        steps: usize,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let service: ServiceState = self.ecs.describe_service(cluster, &plan.service).await?;
            match service.stability(task_definition) {
                Stability::Stable => {
                    reporter.progress(
                        percent(step + 1, steps),
                        format!("{}: service {} is stable", plan.component, plan.service),
                    )?;
                    return Ok(());
                }
                Stability::Failed(reason) => {
                    return Err(Failure::Rejected(format!("service {}: {}", plan.service, reason)).into())
                }
                Stability::Pending { running, desired } => {
                    tracing::debug!(running, desired, "waiting for deployment");
                    reporter.progress(
                        percent(step, steps) + progress_within(steps, 2),
                        format!(
                            "{}: {} of {} tasks running the new deployment",
                            plan.component, running, desired
                        ),
                    )?;
                }
            }
            if Instant::now() + self.config.poll_interval > deadline {
                return Err(Failure::TimedOut(format!(
                    "service {} did not become stable within {}",
                    plan.service,
                    humantime::format_duration(self.config.timeout)
                ))
                .into());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Progress made by part `part` of 3 inside one of `steps` components.
fn progress_within(steps: usize, part: usize) -> u8 {
    (percent(1, steps.max(1)) as usize * part / 3) as u8
}

/// Environment values are strings; report ranges as numbers when they parse.
fn typed_value(raw: &str, config: &SettingConfig) -> SettingValue {
    if config.kind() == SettingKind::Range {
        if let Ok(n) = raw.parse::<serde_json::Number>() {
            return SettingValue::Number(n);
        }
    }
    SettingValue::from(raw)
}

fn described(value: Option<SettingValue>, name: &str, config: &SettingConfig) -> Setting {
    Setting {
        value,
        min: config.min.clone(),
        max: config.max.clone(),
        step: config.step.clone(),
        kind: Some(config.kind()),
        values: config.values.clone(),
        unit: config
            .unit
            .clone()
            .or_else(|| (name == MEMORY).then(|| "MiB".to_string())),
    }
}

fn resource(value: Option<SettingValue>, unit: Option<&str>) -> Setting {
    Setting {
        value,
        kind: Some(SettingKind::Range),
        unit: unit.map(str::to_string),
        ..Default::default()
    }
}

#[async_trait]
impl<E: EcsApi> AdjustDriver for FargateDriver<E> {
    async fn query(&self, target: &str) -> Result<Description> {
        let cluster = self.config.cluster(target);
        let mut components = BTreeMap::new();
        for name in self.component_names(cluster).await? {
            let component = self
                .query_component(cluster, &name)
                .instrument(tracing::info_span!("query_component", component = %name))
                .await
                .with_context(|| format!("Could not query component {}", name))?;
            components.insert(name, component);
        }
        Ok(Description {
            application: Application { components },
        })
    }

    async fn adjust(
        &self,
        target: &str,
        adjustment: Adjustment,
        reporter: &mut Reporter<'_>,
    ) -> Result<()> {
        let plans = plan(&adjustment, &self.config)?;
        let cluster = self.config.cluster(target);
        tracing::info!(cluster, components = plans.len(), "adjusting");
        reporter.progress(0, format!("adjusting {} component(s)", plans.len()))?;
        for (step, p) in plans.iter().enumerate() {
            self.adjust_component(cluster, p, reporter, step, plans.len())
                .instrument(tracing::info_span!("adjust_component", component = %p.component))
                .await
                .with_context(|| format!("Could not adjust component {}", p.component))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use adjust_driver::{
        cli::Args,
        error::{EXIT_INPUT, EXIT_NOT_FOUND, EXIT_REMOTE},
        framework::run,
        interrupt::InterruptState,
        schema::{Info, StatusMessage, Status},
    };
    use clap::Parser as _;

    use super::*;
    use crate::ecs::fake::{FakeEcs, Rollouts};

    const ADJUST_JSON: &str = include_str!("../../adjust-driver/testdata/adjust.json");

    fn fake(rollouts: Rollouts) -> FakeEcs {
        FakeEcs::new(rollouts).with_service("1234", "co-http", &[("GOGC", "100")])
    }

    fn fast_config() -> Config {
        Config {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            ..Config::default()
        }
    }

    struct Outcome {
        code: i32,
        stdout: String,
    }

    impl Outcome {
        fn last_status(&self) -> StatusMessage {
            serde_json::from_str(self.stdout.lines().last().unwrap()).unwrap()
        }
    }

    async fn invoke(ecs: FakeEcs, config: Config, argv: &[&str], stdin: &str) -> Outcome {
        // replicate the command line the orchestrator uses
        let args = Args::try_parse_from(std::iter::once("").chain(argv.iter().copied())).unwrap();
        let mut out: Vec<u8> = Vec::new();
        let code = run(
            &crate::driver_info(),
            args,
            stdin.as_bytes(),
            &mut out,
            &InterruptState::new(),
            |_| async move { Ok(FargateDriver::new(ecs, config)) },
        )
        .await;
        Outcome {
            code,
            stdout: String::from_utf8(out).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_version() {
        let ecs = fake(Rollouts::SettleAfter(0));
        let o = invoke(ecs.clone(), fast_config(), &["--version", "1234"], "").await;
        assert_eq!(o.code, 0);
        assert_eq!(o.stdout.trim(), crate::VERSION);
        assert!(ecs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_info() {
        let o = invoke(fake(Rollouts::SettleAfter(0)), fast_config(), &["--info", "1234"], "").await;
        assert_eq!(o.code, 0);
        let info: Info = serde_json::from_str(&o.stdout).unwrap();
        assert_eq!(info.description, crate::DESC);
        assert_eq!(info.version, crate::VERSION);
        assert_eq!(info.has_cancel, crate::HAS_CANCEL);
    }

    #[tokio::test]
    async fn test_query() {
        let o = invoke(fake(Rollouts::SettleAfter(0)), fast_config(), &["--query", "1234"], "").await;
        assert_eq!(o.code, 0, "{}", o.stdout);
        let d: Description = serde_json::from_str(&o.stdout).unwrap();
        let settings = &d.application.components["co-http"].settings;
        assert_eq!(settings["cpu"].value, Some(SettingValue::from(512u64)));
        assert_eq!(settings["memory"].value, Some(SettingValue::from(1024u64)));
        assert_eq!(settings["memory"].unit.as_deref(), Some("MiB"));
        assert_eq!(settings["replicas"].value, Some(SettingValue::from(1u64)));
        assert_eq!(settings["GOGC"].value, Some(SettingValue::from("100")));
    }

    #[tokio::test]
    async fn test_query_keeps_resources_over_same_named_env() {
        let ecs = FakeEcs::new(Rollouts::SettleAfter(0))
            .with_service("1234", "co-http", &[("cpu", "9"), ("GOGC", "100")]);
        let o = invoke(ecs, fast_config(), &["--query", "1234"], "").await;
        assert_eq!(o.code, 0, "{}", o.stdout);
        let d: Description = serde_json::from_str(&o.stdout).unwrap();
        let settings = &d.application.components["co-http"].settings;
        assert_eq!(settings["cpu"].value, Some(SettingValue::from(512u64)));
        assert_eq!(settings["cpu"].kind, Some(SettingKind::Range));
        assert_eq!(settings["GOGC"].value, Some(SettingValue::from("100")));
    }

    #[tokio::test]
    async fn test_query_with_declared_settings() {
        let config = Config {
            cluster: Some("1234".to_string()),
            ..Config::parse(
                "fargate:\n  components:\n    web:\n      service: co-http\n      settings:\n        cpu: {min: 256, max: 4096, step: 256}\n        GOGC: {min: 50, max: 200, step: 10}\n        TEST: {values: [A, B], default: A}\n",
            )
            .unwrap()
        };
        let ecs = fake(Rollouts::SettleAfter(0));
        let o = invoke(ecs.clone(), config, &["--query", "my-app"], "").await;
        assert_eq!(o.code, 0, "{}", o.stdout);
        let d: Description = serde_json::from_str(&o.stdout).unwrap();
        let settings = &d.application.components["web"].settings;
        assert_eq!(settings.len(), 3);
        assert_eq!(settings["cpu"].min, Some(256.into()));
        assert_eq!(settings["GOGC"].value, Some(SettingValue::from(100u64)));
        assert_eq!(settings["TEST"].value, Some(SettingValue::from("A")));
        assert_eq!(settings["TEST"].kind, Some(SettingKind::Enum));
        assert!(!ecs.calls().iter().any(|c| c.starts_with("list_services")));
    }

    #[tokio::test]
    async fn test_query_missing_cluster() {
        let o = invoke(fake(Rollouts::SettleAfter(0)), fast_config(), &["--query", "nope"], "").await;
        assert_eq!(o.code, EXIT_NOT_FOUND);
        assert_eq!(o.last_status().status, Status::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust() {
        let ecs = fake(Rollouts::SettleAfter(2));
        let o = invoke(ecs.clone(), fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(o.code, 0, "{}", o.stdout);
        assert_eq!(o.last_status().status, Status::Ok);

        let td = ecs.current_task_definition("1234", "co-http");
        assert_eq!(td.cpu.as_deref(), Some("256"));
        assert_eq!(td.memory.as_deref(), Some("512"));
        assert_eq!(td.containers[0].environment["GOGC"], "90");
        assert_eq!(td.containers[0].environment["TEST"], "B");
        assert!(td.arn.ends_with("co-http:2"));

        let progress: Vec<u8> = o
            .stdout
            .lines()
            .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
            .filter_map(|v| v.get("progress").and_then(|p| p.as_u64()))
            .map(|p| p as u8)
            .collect();
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_twice_is_idempotent() {
        let ecs = fake(Rollouts::SettleAfter(1));
        let first = invoke(ecs.clone(), fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(first.code, 0);
        let after_first = ecs.current_task_definition("1234", "co-http");

        let second = invoke(ecs.clone(), fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(second.code, 0);
        assert_eq!(ecs.current_task_definition("1234", "co-http"), after_first);
        assert_eq!(after_first.containers[0].environment.len(), 2);

        let registrations = ecs
            .calls()
            .iter()
            .filter(|c| c.starts_with("register_revision"))
            .count();
        assert_eq!(registrations, 1);
    }

    #[tokio::test]
    async fn test_adjust_missing_components() {
        let ecs = fake(Rollouts::SettleAfter(0));
        let o = invoke(ecs.clone(), fast_config(), &["1234"], r#"{"application": {}}"#).await;
        assert_eq!(o.code, EXIT_INPUT);
        assert!(ecs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_adjust_unknown_setting_makes_no_calls() {
        let config = Config {
            components: Config::parse(
                "fargate:\n  components:\n    co-http:\n      settings:\n        cpu: {}\n        memory: {}\n        GOGC: {}\n",
            )
            .unwrap()
            .components,
            ..fast_config()
        };
        let ecs = fake(Rollouts::SettleAfter(0));
        let o = invoke(ecs.clone(), config, &["1234"], ADJUST_JSON).await;
        assert_eq!(o.code, EXIT_INPUT);
        assert_eq!(o.last_status().reason.as_deref(), Some("unknown-setting"));
        assert!(ecs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_adjust_missing_service() {
        let ecs = FakeEcs::new(Rollouts::SettleAfter(0)).with_service("1234", "other", &[]);
        let o = invoke(ecs.clone(), fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(o.code, EXIT_NOT_FOUND);
        assert_eq!(o.last_status().reason.as_deref(), Some("not-found"));
    }

    #[tokio::test]
    async fn test_adjust_invalid_size_is_rejected() {
        let ecs = fake(Rollouts::SettleAfter(0));
        let doc = r#"{"application": {"components": {"co-http": {"settings": {"memory": {"value": 16384}}}}}}"#;
        let o = invoke(ecs.clone(), fast_config(), &["1234"], doc).await;
        assert_eq!(o.code, EXIT_REMOTE);
        assert_eq!(o.last_status().reason.as_deref(), Some("rejected"));
        assert!(!ecs.calls().iter().any(|c| c.starts_with("register_revision")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_times_out() {
        let ecs = fake(Rollouts::Never);
        let o = invoke(ecs, fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(o.code, EXIT_REMOTE);
        assert_eq!(o.last_status().reason.as_deref(), Some("timed-out"));
    }

    #[tokio::test]
    async fn test_adjust_failed_rollout() {
        let ecs = fake(Rollouts::Fail("tasks failed to start".to_string()));
        let o = invoke(ecs, fast_config(), &["1234"], ADJUST_JSON).await;
        assert_eq!(o.code, EXIT_REMOTE);
        let status = o.last_status();
        assert_eq!(status.reason.as_deref(), Some("rejected"));
        assert!(status.message.unwrap().contains("tasks failed to start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_replicas() {
        let ecs = fake(Rollouts::SettleAfter(0));
        let doc = r#"{"application": {"components": {"co-http": {"settings": {"replicas": {"value": 3}}}}}}"#;
        let o = invoke(ecs.clone(), fast_config(), &["1234"], doc).await;
        assert_eq!(o.code, 0, "{}", o.stdout);
        assert_eq!(ecs.desired_count("1234", "co-http"), 3);
        assert!(!ecs.calls().iter().any(|c| c.starts_with("register_revision")));
    }
}
