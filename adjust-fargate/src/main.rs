mod config;
mod driver;
mod ecs;
mod plan;
mod sizing;

use adjust_driver::framework::{run_main, DriverInfo};

use crate::{config::Config, driver::FargateDriver, ecs::AwsEcs};

const DESC: &str = "Adjusts CPU, memory, replicas and environment of ECS services on Fargate";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const HAS_CANCEL: bool = true;

fn driver_info() -> DriverInfo {
    DriverInfo {
        name: "adjust-fargate",
        description: DESC,
        version: VERSION,
        has_cancel: HAS_CANCEL,
    }
}

fn main() {
    run_main(driver_info(), |options| async move {
        let config = Config::load(&options.config, options.config_is_default())?;
        tracing::debug!(?config, "loaded configuration");
        let ecs = AwsEcs::connect(&config).await;
        Ok(FargateDriver::new(ecs, config))
    })
}
