use std::io::IsTerminal as _;

use anyhow::Result;
use tracing_subscriber::{
    fmt::{format::FmtSpan, Layer as FmtLayer},
    layer::SubscriberExt as _,
    EnvFilter, Registry,
};

/// Overrides the level chosen by `--verbose`, e.g. `ADJUST_LOG=adjust_fargate=debug`.
pub const LOG_ENV: &str = "ADJUST_LOG";

pub struct Options {
    pub verbose: bool,
}

/// Log to stderr; stdout carries the protocol messages.
pub fn set_up(options: &Options) -> Result<()> {
    let default_level = if options.verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let span_events = if options.verbose {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = FmtLayer::new()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_ansi(std::io::stderr().is_terminal());
    let subscriber = Registry::default().with(filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set up tracing: {}", e))?;

    Ok(())
}
