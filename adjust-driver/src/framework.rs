use std::{
    future::Future,
    io::{Read, Write},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{CommandFactory, FromArgMatches as _};
use tracing::Instrument as _;

use crate::{
    cli::{Action, Args, Options},
    error::{classify, Failure, EXIT_OK, EXIT_REMOTE},
    interrupt::{set_up_process_interrupt_handler, InterruptState},
    logging,
    progress::Reporter,
    schema::{Adjustment, Description, Info, Status},
};

/// Static facts about a driver, answered without touching the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Executable name, used in generated documentation
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub has_cancel: bool,
}

impl DriverInfo {
    pub fn to_info(&self) -> Info {
        Info {
            description: self.description.to_string(),
            version: self.version.to_string(),
            has_cancel: self.has_cancel,
        }
    }

    /// The command line definition, named after the driver.
    pub fn command(&self) -> clap::Command {
        Args::command().name(self.name).about(self.description)
    }
}

#[async_trait]
pub trait AdjustDriver: Send + Sync {
    /// Current settings of `target`, in the shape of an adjust document.
    async fn query(&self, target: &str) -> Result<Description>;

    /// Apply `adjustment` to `target` and wait until it has taken effect.
    async fn adjust(
        &self,
        target: &str,
        adjustment: Adjustment,
        reporter: &mut Reporter<'_>,
    ) -> Result<()>;
}

/// Parse a settings document. Any failure is an input error.
pub fn read_document(input: impl Read) -> Result<Description> {
    let document: Description = serde_json::from_reader(input)
        .map_err(|e| Failure::InvalidInput(format!("could not parse settings document: {}", e)))?;
    Ok(document)
}

/// Run one invocation and return the process exit code.
///
/// `connect` builds the driver; it is only called for actions that need the
/// remote service, and only after the input has been validated.
pub async fn run<D, F, Fut>(
    info: &DriverInfo,
    args: Args,
    input: impl Read,
    out: &mut (dyn Write + Send),
    interrupt: &InterruptState,
    connect: F,
) -> i32
where
    D: AdjustDriver,
    F: FnOnce(Options) -> Fut,
    Fut: Future<Output = Result<D>>,
{
    let mut reporter = Reporter::new(out);
    let options = args.options.clone();
    let r = match args.action() {
        Action::Version => reporter.write_line(info.version),
        Action::Info => reporter.write_json(&info.to_info()),
        Action::GenerateMan => (|| {
            let man = clap_mangen::Man::new(info.command());
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            reporter.write_line(&String::from_utf8(buffer)?)
        })(),
        Action::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String =
                clap_markdown::help_markdown_command_custom(&info.command(), &opts);
            reporter.write_line(&markdown)
        }
        Action::GenerateCompletion(shell) => {
            let mut cmd = info.command();
            let mut buffer: Vec<u8> = Default::default();
            clap_complete::generate(shell, &mut cmd, info.name, &mut buffer);
            String::from_utf8(buffer)
                .context("Completion script is not valid UTF-8")
                .and_then(|s| reporter.write_line(&s))
        }
        Action::Query(target) => {
            let span = tracing::info_span!("query", target = %target);
            let r = async {
                let _listening = interrupt.listen();
                interrupt.check_interrupted()?;
                let driver = connect(options).await?;
                let description: Result<Description> = tokio::select! {
                    biased;
                    _ = interrupt.interrupted() => {
                        tracing::warn!("query cancelled");
                        Err(Failure::Cancelled.into())
                    }
                    r = driver.query(&target) => r,
                };
                reporter.write_json(&description?)
            }
            .instrument(span)
            .await;
            if let Err(e) = &r {
                report_failure(&mut reporter, e);
            }
            return exit_code(&r);
        }
        Action::Adjust(target) => {
            let span = tracing::info_span!("adjust", target = %target);
            let r = adjust(info, &target, input, &mut reporter, interrupt, || connect(options))
                .instrument(span)
                .await;
            match &r {
                Ok(()) => {
                    if let Err(e) = reporter.status(Status::Ok, None, None) {
                        eprintln!("Error: {:?}", e);
                        return EXIT_REMOTE;
                    }
                }
                Err(e) => report_failure(&mut reporter, e),
            }
            return exit_code(&r);
        }
    };
    if let Err(e) = &r {
        eprintln!("Error: {:?}", e);
    }
    exit_code(&r)
}

async fn adjust<D, F, Fut>(
    info: &DriverInfo,
    target: &str,
    input: impl Read,
    reporter: &mut Reporter<'_>,
    interrupt: &InterruptState,
    connect: F,
) -> Result<()>
where
    D: AdjustDriver,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<D>>,
{
    let adjustment = read_document(input)?.adjustment()?;
    tracing::info!(
        components = adjustment.components.len(),
        "read settings document"
    );
    let _listening = interrupt.listen();
    interrupt.check_interrupted()?;
    let driver = connect().await?;
    if !info.has_cancel {
        return driver.adjust(target, adjustment, reporter).await;
    }
    tokio::select! {
        biased;
        _ = interrupt.interrupted() => {
            tracing::warn!("adjustment cancelled");
            Err(Failure::Cancelled.into())
        }
        r = driver.adjust(target, adjustment, reporter) => r,
    }
}

fn report_failure(reporter: &mut Reporter<'_>, error: &anyhow::Error) {
    eprintln!("Error: {:?}", error);
    let (reason, _) = classify(error);
    let status = if reason == Failure::Cancelled.reason() {
        Status::Cancelled
    } else {
        Status::Failed
    };
    if let Err(e) = reporter.status(status, Some(reason), Some(format!("{:#}", error))) {
        eprintln!("Error: {:?}", e);
    }
}

fn exit_code(r: &Result<()>) -> i32 {
    match r {
        Ok(()) => EXIT_OK,
        Err(e) => classify(e).1,
    }
}

/// Entry point for driver executables. Never returns.
pub fn run_main<D, F, Fut>(info: DriverInfo, connect: F) -> !
where
    D: AdjustDriver,
    F: FnOnce(Options) -> Fut,
    Fut: Future<Output = Result<D>>,
{
    let args = match Args::from_arg_matches(&info.command().get_matches()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    if let Err(e) = logging::set_up(&logging::Options {
        verbose: args.options.verbose,
    }) {
        eprintln!("Error: {:?}", e);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: could not start runtime: {}", e);
            std::process::exit(EXIT_REMOTE);
        }
    };

    let code = runtime.block_on(async {
        // without cancel support, signals keep their default disposition
        let interrupt = if info.has_cancel {
            match set_up_process_interrupt_handler() {
                Ok(i) => i,
                Err(e) => {
                    eprintln!("Error: {:?}", e);
                    InterruptState::new()
                }
            }
        } else {
            InterruptState::new()
        };
        let mut stdout = std::io::stdout();
        run(
            &info,
            args,
            std::io::stdin().lock(),
            &mut stdout,
            &interrupt,
            connect,
        )
        .await
    });
    std::process::exit(code)
}
