use std::path::PathBuf;

use clap::{ArgGroup, Parser};

/// Default location of the configuration file shared by the drivers.
pub const DEFAULT_CONFIG: &str = "./config.yaml";

/// Query or adjust the settings of an application.
///
/// Without an action flag, reads a settings document from standard input and
/// applies it to TARGET.
#[derive(Parser, Debug, Clone)]
#[command(
    about,
    long_about = None,
    disable_version_flag = true,
    group(
        ArgGroup::new("action")
            .args(["version", "info", "query", "generate_man", "generate_markdown", "generate_completion"])
            .multiple(false)
    )
)]
pub struct Args {
    /// Identifier of the remote resource to query or adjust
    #[arg(required_unless_present_any = ["version", "info", "generate_man", "generate_markdown", "generate_completion"])]
    pub target: Option<String>,

    /// Print the driver version and exit
    #[arg(long)]
    pub version: bool,

    /// Print a description of the driver capabilities as JSON and exit
    #[arg(long)]
    pub info: bool,

    /// Print the current settings of TARGET as JSON
    #[arg(long)]
    pub query: bool,

    #[command(flatten)]
    pub options: Options,

    /// Generate a manpage
    #[arg(long, hide = true)]
    pub generate_man: bool,

    /// Generate markdown documentation
    #[arg(long, hide = true)]
    pub generate_markdown: bool,

    /// Generate shell completion for the given shell
    #[arg(long, hide = true, value_name = "SHELL")]
    pub generate_completion: Option<clap_complete::Shell>,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    /// Configuration file
    #[arg(long, env = "ADJUST_CONFIG", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Log at trace level, including span events
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

impl Options {
    /// Whether the configuration path was left at its default, in which case
    /// a missing file is not an error.
    pub fn config_is_default(&self) -> bool {
        self.config.as_os_str() == DEFAULT_CONFIG
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Version,
    Info,
    Query(String),
    Adjust(String),
    GenerateMan,
    GenerateMarkdown,
    GenerateCompletion(clap_complete::Shell),
}

impl Args {
    pub fn action(&self) -> Action {
        if self.version {
            return Action::Version;
        }
        if self.info {
            return Action::Info;
        }
        if self.generate_man {
            return Action::GenerateMan;
        }
        if self.generate_markdown {
            return Action::GenerateMarkdown;
        }
        if let Some(shell) = self.generate_completion {
            return Action::GenerateCompletion(shell);
        }
        // clap guarantees a target for the remaining actions
        let target = self.target.clone().unwrap_or_default();
        if self.query {
            Action::Query(target)
        } else {
            Action::Adjust(target)
        }
    }
}
