use thiserror::Error;

pub const EXIT_OK: i32 = 0;
/// Remote failures, including errors that carry no [`Failure`].
pub const EXIT_REMOTE: i32 = 1;
/// clap's own exit code for usage errors.
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_INPUT: i32 = 3;
pub const EXIT_NOT_FOUND: i32 = 4;
pub const EXIT_CANCELLED: i32 = 5;

/// Failures that the orchestrator can tell apart by reason and exit code.
///
/// Drivers return `anyhow::Error`; a `Failure` anywhere in its chain decides
/// how the invocation ends. See [`classify`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported setting {setting} for component {component}")]
    UnknownSetting { component: String, setting: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("update rejected: {0}")]
    Rejected(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("adjustment cancelled")]
    Cancelled,
}

impl Failure {
    pub fn reason(&self) -> &'static str {
        match self {
            Failure::InvalidInput(_) => "invalid-input",
            Failure::UnknownSetting { .. } => "unknown-setting",
            Failure::NotFound(_) => "not-found",
            Failure::Rejected(_) => "rejected",
            Failure::TimedOut(_) => "timed-out",
            Failure::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::InvalidInput(_) | Failure::UnknownSetting { .. } => EXIT_INPUT,
            Failure::NotFound(_) => EXIT_NOT_FOUND,
            Failure::Rejected(_) | Failure::TimedOut(_) => EXIT_REMOTE,
            Failure::Cancelled => EXIT_CANCELLED,
        }
    }
}

/// Reason and exit code for an error.
pub fn classify(error: &anyhow::Error) -> (&'static str, i32) {
    match error.chain().find_map(|e| e.downcast_ref::<Failure>()) {
        Some(f) => (f.reason(), f.exit_code()),
        None => ("remote-error", EXIT_REMOTE),
    }
}
