//! The adjust driver protocol.
//!
//! An orchestrator invokes a driver executable once per request:
//!
//! ```text
//! driver --version [TARGET]     print the version
//! driver --info [TARGET]        print {"description", "version", "has_cancel"}
//! driver --query TARGET         print the current settings document
//! driver TARGET < settings.json apply a settings document
//! ```
//!
//! Drivers implement [`framework::AdjustDriver`] and hand it to
//! [`framework::run_main`].

pub mod cli;
pub mod error;
pub mod framework;
pub mod interrupt;
pub mod logging;
pub mod progress;
pub mod schema;
