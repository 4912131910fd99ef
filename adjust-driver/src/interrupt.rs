use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use tokio::sync::Notify;

use crate::error::{Failure, EXIT_CANCELLED};

/// Shared flag set when the orchestrator asks for cancellation.
#[derive(Clone, Debug, Default)]
pub struct InterruptState {
    interrupted: Arc<AtomicBool>,
    /// Set while some future is racing against [`InterruptState::interrupted`]
    listening: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

/// Keeps the state listening until dropped.
pub struct Listening<'a> {
    state: &'a InterruptState,
}

impl Drop for Listening<'_> {
    fn drop(&mut self) {
        self.state.listening.store(false, Ordering::SeqCst);
    }
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        // notify_one keeps a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn check_interrupted(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Failure::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Mark the state as acted upon. Outside of this, Ctrl-C ends the process.
    pub fn listen(&self) -> Listening<'_> {
        self.listening.store(true, Ordering::SeqCst);
        Listening { state: self }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Resolves once the state is interrupted.
    pub async fn interrupted(&self) {
        while !self.is_interrupted() {
            self.notify.notified().await;
        }
    }
}

fn set_process_interrupt_handler(interrupted: &InterruptState) -> Result<()> {
    let interrupted = interrupted.clone();
    ctrlc::set_handler(move || {
        if interrupted.is_listening() {
            interrupted.set_interrupted();
        } else {
            // e.g. blocked reading stdin
            std::process::exit(EXIT_CANCELLED);
        }
    })
    .context("Error setting interrupt handler")
}

/// SIGUSR1 is the orchestrator's cancel request.
#[cfg(unix)]
fn set_cancel_signal_handler(interrupted: &InterruptState) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stream =
        signal(SignalKind::user_defined1()).context("Error setting SIGUSR1 handler")?;
    let interrupted = interrupted.clone();
    tokio::spawn(async move {
        if stream.recv().await.is_some() {
            tracing::info!("received cancel signal");
            interrupted.set_interrupted();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn set_cancel_signal_handler(_interrupted: &InterruptState) -> Result<()> {
    Ok(())
}

/// Must be called from within a tokio runtime.
pub fn set_up_process_interrupt_handler() -> Result<InterruptState> {
    let interrupt_state = InterruptState::new();
    set_process_interrupt_handler(&interrupt_state)?;
    set_cancel_signal_handler(&interrupt_state)?;
    Ok(interrupt_state)
}
