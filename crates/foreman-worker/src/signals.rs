//! Signal routing for the master process.
//!
//! TERM / INT: shut down immediately, killing the child pair.
//! QUIT: shut down after the current job finishes.
//! USR1: kill the child pair, keep processing jobs.
//! USR2: pause reservation.
//! CONT: resume reservation.
//!
//! Signals are picked up on a dedicated control thread and forwarded over
//! a channel. Every blocking point in the master loop waits on that
//! channel instead of a bare sleep, so a pending signal interrupts the
//! wait within its poll quantum rather than at the next scheduling point.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use signal_hook::consts::signal::{SIGCONT, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

use crate::error::{Error, Result};

const ROUTED: [i32; 6] = [SIGTERM, SIGINT, SIGQUIT, SIGUSR1, SIGUSR2, SIGCONT];

/// Supervisor actions triggered by process signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Exit now, killing any running children.
    ShutdownNow,
    /// Exit once the current job has finished.
    Shutdown,
    /// Kill the child pair but keep the worker running.
    KillChildren,
    /// Stop reserving new jobs.
    Pause,
    /// Resume reserving jobs.
    Resume,
}

impl Action {
    /// The static signal table for the master context.
    pub fn from_signal(signal: i32) -> Option<Action> {
        match signal {
            SIGTERM | SIGINT => Some(Action::ShutdownNow),
            SIGQUIT => Some(Action::Shutdown),
            SIGUSR1 => Some(Action::KillChildren),
            SIGUSR2 => Some(Action::Pause),
            SIGCONT => Some(Action::Resume),
            _ => None,
        }
    }
}

/// Routes process signals to the master loop. Installed only in the master
/// context; children get default dispositions.
pub struct SignalRouter {
    rx: Receiver<Action>,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalRouter {
    /// Install handlers and start the control thread.
    pub fn install() -> Result<Self> {
        let mut signals = Signals::new(ROUTED)
            .map_err(|e| Error::Process(format!("unable to install signal handlers: {e}")))?;
        let handle = signals.handle();
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            for signal in signals.forever() {
                debug!(signal, "signal received");
                let Some(action) = Action::from_signal(signal) else {
                    continue;
                };
                if tx.send(action).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            rx,
            handle,
            thread: Some(thread),
        })
    }

    /// Wait up to `timeout` for a pending signal action.
    pub fn poll(&self, timeout: Duration) -> Option<Action> {
        match self.rx.recv_timeout(timeout) {
            Ok(action) => Some(action),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Collect already-pending actions without blocking.
    pub fn drain(&self) -> Vec<Action> {
        let mut pending = Vec::new();
        while let Ok(action) = self.rx.try_recv() {
            pending.push(action);
        }
        pending
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Restore default dispositions in a child context so it does not react to
/// the supervisor's routing. exec already resets installed handlers; this
/// also sheds inherited ignores.
pub fn reset_child_dispositions() {
    for signal in ROUTED {
        unsafe {
            libc::signal(signal, libc::SIG_DFL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_table_matches_the_lifecycle() {
        assert_eq!(Action::from_signal(SIGTERM), Some(Action::ShutdownNow));
        assert_eq!(Action::from_signal(SIGINT), Some(Action::ShutdownNow));
        assert_eq!(Action::from_signal(SIGQUIT), Some(Action::Shutdown));
        assert_eq!(Action::from_signal(SIGUSR1), Some(Action::KillChildren));
        assert_eq!(Action::from_signal(SIGUSR2), Some(Action::Pause));
        assert_eq!(Action::from_signal(SIGCONT), Some(Action::Resume));
    }

    #[test]
    fn unrouted_signals_map_to_nothing() {
        assert_eq!(Action::from_signal(signal_hook::consts::SIGHUP), None);
        assert_eq!(Action::from_signal(0), None);
    }
}
