//! Watchdog child: enforces external cancellation and lease loss.
//!
//! Subscribes to the engine's event feed for the duration of one job. If
//! the lease moves to another worker or the job is canceled under us, the
//! executor is killed outright; a terminal completed/failed event just
//! ends the watch.

use std::ops::ControlFlow;

use foreman_core::{Event, EventKind, Job, Listener};
use tracing::{error, info, warn};

use crate::protocol::ChildSpec;
use crate::signals;

/// What the watchdog does with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Not about the watched job, or not a kind we act on.
    Ignore,
    /// The job was taken away from this worker: kill and stop watching.
    KillExecutor,
    /// The job reached a terminal state through normal processing.
    Stop,
}

/// Decide how to react to one event while watching `jid` for `worker`.
fn decide(event: &Event, jid: &str, worker: &str) -> Verdict {
    if event.jid != jid {
        return Verdict::Ignore;
    }
    match &event.kind {
        EventKind::LockLost | EventKind::Canceled if event.worker == worker => {
            Verdict::KillExecutor
        }
        EventKind::LockLost | EventKind::Canceled => Verdict::Ignore,
        EventKind::Completed | EventKind::Failed => Verdict::Stop,
        EventKind::Other(_) => Verdict::Ignore,
    }
}

/// Run the watchdog role to completion; returns the process exit code.
///
/// Watchdog faults never affect the job outcome: the engine's lease
/// bookkeeping stays authoritative, so failures here are only logged.
pub fn run(spec: &ChildSpec) -> i32 {
    signals::reset_child_dispositions();

    let Some(executor_pid) = spec.executor_pid else {
        error!("watchdog spawned without an executor pid");
        return 1;
    };
    let jid = match Job::from_json(&spec.job_json) {
        Ok(job) => job.jid,
        Err(err) => {
            error!(%err, "watchdog got an undecodable job");
            return 1;
        }
    };
    info!(%jid, executor_pid, "watching events");

    let mut listener = match Listener::connect(&spec.url) {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %jid, "watchdog cannot reach the event feed");
            return 1;
        }
    };

    let result = listener.listen(&[spec.event_channel.as_str()], |_, event| {
        match decide(&event, &jid, &spec.worker_name) {
            Verdict::Ignore => ControlFlow::Continue(()),
            Verdict::KillExecutor => {
                info!(%jid, executor_pid, kind = ?event.kind, "job taken away; killing executor");
                let rc = unsafe { libc::kill(executor_pid as i32, libc::SIGKILL) };
                if rc == -1 {
                    warn!(
                        executor_pid,
                        err = %std::io::Error::last_os_error(),
                        "could not kill executor"
                    );
                }
                ControlFlow::Break(())
            }
            Verdict::Stop => {
                info!(%jid, kind = ?event.kind, "job reached a terminal state");
                ControlFlow::Break(())
            }
        }
    });

    match result {
        Ok(()) => {
            info!(%jid, "watchdog done");
            0
        }
        Err(err) => {
            error!(%err, %jid, "watchdog subscription failed");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, jid: &str, worker: &str) -> Event {
        Event::from_json(&format!(
            r#"{{"event":"{kind}","jid":"{jid}","worker":"{worker}"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn other_jobs_are_ignored() {
        let ev = event("lock_lost", "other-jid", "worker-1");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Ignore);
    }

    #[test]
    fn lock_lost_for_this_worker_kills() {
        let ev = event("lock_lost", "jid-1", "worker-1");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::KillExecutor);
    }

    #[test]
    fn cancellation_for_this_worker_kills() {
        let ev = event("canceled", "jid-1", "worker-1");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::KillExecutor);
    }

    #[test]
    fn lease_movements_of_other_workers_are_ignored() {
        let ev = event("lock_lost", "jid-1", "worker-2");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Ignore);
        let ev = event("canceled", "jid-1", "worker-2");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Ignore);
    }

    #[test]
    fn terminal_states_stop_without_killing() {
        // completed/failed end the watch no matter which worker reported
        let ev = event("completed", "jid-1", "worker-2");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Stop);
        let ev = event("failed", "jid-1", "worker-1");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Stop);
    }

    #[test]
    fn unrelated_kinds_are_ignored() {
        let ev = event("put", "jid-1", "worker-1");
        assert_eq!(decide(&ev, "jid-1", "worker-1"), Verdict::Ignore);
    }
}
