//! The master loop: reserves jobs and supervises the per-job child pair.
//!
//! One reservation cycle runs one executor and one watchdog, both fully
//! reaped before the next cycle begins. The supervisor itself never runs
//! handler code; the only things that may suspend it are the bounded
//! signal poll and the 10 ms error-channel read.

use std::time::Duration;

use foreman_core::{Client, ClientConfig, EVENT_CHANNEL, Job};
use tracing::{debug, error, info, warn};

use crate::child;
use crate::error::{Error, Result};
use crate::executor::FATAL_GROUP;
use crate::forker::{self, ChildHandle};
use crate::protocol::{ChildRole, ChildSpec, ErrorRecord};
use crate::registry::HandlerRegistry;
use crate::signals::{Action, SignalRouter};

/// Poll quantum while children run; pending signals are dispatched at
/// least this often during reconciliation.
const RECONCILE_POLL: Duration = Duration::from_millis(50);

/// Poll quantum while paused.
const PAUSE_POLL: Duration = Duration::from_millis(250);

/// A process-supervised worker bound to a set of queues.
///
/// Reserves one job at a time and runs it in an isolated executor
/// process, paired with a watchdog process that enforces lease loss and
/// cancellation off the engine's event feed.
pub struct Worker {
    config: ClientConfig,
    name: String,
    queues: Vec<String>,
    interval: Duration,
    event_channel: String,
    registry: HandlerRegistry,
}

impl Worker {
    pub fn new(
        config: ClientConfig,
        name: impl Into<String>,
        queues: impl IntoIterator<Item = impl Into<String>>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            config,
            name: name.into(),
            queues: queues.into_iter().map(Into::into).collect(),
            interval: Duration::from_secs(60),
            event_channel: EVENT_CHANNEL.to_string(),
            registry,
        }
    }

    /// Sleep between reservation rounds when every queue came up empty.
    /// A zero interval makes the worker drain the queues once and exit.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_event_channel(mut self, channel: impl Into<String>) -> Self {
        self.event_channel = channel.into();
        self
    }

    /// Run the worker until shutdown.
    ///
    /// When this process was spawned as a child context, the matching role
    /// runs instead and the process exits with its code; the embedding
    /// program must therefore build its registry before calling `run`.
    pub fn run(self) -> Result<()> {
        if let Some(role) = child::role_from_env() {
            std::process::exit(child::run(role, &self.registry));
        }

        let client = Client::connect(self.config.clone())?;
        let signals = SignalRouter::install()?;
        let mut master = Master {
            client,
            signals,
            config: self.config,
            name: self.name,
            queues: self.queues,
            interval: self.interval,
            event_channel: self.event_channel,
            job: None,
            executor: None,
            watchdog: None,
            paused: false,
            shutdown: false,
        };
        master.run()
    }
}

/// All master-loop state in one place, mutated only by the loop itself and
/// signal dispatch.
struct Master {
    client: Client,
    signals: SignalRouter,
    config: ClientConfig,
    name: String,
    queues: Vec<String>,
    interval: Duration,
    event_channel: String,

    /// Current job; at most one per cycle.
    job: Option<Job>,
    /// Both handles are `None` when idle and `Some` while a cycle runs.
    executor: Option<ChildHandle>,
    watchdog: Option<ChildHandle>,
    paused: bool,
    shutdown: bool,
}

impl Master {
    fn run(&mut self) -> Result<()> {
        info!(worker = %self.name, queues = ?self.queues, "worker started");
        let mut did_work = false;

        loop {
            for action in self.signals.drain() {
                self.dispatch(action);
            }
            if self.shutdown {
                info!(worker = %self.name, "shutting down");
                return Ok(());
            }
            if self.paused {
                if let Some(action) = self.signals.poll(PAUSE_POLL) {
                    self.dispatch(action);
                }
                continue;
            }
            if did_work {
                debug!(worker = %self.name, "waiting for work");
                did_work = false;
            }

            let Some(job) = self.reserve() else {
                if self.interval.is_zero() {
                    info!(worker = %self.name, "queues drained");
                    return Ok(());
                }
                if let Some(action) = self.signals.poll(self.interval) {
                    self.dispatch(action);
                }
                continue;
            };

            info!(jid = %job.jid, queue = %job.queue, "reserved job");
            self.start_children(job)?;
            self.reconcile()?;

            self.job = None;
            did_work = true;
            // the reservation connection sat unused for the whole job; a
            // long one can outlive the server's idle timeout
            self.client.reconnect()?;
        }
    }

    /// Try each queue in declared order; first job wins. A queue that
    /// errors is logged and skipped, the rest are still tried.
    fn reserve(&self) -> Option<Job> {
        reserve_from(&self.queues, |queue| {
            self.client
                .pop(queue, &self.name, 1)
                .map(|jobs| jobs.into_iter().next())
        })
    }

    /// Spawn the executor/watchdog pair for one reserved job.
    fn start_children(&mut self, job: Job) -> Result<()> {
        let spec = ChildSpec {
            role: ChildRole::Executor,
            worker_name: self.name.clone(),
            url: self.config.url.clone(),
            script_path: self.config.script_path.display().to_string(),
            event_channel: self.event_channel.clone(),
            job_json: job.raw().to_string(),
            executor_pid: None,
        };
        self.job = Some(job);

        let executor = forker::spawn(&spec)?;
        let watchdog_spec = ChildSpec {
            role: ChildRole::Watchdog,
            executor_pid: Some(executor.pid() as u32),
            ..spec
        };
        match forker::spawn(&watchdog_spec) {
            Ok(watchdog) => {
                self.executor = Some(executor);
                self.watchdog = Some(watchdog);
                Ok(())
            }
            Err(err) => {
                // without the watchdog the job would run with no lease
                // enforcement; don't run it half-supervised
                error!(%err, "failed to start watchdog; killing executor");
                let mut executor = executor;
                executor.kill();
                executor.reap();
                self.job = None;
                Err(err)
            }
        }
    }

    /// Block until both child slots are empty, dispatching pending signals
    /// along the way.
    fn reconcile(&mut self) -> Result<()> {
        while self.executor.is_some() || self.watchdog.is_some() {
            if let Some(action) = self.signals.poll(RECONCILE_POLL) {
                self.dispatch(action);
                continue;
            }
            self.reap_exited()?;
        }
        Ok(())
    }

    /// Collect every child that changed state since the last poll.
    fn reap_exited(&mut self) -> Result<()> {
        loop {
            let mut status: libc::c_int = 0;
            let pid =
                unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
            match pid {
                0 => return Ok(()),
                -1 => {
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::ECHILD) {
                        return Ok(());
                    }
                    return Err(Error::Process(format!("waitpid failed: {err}")));
                }
                pid if Some(pid) == self.executor.as_ref().map(ChildHandle::pid) => {
                    self.executor_exited(status)?;
                }
                pid if Some(pid) == self.watchdog.as_ref().map(ChildHandle::pid) => {
                    self.watchdog_exited(status)?;
                }
                pid => {
                    // state is no longer trustworthy; stop rather than
                    // keep supervising blind
                    error!(pid, "exit status for a pid that is neither executor nor watchdog");
                    return Err(Error::Internal(format!("unrecognized child pid {pid}")));
                }
            }
        }
    }

    fn executor_exited(&mut self, status: libc::c_int) -> Result<()> {
        let Some(mut handle) = self.executor.take() else {
            return Ok(());
        };
        let pid = handle.pid();
        match classify_status(status) {
            ExitKind::Stopped(signal) => {
                info!(pid, signal, "executor stopped");
                self.executor = Some(handle);
                return Ok(());
            }
            ExitKind::Clean => debug!(pid, "executor exited cleanly"),
            ExitKind::Failed(code) => {
                let message = failure_message(
                    ChildRole::Executor,
                    ExitKind::Failed(code),
                    handle.channel.try_read_record(),
                );
                error!(pid, code, %message, "fatal error in executor");
                self.report_failure(&message);
            }
            ExitKind::Signaled(signal) if signal == libc::SIGKILL => {
                // the expected termination signal: lease loss, cancellation
                // or our own kill; the engine already owns the outcome
                debug!(pid, "executor killed");
            }
            ExitKind::Signaled(signal) => {
                let message = failure_message(
                    ChildRole::Executor,
                    ExitKind::Signaled(signal),
                    handle.channel.try_read_record(),
                );
                warn!(pid, signal, %message, "executor terminated by unhandled signal");
                self.report_failure(&message);
            }
            ExitKind::Unknown => {
                error!(pid, status, "unexpected wait status for executor");
                return Err(Error::Internal(format!(
                    "unexpected wait status {status} for executor"
                )));
            }
        }

        // the job outcome is determined; the watchdog has nothing left
        // to watch
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.kill();
        }
        Ok(())
    }

    fn watchdog_exited(&mut self, status: libc::c_int) -> Result<()> {
        let Some(mut handle) = self.watchdog.take() else {
            return Ok(());
        };
        let pid = handle.pid();
        match classify_status(status) {
            ExitKind::Stopped(signal) => {
                info!(pid, signal, "watchdog stopped");
                self.watchdog = Some(handle);
            }
            ExitKind::Clean => debug!(pid, "watchdog exited cleanly"),
            // watchdog faults never affect the job outcome; the engine's
            // lease bookkeeping stays authoritative
            ExitKind::Failed(code) => {
                let message = failure_message(
                    ChildRole::Watchdog,
                    ExitKind::Failed(code),
                    handle.channel.try_read_record(),
                );
                error!(pid, code, %message, "fatal error in watchdog");
            }
            ExitKind::Signaled(signal) if signal == libc::SIGKILL => {
                debug!(pid, "watchdog killed");
            }
            ExitKind::Signaled(signal) => {
                warn!(pid, signal, "watchdog terminated by unhandled signal");
            }
            ExitKind::Unknown => {
                error!(pid, status, "unexpected wait status for watchdog");
                return Err(Error::Internal(format!(
                    "unexpected wait status {status} for watchdog"
                )));
            }
        }
        Ok(())
    }

    /// Report the current job failed with a process-level diagnostic.
    fn report_failure(&self, message: &str) {
        let Some(job) = self.job.as_ref() else { return };
        if let Err(err) = self.client.fail(
            &job.jid,
            &self.name,
            FATAL_GROUP,
            message,
            Some(&job.data_json()),
        ) {
            error!(%err, jid = %job.jid, "could not report job failure to the engine");
        }
    }

    fn dispatch(&mut self, action: Action) {
        match action {
            Action::Pause => self.pause_processing(),
            Action::Resume => self.unpause_processing(),
            Action::Shutdown => self.shutdown(),
            Action::ShutdownNow => self.shutdown_now(),
            Action::KillChildren => self.kill_children(),
        }
    }

    /// USR2: stop reserving new jobs; a running job is unaffected.
    fn pause_processing(&mut self) {
        info!(worker = %self.name, "pausing job processing");
        self.paused = true;
    }

    /// CONT: resume reservation.
    fn unpause_processing(&mut self) {
        info!(worker = %self.name, "resuming job processing");
        self.paused = false;
    }

    /// QUIT: exit once the current job (if any) has finished.
    fn shutdown(&mut self) {
        if self.executor.is_some() {
            info!(worker = %self.name, "shutting down after the current job");
        } else {
            info!(worker = %self.name, "shutdown requested");
        }
        self.shutdown = true;
    }

    /// TERM / INT: exit now, killing the child pair.
    fn shutdown_now(&mut self) {
        info!(worker = %self.name, "shutting down immediately");
        self.shutdown = true;
        self.kill_children();
    }

    /// USR1: kill the child pair; the job will not be completed by this
    /// worker. Both children are reaped synchronously so the slots are
    /// clean when the loop continues.
    fn kill_children(&mut self) {
        if let Some(mut executor) = self.executor.take() {
            info!(pid = executor.pid(), "killing executor");
            executor.kill();
            executor.reap();
        }
        if let Some(mut watchdog) = self.watchdog.take() {
            info!(pid = watchdog.pid(), "killing watchdog");
            watchdog.kill();
            watchdog.reap();
        }
    }
}

/// Decoded `waitpid` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitKind {
    Clean,
    Failed(i32),
    Signaled(i32),
    Stopped(i32),
    Unknown,
}

fn classify_status(status: libc::c_int) -> ExitKind {
    if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => ExitKind::Clean,
            code => ExitKind::Failed(code),
        }
    } else if libc::WIFSIGNALED(status) {
        ExitKind::Signaled(libc::WTERMSIG(status))
    } else if libc::WIFSTOPPED(status) {
        ExitKind::Stopped(libc::WSTOPSIG(status))
    } else {
        ExitKind::Unknown
    }
}

/// Failure text for a non-clean child exit: the relayed record when one
/// arrived, a status-based generic otherwise.
fn failure_message(role: ChildRole, kind: ExitKind, record: Option<ErrorRecord>) -> String {
    if let Some(record) = record {
        return record.render();
    }
    match kind {
        ExitKind::Failed(code) => {
            format!("{} process failed with status: {}", role.as_str(), code)
        }
        ExitKind::Signaled(signal) => {
            format!("{} process terminated by signal: {}", role.as_str(), signal)
        }
        _ => format!("{} process exited unexpectedly", role.as_str()),
    }
}

/// Queue iteration behind `reserve`: first non-empty pop wins, errors are
/// logged and skipped.
fn reserve_from<F>(queues: &[String], mut pop: F) -> Option<Job>
where
    F: FnMut(&str) -> foreman_core::Result<Option<Job>>,
{
    for queue in queues {
        match pop(queue) {
            Ok(Some(job)) => return Some(job),
            Ok(None) => {}
            Err(err) => error!(%err, %queue, "unable to reserve job on queue"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(jid: &str) -> Job {
        Job::from_json(&format!(r#"{{"jid":"{jid}","klass":"Echo","queue":"q"}}"#)).unwrap()
    }

    #[test]
    fn reserve_walks_queues_in_declared_order() {
        let queues = vec!["Q1".to_string(), "Q2".to_string()];
        let mut asked = Vec::new();
        let job = reserve_from(&queues, |queue| {
            asked.push(queue.to_string());
            if queue == "Q2" {
                Ok(Some(sample_job("J1")))
            } else {
                Ok(None)
            }
        });
        assert_eq!(asked, vec!["Q1".to_string(), "Q2".to_string()]);
        assert_eq!(job.unwrap().jid, "J1");
    }

    #[test]
    fn reserve_stops_at_the_first_job() {
        let queues = vec!["Q1".to_string(), "Q2".to_string()];
        let mut asked = Vec::new();
        let job = reserve_from(&queues, |queue| {
            asked.push(queue.to_string());
            Ok(Some(sample_job("J0")))
        });
        assert_eq!(asked, vec!["Q1".to_string()]);
        assert_eq!(job.unwrap().jid, "J0");
    }

    #[test]
    fn reserve_survives_a_broken_queue() {
        let queues = vec!["bad".to_string(), "good".to_string()];
        let job = reserve_from(&queues, |queue| {
            if queue == "bad" {
                Err(foreman_core::Error::Serialization("unreachable".into()))
            } else {
                Ok(Some(sample_job("J2")))
            }
        });
        assert_eq!(job.unwrap().jid, "J2");
    }

    #[test]
    fn reserve_returns_none_when_everything_is_empty() {
        let queues = vec!["Q1".to_string(), "Q2".to_string()];
        assert!(reserve_from(&queues, |_| Ok(None)).is_none());
    }

    #[test]
    fn record_beats_the_generic_message() {
        let record = ErrorRecord {
            kind: "panic".to_string(),
            file: "job.rs".to_string(),
            line: 3,
            message: "boom".to_string(),
        };
        let message =
            failure_message(ChildRole::Executor, ExitKind::Failed(1), Some(record));
        assert_eq!(message, "[panic] job.rs:3 boom");
    }

    #[test]
    fn generic_messages_carry_the_status() {
        assert_eq!(
            failure_message(ChildRole::Executor, ExitKind::Failed(3), None),
            "executor process failed with status: 3"
        );
        assert_eq!(
            failure_message(ChildRole::Watchdog, ExitKind::Signaled(11), None),
            "watchdog process terminated by signal: 11"
        );
    }

    #[cfg(target_os = "linux")]
    mod status_words {
        use super::*;

        // raw wait status encodings on Linux
        fn exited(code: i32) -> libc::c_int {
            (code & 0xff) << 8
        }
        fn signaled(signal: i32) -> libc::c_int {
            signal
        }
        fn stopped(signal: i32) -> libc::c_int {
            (signal << 8) | 0x7f
        }

        #[test]
        fn classifies_exits() {
            assert_eq!(classify_status(exited(0)), ExitKind::Clean);
            assert_eq!(classify_status(exited(1)), ExitKind::Failed(1));
            assert_eq!(classify_status(exited(42)), ExitKind::Failed(42));
        }

        #[test]
        fn classifies_signals() {
            assert_eq!(
                classify_status(signaled(libc::SIGKILL)),
                ExitKind::Signaled(libc::SIGKILL)
            );
            assert_eq!(
                classify_status(signaled(libc::SIGSEGV)),
                ExitKind::Signaled(libc::SIGSEGV)
            );
        }

        #[test]
        fn classifies_stops() {
            assert_eq!(
                classify_status(stopped(libc::SIGSTOP)),
                ExitKind::Stopped(libc::SIGSTOP)
            );
        }
    }
}
