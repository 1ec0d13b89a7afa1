//! Executor child: performs one reserved job.
//!
//! Exit code 0 means the job outcome (success or a reported failure)
//! reached the engine. Non-zero means the supervisor must report it,
//! using whatever landed on the error channel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use foreman_core::{Client, ClientConfig, Job};
use tracing::{error, info};

use crate::channel::ChildChannel;
use crate::protocol::{ChildSpec, ErrorRecord};
use crate::registry::HandlerRegistry;
use crate::signals;

/// Failure group for faults escaping the handler.
pub const FATAL_GROUP: &str = "system:fatal";

/// Run the executor role to completion; returns the process exit code.
pub fn run(spec: &ChildSpec, registry: &HandlerRegistry, channel: Option<ChildChannel>) -> i32 {
    signals::reset_child_dispositions();
    install_panic_hook(channel);

    let job = match Job::from_json(&spec.job_json) {
        Ok(job) => job,
        Err(err) => {
            error!(%err, "executor got an undecodable job");
            return 1;
        }
    };
    info!(jid = %job.jid, queue = %job.queue, "processing job");

    let config =
        ClientConfig::new(spec.url.clone()).with_script_path(spec.script_path.as_str());
    let client = match Client::connect(config) {
        Ok(client) => client,
        Err(err) => {
            error!(%err, jid = %job.jid, "executor cannot reach the engine");
            return 1;
        }
    };

    let outcome = match registry.resolve(&job.klass) {
        Ok(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler.perform(&job, &client))),
        Err(err) => Ok(Err(anyhow::Error::new(err))),
    };

    let failure = match outcome {
        Ok(Ok(())) => {
            info!(jid = %job.jid, "job finished");
            None
        }
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let Some(message) = failure else { return 0 };
    error!(jid = %job.jid, %message, "job failed");
    match client.fail(&job.jid, &spec.worker_name, FATAL_GROUP, &message, Some(&job.data_json())) {
        Ok(()) => 0,
        Err(err) => {
            // exit non-zero so the supervisor reports instead, off the
            // error channel record when one was written
            error!(%err, jid = %job.jid, "could not report job failure");
            1
        }
    }
}

/// Relay panics over the error channel before the process dies.
///
/// A caught panic that gets reported to the engine exits 0 and the record
/// goes unread; the record matters when the failure report itself never
/// lands.
fn install_panic_hook(channel: Option<ChildChannel>) {
    let Some(channel) = channel else { return };
    let channel = Mutex::new(channel);
    panic::set_hook(Box::new(move |info| {
        let record = ErrorRecord {
            kind: "panic".to_string(),
            file: info
                .location()
                .map(|l| l.file().to_string())
                .unwrap_or_default(),
            line: info.location().map(|l| l.line()).unwrap_or(0),
            message: payload_message(info.payload()),
        };
        if let Ok(mut channel) = channel.lock() {
            let _ = channel.send_record(&record);
        }
    }));
}

fn payload_message(payload: &dyn Any) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload_message(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new("boom owned".to_string());
        assert_eq!(panic_message(boxed.as_ref()), "boom owned");

        let boxed: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
