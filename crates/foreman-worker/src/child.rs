//! Child-side entry: role detection and dispatch.

use tracing::error;

use crate::channel::ChildChannel;
use crate::executor;
use crate::forker::ROLE_ENV;
use crate::protocol::{ChildRole, ChildSpec, read_message};
use crate::registry::HandlerRegistry;
use crate::watchdog;

/// Detect whether this process was spawned as a child context.
pub fn role_from_env() -> Option<ChildRole> {
    std::env::var(ROLE_ENV).ok().as_deref().and_then(ChildRole::parse)
}

/// Run the detected child role to completion and return its exit code.
///
/// Called from `Worker::run()` before the master loop; the process must
/// exit with the returned code rather than fall through into master logic.
pub fn run(role: ChildRole, registry: &HandlerRegistry) -> i32 {
    let spec: ChildSpec = match read_message(&mut std::io::stdin().lock()) {
        Ok(spec) => spec,
        Err(err) => {
            error!(%err, role = role.as_str(), "child could not read its spawn spec");
            return 1;
        }
    };
    if spec.role != role {
        error!(
            env = role.as_str(),
            spec = spec.role.as_str(),
            "spawn spec role does not match environment"
        );
        return 1;
    }

    match role {
        ChildRole::Executor => {
            let channel = match ChildChannel::from_env() {
                Ok(channel) => Some(channel),
                Err(err) => {
                    // run anyway: the supervisor falls back to a generic
                    // status message if this process dies fatally
                    error!(%err, "executor has no error channel");
                    None
                }
            };
            executor::run(&spec, registry, channel)
        }
        ChildRole::Watchdog => watchdog::run(&spec),
    }
}
