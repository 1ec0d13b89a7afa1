//! Spawning of isolated child contexts.
//!
//! Children are fresh executions of the current binary: `Worker::run()`
//! detects the child role from the environment before the master loop ever
//! starts, so the handler registry built by the embedding program exists on
//! both sides. exec gives each child a clean signal slate and guarantees no
//! engine connection crosses the process boundary.

use std::process::{Child, Command, Stdio};

use tracing::{debug, error};

use crate::channel::{self, ERROR_FD_ENV, ErrorChannel};
use crate::error::{Error, Result};
use crate::protocol::{ChildRole, ChildSpec, write_message};

/// Environment variable naming the role a spawned child runs.
pub const ROLE_ENV: &str = "FOREMAN_CHILD_ROLE";

/// Supervisor-side handle to a spawned child.
pub struct ChildHandle {
    pub role: ChildRole,
    child: Child,
    /// Error channel end, read when the child exits non-clean.
    pub channel: ErrorChannel,
}

impl ChildHandle {
    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// SIGKILL the child. The only cancellation primitive between the
    /// supervisor and its children; errors other than "already gone" are
    /// logged.
    pub fn kill(&mut self) {
        let pid = self.pid();
        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                error!(pid, %err, role = self.role.as_str(), "failed to kill child");
            }
        }
    }

    /// Blocking reap after a kill. Already-reaped children are fine.
    pub fn reap(&mut self) {
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(self.pid(), &mut status, 0) };
    }
}

/// Spawn one child context paired with a fresh error channel.
///
/// Failure to create the channel aborts starting this child.
pub fn spawn(spec: &ChildSpec) -> Result<ChildHandle> {
    let (parent_end, child_end) = channel::pair()?;
    let exe = std::env::current_exe()
        .map_err(|e| Error::Process(format!("cannot locate current executable: {e}")))?;
    let fd = child_end.inheritable_fd()?;

    let mut child = Command::new(&exe)
        .env(ROLE_ENV, spec.role.as_str())
        .env(ERROR_FD_ENV, fd.to_string())
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::Process(format!(
                "failed to spawn {} process from '{}': {}",
                spec.role.as_str(),
                exe.display(),
                e
            ))
        })?;

    // hand the spec over, then close our side so the child sees EOF
    let handoff = child
        .stdin
        .take()
        .ok_or_else(|| Error::Process("spawned child has no stdin pipe".into()))
        .and_then(|mut stdin| write_message(&mut stdin, spec));
    if let Err(err) = handoff {
        let _ = child.kill();
        let _ = child.wait();
        return Err(err);
    }
    drop(child_end);

    debug!(role = spec.role.as_str(), pid = child.id(), "spawned child");
    Ok(ChildHandle {
        role: spec.role,
        child,
        channel: parent_end,
    })
}
