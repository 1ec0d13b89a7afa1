//! Out-of-band error channel between the supervisor and a child.
//!
//! A `UnixStream` pair created before each spawn. The parent keeps one end
//! with a short receive timeout so reconciliation never stalls on it; the
//! child end is inherited across exec and reattached from the fd number in
//! `FOREMAN_ERROR_FD`. The channel carries exactly one kind of traffic: a
//! serialized `ErrorRecord` from a dying child.

use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{ErrorRecord, read_message, write_message};

/// How long the supervisor will wait on a channel read while reconciling.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Environment variable carrying the child end's fd number across exec.
pub const ERROR_FD_ENV: &str = "FOREMAN_ERROR_FD";

/// Supervisor-side end of a child's error channel.
pub struct ErrorChannel {
    stream: UnixStream,
}

/// Child-side end of the error channel.
pub struct ChildChannel {
    stream: UnixStream,
}

/// Create the duplex pair for one child.
pub fn pair() -> Result<(ErrorChannel, ChildChannel)> {
    let (parent, child) = UnixStream::pair()
        .map_err(|e| Error::Ipc(format!("unable to create channel pair: {e}")))?;
    parent
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| Error::Ipc(format!("unable to set channel timeout: {e}")))?;
    Ok((ErrorChannel { stream: parent }, ChildChannel { stream: child }))
}

impl ErrorChannel {
    /// Read a relayed `ErrorRecord`, bounded by the channel timeout.
    ///
    /// `None` when the child wrote nothing, which is the common case:
    /// clean exits and kills leave the channel empty.
    pub fn try_read_record(&mut self) -> Option<ErrorRecord> {
        match read_message(&mut self.stream) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(%err, "no error record on channel");
                None
            }
        }
    }
}

impl ChildChannel {
    /// Prepare the fd for inheritance across exec.
    ///
    /// `UnixStream` fds are close-on-exec by default; the child must
    /// inherit this one.
    pub fn inheritable_fd(&self) -> Result<RawFd> {
        let fd = self.stream.as_raw_fd();
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, 0) };
        if rc == -1 {
            return Err(Error::Ipc(format!(
                "unable to clear close-on-exec: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(fd)
    }

    /// Reattach the channel inside a freshly spawned child.
    pub fn from_env() -> Result<Self> {
        let fd: RawFd = std::env::var(ERROR_FD_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Ipc(format!("{ERROR_FD_ENV} not set in child")))?;
        // SAFETY: the fd was created by the supervisor for this child and
        // nothing else in this process owns it.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        Ok(Self { stream })
    }

    /// Relay a fatal-error record to the supervisor.
    pub fn send_record(&mut self, record: &ErrorRecord) -> Result<()> {
        write_message(&mut self.stream, record)
    }

    pub fn try_clone(&self) -> Result<Self> {
        let stream = self
            .stream
            .try_clone()
            .map_err(|e| Error::Ipc(format!("unable to clone channel end: {e}")))?;
        Ok(Self { stream })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn record_crosses_the_pair() {
        let (mut parent, mut child) = pair().unwrap();
        child
            .send_record(&ErrorRecord {
                kind: "panic".to_string(),
                file: "handler.rs".to_string(),
                line: 7,
                message: "boom".to_string(),
            })
            .unwrap();

        let record = parent.try_read_record().expect("record was written");
        assert_eq!(record.message, "boom");
        assert_eq!(record.render(), "[panic] handler.rs:7 boom");
    }

    #[test]
    fn empty_channel_returns_within_the_timeout() {
        let (mut parent, _child) = pair().unwrap();
        let start = Instant::now();
        assert!(parent.try_read_record().is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn closed_child_end_reads_as_no_record() {
        let (mut parent, child) = pair().unwrap();
        drop(child);
        assert!(parent.try_read_record().is_none());
    }

    #[test]
    fn record_survives_a_cloned_end() {
        let (mut parent, child) = pair().unwrap();
        let mut clone = child.try_clone().unwrap();
        clone
            .send_record(&ErrorRecord {
                kind: "panic".to_string(),
                file: String::new(),
                line: 0,
                message: "from clone".to_string(),
            })
            .unwrap();
        assert_eq!(parent.try_read_record().unwrap().message, "from clone");
    }
}
