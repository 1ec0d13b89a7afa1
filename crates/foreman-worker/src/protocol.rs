//! IPC protocol between the supervisor and its child processes.
//!
//! Uses length-prefixed rkyv messages.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! The supervisor hands a `ChildSpec` to each child on its stdin at spawn;
//! a child dying from a fault relays an `ErrorRecord` back over its error
//! channel.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which child context a spawned process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ChildRole {
    /// Runs the job handler.
    Executor,
    /// Watches the event feed and enforces lease loss.
    Watchdog,
}

impl ChildRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChildRole::Executor => "executor",
            ChildRole::Watchdog => "watchdog",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "executor" => Some(ChildRole::Executor),
            "watchdog" => Some(ChildRole::Watchdog),
            _ => None,
        }
    }
}

/// Everything a child needs to do its work, handed over at spawn.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct ChildSpec {
    pub role: ChildRole,

    /// Worker identity, used for failure reports and event matching.
    pub worker_name: String,

    /// Engine URL; every child opens its own connection.
    pub url: String,

    /// Path to the engine's Lua core.
    pub script_path: String,

    /// Channel carrying the engine's lifecycle events.
    pub event_channel: String,

    /// The reserved job, exactly as the engine returned it.
    pub job_json: String,

    /// Pid of the executor to kill on lease loss. Watchdog only.
    pub executor_pid: Option<u32>,
}

/// Fatal-error diagnostic relayed from a dying child.
///
/// Created only inside the executor when a fault escapes normal handling;
/// consumed at most once, by the supervisor reaping a non-clean exit.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Fault classification, e.g. `panic`.
    pub kind: String,
    /// Source location that raised the fault, when known.
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl ErrorRecord {
    /// One-line rendering used in failure reports.
    pub fn render(&self) -> String {
        format!("[{}] {}:{} {}", self.kind, self.file, self.line, self.message)
    }
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// # Safety
///
/// Uses unchecked deserialization for performance. Only safe when reading
/// from trusted sources (our own supervisor and child processes).
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    // Sanity check: reject absurdly large messages (16MB); specs and error
    // records are small even with bulky job payloads
    if len > 16 * 1024 * 1024 {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // SAFETY: We trust data from our own supervisor and child processes.
    // Using unchecked deserialization avoids CheckBytes trait complexity.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&bytes) }
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_spec_roundtrip() {
        let spec = ChildSpec {
            role: ChildRole::Watchdog,
            worker_name: "worker-1".to_string(),
            url: "redis://127.0.0.1:6379/".to_string(),
            script_path: "qless-core/qless.lua".to_string(),
            event_channel: "ql:log".to_string(),
            job_json: r#"{"jid":"jid-1","klass":"Echo"}"#.to_string(),
            executor_pid: Some(4242),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &spec).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: ChildSpec = read_message(&mut cursor).unwrap();

        assert_eq!(decoded.role, ChildRole::Watchdog);
        assert_eq!(decoded.worker_name, "worker-1");
        assert_eq!(decoded.event_channel, "ql:log");
        assert_eq!(decoded.executor_pid, Some(4242));
        assert!(decoded.job_json.contains("jid-1"));
    }

    #[test]
    fn test_record_roundtrip() {
        let record = ErrorRecord {
            kind: "panic".to_string(),
            file: "src/handlers.rs".to_string(),
            line: 42,
            message: "boom".to_string(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &record).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: ErrorRecord = read_message(&mut cursor).unwrap();

        assert_eq!(decoded.kind, "panic");
        assert_eq!(decoded.line, 42);
        assert_eq!(decoded.render(), "[panic] src/handlers.rs:42 boom");
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(64 * 1024 * 1024u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(buf);
        let result: Result<ErrorRecord> = read_message(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_message_is_an_error() {
        let record = ErrorRecord {
            kind: "panic".to_string(),
            file: String::new(),
            line: 0,
            message: "partial".to_string(),
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &record).unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        let result: Result<ErrorRecord> = read_message(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_role_names() {
        for role in [ChildRole::Executor, ChildRole::Watchdog] {
            assert_eq!(ChildRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(ChildRole::parse("master"), None);
    }
}
