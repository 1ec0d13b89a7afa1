//! Engine command dispatch through the engine's Lua core.
//!
//! Every engine command is one `EVALSHA` against a single script, invoked
//! with zero keys as `<command> <now> <args...>`. The script is installed
//! by SHA and reloaded transparently when the server does not know it.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use redis::Connection;

use crate::error::{Error, Result};

/// The engine's Lua core, ready for invocation.
#[derive(Debug)]
pub struct Script {
    inner: redis::Script,
}

impl Script {
    pub fn new(source: &str) -> Self {
        Self {
            inner: redis::Script::new(source),
        }
    }

    /// Load the script source from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("cannot load engine script {}: {}", path.display(), e),
            ))
        })?;
        Ok(Self::new(&source))
    }

    /// Issue one engine command. `args` are appended after the command name
    /// and the current timestamp; all Redis script arguments travel as byte
    /// strings regardless of their Lua-side type.
    pub fn run(&self, conn: &mut Connection, command: &str, args: &[String]) -> Result<redis::Value> {
        let mut invocation = self.inner.prepare_invoke();
        invocation.arg(command).arg(now_secs());
        for arg in args {
            invocation.arg(arg.as_str());
        }
        invocation.invoke(conn).map_err(classify)
    }
}

/// Current time as fractional epoch seconds, the timestamp format the
/// engine expects on every command.
pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Separate transport failures from errors raised inside the engine.
fn classify(error: redis::RedisError) -> Error {
    if error.is_io_error() || error.is_connection_refusal() || error.is_timeout() {
        return Error::Connection(error);
    }
    match error.kind() {
        redis::ErrorKind::ResponseError | redis::ErrorKind::ExtensionError => {
            Error::from_engine(&error.to_string())
        }
        _ => Error::Connection(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_script_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "return 1").unwrap();
        assert!(Script::from_file(file.path()).is_ok());
    }

    #[test]
    fn missing_script_is_an_error() {
        let err = Script::from_file(Path::new("/nonexistent/engine.lua")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.lua"));
    }

    #[test]
    fn now_is_epoch_scale() {
        // sanity: seconds, not millis
        let now = now_secs();
        assert!(now > 1_600_000_000.0 && now < 10_000_000_000.0);
    }
}
