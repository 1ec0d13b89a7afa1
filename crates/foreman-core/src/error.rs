//! Error types for foreman-core.

use thiserror::Error;

/// Result type for foreman-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the queue engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to reach the Redis server backing the engine.
    #[error("connection error: {0}")]
    Connection(#[from] redis::RedisError),

    /// The engine rejected a command.
    #[error("engine error{}: {message}", area.as_ref().map(|a| format!(" in {}", a)).unwrap_or_default())]
    Engine {
        /// Engine function that raised the error, when reported.
        area: Option<String>,
        message: String,
    },

    /// The job does not exist or is no longer in a reachable state.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The job's lease was handed to another worker.
    #[error("job lost: {0}")]
    JobLost(String),

    /// Malformed payload from the engine.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify an error string reported by the engine's Lua core.
    ///
    /// Script errors come back as
    /// `ERR ... user_script:<line>: <area>(): <message>`; the area is
    /// extracted when that shape is present.
    pub fn from_engine(error: &str) -> Self {
        let (area, message) = split_script_error(error);
        let lower = message.to_lowercase();
        if lower.contains("does not exist") {
            Error::InvalidJob(message)
        } else if lower.contains("given out to another worker") {
            Error::JobLost(message)
        } else {
            Error::Engine { area, message }
        }
    }
}

fn split_script_error(error: &str) -> (Option<String>, String) {
    if let Some(idx) = error.find("user_script:") {
        let rest = &error[idx..];
        // user_script:<line>: <area>(): <message>
        if let Some(colon) = rest.find(": ")
            && let Some(paren) = rest[colon + 2..].find("(): ")
        {
            let tail = &rest[colon + 2..];
            let area = tail[..paren].trim();
            let message = tail[paren + 4..].trim();
            let well_formed = !area.is_empty()
                && area
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '.' || c == '_');
            if well_formed {
                return (Some(area.to_string()), message.to_string());
            }
        }
    }
    (None, error.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_job() {
        let err = Error::from_engine(
            "ERR Error running script: user_script:123: Job.fail(): Job jid-1 does not exist",
        );
        match err {
            Error::InvalidJob(message) => assert_eq!(message, "Job jid-1 does not exist"),
            other => panic!("wrong classification: {:?}", other),
        }
    }

    #[test]
    fn classifies_lost_lease() {
        let err = Error::from_engine(
            "ERR user_script:88: Job.heartbeat(): Job given out to another worker: foo",
        );
        assert!(matches!(err, Error::JobLost(_)));
    }

    #[test]
    fn extracts_area() {
        let err = Error::from_engine("ERR user_script:7: queue.pop(): something odd");
        match err {
            Error::Engine { area, message } => {
                assert_eq!(area.as_deref(), Some("queue.pop"));
                assert_eq!(message, "something odd");
            }
            other => panic!("wrong classification: {:?}", other),
        }
    }

    #[test]
    fn passes_through_unshaped_errors() {
        let err = Error::from_engine("WRONGTYPE Operation against a key");
        match err {
            Error::Engine { area, message } => {
                assert!(area.is_none());
                assert_eq!(message, "WRONGTYPE Operation against a key");
            }
            other => panic!("wrong classification: {:?}", other),
        }
    }
}
