//! The engine's event feed.
//!
//! The engine publishes job lifecycle records as JSON on a pub/sub
//! channel. The worker's watchdog subscribes to enforce lease loss and
//! cancellation on the running job.

use std::ops::ControlFlow;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Channel the engine publishes lifecycle events on.
pub const EVENT_CHANNEL: &str = "ql:log";

/// Lifecycle event kinds. The feed carries more than these; anything else
/// lands in `Other` and is ignored by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The job's lease was handed to another worker.
    LockLost,
    Canceled,
    Completed,
    Failed,
    #[serde(untagged)]
    Other(String),
}

/// One record off the event feed. Transient; consumers discard anything
/// that does not concern the job they watch.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(default)]
    pub jid: String,
    /// Worker the event concerns, when the engine reports one.
    #[serde(default)]
    pub worker: String,
    #[serde(default)]
    pub queue: String,
}

impl Event {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Serialization(format!("malformed event record: {e}")))
    }
}

/// Blocking subscriber over the engine's event channels.
///
/// Holds a dedicated connection: a subscribed Redis connection cannot be
/// used for commands.
pub struct Listener {
    conn: redis::Connection,
}

impl Listener {
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            conn: client.get_connection()?,
        })
    }

    /// Deliver events to `callback` until it breaks or the connection
    /// dies. Records that do not decode are skipped; the feed also carries
    /// engine log entries that are not lifecycle events.
    pub fn listen<F>(&mut self, channels: &[&str], mut callback: F) -> Result<()>
    where
        F: FnMut(&str, Event) -> ControlFlow<()>,
    {
        let mut pubsub = self.conn.as_pubsub();
        for channel in channels {
            pubsub.subscribe(*channel)?;
        }
        loop {
            let msg = pubsub.get_message()?;
            let payload: String = msg.get_payload()?;
            let event = match Event::from_json(&payload) {
                Ok(event) => event,
                Err(err) => {
                    debug!(%err, "skipping undecodable feed record");
                    continue;
                }
            };
            if let ControlFlow::Break(()) = callback(msg.get_channel_name(), event) {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lifecycle_events() {
        let event = Event::from_json(
            r#"{"event":"lock_lost","jid":"jid-1","worker":"worker-1","queue":"q1"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::LockLost);
        assert_eq!(event.jid, "jid-1");
        assert_eq!(event.worker, "worker-1");

        for (raw, kind) in [
            ("canceled", EventKind::Canceled),
            ("completed", EventKind::Completed),
            ("failed", EventKind::Failed),
        ] {
            let event =
                Event::from_json(&format!(r#"{{"event":"{raw}","jid":"jid-1"}}"#)).unwrap();
            assert_eq!(event.kind, kind);
        }
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let event = Event::from_json(r#"{"event":"popped","jid":"jid-1"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Other("popped".to_string()));
    }

    #[test]
    fn missing_fields_default() {
        let event = Event::from_json(r#"{"event":"completed","jid":"jid-1"}"#).unwrap();
        assert!(event.worker.is_empty());
        assert!(event.queue.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Event::from_json("not json").is_err());
    }
}
