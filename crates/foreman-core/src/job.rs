//! Job records returned by the engine.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::script::now_secs;

/// A job reserved from (or fetched out of) the engine.
///
/// The record is owned by the engine; this is a transient snapshot held
/// for at most one execution cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub jid: String,
    /// Handler name, resolved through the worker's registry.
    pub klass: String,
    #[serde(default)]
    pub queue: String,
    /// Job payload. The engine stores it as a JSON document encoded into a
    /// string field; both shapes are accepted here.
    #[serde(default, deserialize_with = "nested_json")]
    pub data: Value,
    /// Worker of record holding the lease.
    #[serde(default)]
    pub worker: String,
    /// Lease expiry as epoch seconds.
    #[serde(default)]
    pub expires: f64,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tags: Vec<String>,
    /// Retries remaining.
    #[serde(default)]
    pub remaining: i64,
    /// Retries originally requested.
    #[serde(default)]
    pub retries: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub dependents: Vec<String>,
    #[serde(default, deserialize_with = "lenient_failure")]
    pub failure: Option<Failure>,

    /// The record exactly as the engine returned it.
    #[serde(skip)]
    raw: String,
}

/// Failure details attached to a failed job.
#[derive(Debug, Clone, Deserialize)]
pub struct Failure {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub worker: String,
    #[serde(default)]
    pub when: f64,
}

impl Job {
    /// Decode one job record.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut job: Job = serde_json::from_str(raw)
            .map_err(|e| Error::Serialization(format!("malformed job record: {e}")))?;
        job.raw = raw.to_string();
        Ok(job)
    }

    /// Decode a list reply, e.g. from `pop` or `multiget`. An empty list
    /// may arrive as `{}`: the engine's JSON encoder cannot tell an empty
    /// array from an empty table.
    pub fn parse_many(raw: &str) -> Result<Vec<Job>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::Serialization(format!("malformed job list: {e}")))?;
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| Job::from_json(&item.to_string()))
                .collect(),
            Value::Object(map) if map.is_empty() => Ok(Vec::new()),
            other => Err(Error::Serialization(format!(
                "expected a job list, got: {other}"
            ))),
        }
    }

    /// Seconds remaining before the lease on this job times out.
    pub fn ttl(&self) -> f64 {
        self.expires - now_secs()
    }

    /// Payload re-encoded the way engine commands expect it.
    pub fn data_json(&self) -> String {
        self.data.to_string()
    }

    /// The record exactly as the engine returned it.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

fn nested_json<'de, D>(deserializer: D) -> std::result::Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(inner) => Ok(serde_json::from_str(&inner)
            .unwrap_or(Value::String(inner))),
        other => Ok(other),
    }
}

fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

fn lenient_failure<'de, D>(deserializer: D) -> std::result::Result<Option<Failure>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(ref map) if !map.is_empty() => {
            Ok(serde_json::from_value(value.clone()).ok())
        }
        _ => Ok(None),
    }
}
