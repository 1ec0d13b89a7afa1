//! Queue accessor: reserve and enqueue jobs on a named queue.

use serde_json::Value;
use uuid::Uuid;

use crate::client::Client;
use crate::error::Result;
use crate::job::Job;

/// Options accepted when enqueueing a job.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Delay before the job becomes available, in seconds.
    pub delay: u64,
    pub priority: Option<i64>,
    pub tags: Vec<String>,
    pub retries: Option<i64>,
    /// Jids that must complete before this job runs.
    pub depends: Vec<String>,
}

impl PutOptions {
    /// Optional argument pairs appended after the positional put arguments.
    pub(crate) fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(priority) = self.priority {
            args.push("priority".into());
            args.push(priority.to_string());
        }
        if !self.tags.is_empty() {
            args.push("tags".into());
            args.push(serde_json::json!(self.tags).to_string());
        }
        if let Some(retries) = self.retries {
            args.push("retries".into());
            args.push(retries.to_string());
        }
        if !self.depends.is_empty() {
            args.push("depends".into());
            args.push(serde_json::json!(self.depends).to_string());
        }
        args
    }
}

/// A named queue on the engine.
pub struct Queue<'c> {
    client: &'c Client,
    name: String,
}

impl<'c> Queue<'c> {
    pub(crate) fn new(client: &'c Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserve the next available job for `worker`, taking its lease.
    pub fn pop(&self, worker: &str) -> Result<Option<Job>> {
        Ok(self.client.pop(&self.name, worker, 1)?.into_iter().next())
    }

    /// Enqueue a job; the jid is generated client-side. The empty worker
    /// name marks a plain enqueue, not a lease holder.
    pub fn put(&self, klass: &str, data: &Value, opts: &PutOptions) -> Result<String> {
        let jid = Uuid::new_v4().simple().to_string();
        self.client.put(
            "",
            &self.name,
            &jid,
            klass,
            &data.to_string(),
            opts.delay,
            &opts.to_args(),
        )
    }

    /// Number of jobs currently on this queue.
    pub fn len(&self) -> Result<i64> {
        self.client.length(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_add_no_args() {
        assert!(PutOptions::default().to_args().is_empty());
    }

    #[test]
    fn options_encode_as_argument_pairs() {
        let opts = PutOptions {
            delay: 0,
            priority: Some(10),
            tags: vec!["nightly".into(), "batch".into()],
            retries: Some(3),
            depends: vec!["jid-1".into()],
        };
        let args = opts.to_args();
        assert_eq!(
            args,
            vec![
                "priority".to_string(),
                "10".to_string(),
                "tags".to_string(),
                r#"["nightly","batch"]"#.to_string(),
                "retries".to_string(),
                "3".to_string(),
                "depends".to_string(),
                r#"["jid-1"]"#.to_string(),
            ]
        );
    }
}
