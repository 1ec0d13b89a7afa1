//! Read-side accessors over jobs already known to the engine.

use std::collections::HashMap;

use serde::Deserialize;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::job::Job;

/// Paginated jid listing returned by `failed` and `tag get`. The engine
/// also reports a total count; only the page itself is kept.
#[derive(Debug, Deserialize)]
struct JidPage {
    #[serde(default)]
    jobs: Vec<String>,
}

/// Accessors for jobs by id, tag, or failure group.
pub struct Jobs<'c> {
    client: &'c Client,
}

impl<'c> Jobs<'c> {
    pub(crate) fn new(client: &'c Client) -> Self {
        Self { client }
    }

    /// Fetch a single job; `None` if the engine does not know the jid.
    pub fn get(&self, jid: &str) -> Result<Option<Job>> {
        match self.client.json_reply("get", &[jid.into()])? {
            None => Ok(None),
            Some(raw) => Job::from_json(&raw).map(Some),
        }
    }

    /// Fetch several jobs at once; unknown jids are dropped by the engine.
    pub fn multiget(&self, jids: &[String]) -> Result<Vec<Job>> {
        if jids.is_empty() {
            return Ok(Vec::new());
        }
        match self.client.json_reply("multiget", jids)? {
            None => Ok(Vec::new()),
            Some(raw) => Job::parse_many(&raw),
        }
    }

    /// Jids in the completed state, paginated.
    pub fn completed(&self, offset: u64, count: u64) -> Result<Vec<String>> {
        let reply = self.client.command(
            "jobs",
            &["complete".into(), offset.to_string(), count.to_string()],
        )?;
        redis::from_redis_value(&reply)
            .map_err(|e| Error::Serialization(format!("unexpected jobs reply: {e}")))
    }

    /// Failed-job counts keyed by failure group.
    pub fn failed_counts(&self) -> Result<HashMap<String, i64>> {
        match self.client.json_reply("failed", &[])? {
            None => Ok(HashMap::new()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Serialization(format!("malformed failure counts: {e}"))),
        }
    }

    /// Failed jobs in one group, paginated.
    pub fn failed(&self, group: &str, start: u64, count: u64) -> Result<Vec<Job>> {
        let page = self.jid_page(
            "failed",
            &[group.into(), start.to_string(), count.to_string()],
        )?;
        self.multiget(&page.jobs)
    }

    /// Jobs carrying a tag, paginated.
    pub fn tagged(&self, tag: &str, offset: u64, count: u64) -> Result<Vec<Job>> {
        let page = self.jid_page(
            "tag",
            &[
                "get".into(),
                tag.into(),
                offset.to_string(),
                count.to_string(),
            ],
        )?;
        self.multiget(&page.jobs)
    }

    fn jid_page(&self, command: &str, args: &[String]) -> Result<JidPage> {
        match self.client.json_reply(command, args)? {
            None => Ok(JidPage { jobs: Vec::new() }),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Serialization(format!("malformed jid listing: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_page_decodes() {
        let page: JidPage =
            serde_json::from_str(r#"{"total":2,"jobs":["jid-1","jid-2"]}"#).unwrap();
        assert_eq!(page.jobs, vec!["jid-1".to_string(), "jid-2".to_string()]);
    }
}
