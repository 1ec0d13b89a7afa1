//! Client for the queue engine.
//!
//! Wraps a Redis connection and the engine's Lua core, exposing the narrow
//! command set the worker relies on (pop, fail, complete, heartbeat, retry,
//! cancel) plus the accessors built on top of it. The client is
//! single-threaded by design; each process context owns its own.

use std::cell::RefCell;

use redis::Value;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::Listener;
use crate::job::Job;
use crate::jobs::Jobs;
use crate::queue::Queue;
use crate::script::Script;

pub struct Client {
    redis: redis::Client,
    conn: RefCell<redis::Connection>,
    script: Script,
    config: ClientConfig,
}

impl Client {
    /// Connect to the engine and prepare its Lua core for invocation.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let redis = redis::Client::open(config.url.as_str())?;
        let conn = redis.get_connection()?;
        let script = Script::from_file(&config.script_path)?;
        Ok(Self {
            redis,
            conn: RefCell::new(conn),
            script,
            config,
        })
    }

    /// Reestablish the underlying connection. The installed script is
    /// addressed by SHA and survives on the server.
    pub fn reconnect(&self) -> Result<()> {
        *self.conn.borrow_mut() = self.redis.get_connection()?;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issue a raw engine command.
    pub fn command(&self, command: &str, args: &[String]) -> Result<Value> {
        let mut conn = self.conn.borrow_mut();
        self.script.run(&mut conn, command, args)
    }

    fn string_reply(&self, command: &str, args: &[String]) -> Result<Option<String>> {
        optional_string(self.command(command, args)?)
    }

    /// Pop up to `count` jobs off a queue for `worker`, taking a lease on
    /// each.
    pub fn pop(&self, queue: &str, worker: &str, count: usize) -> Result<Vec<Job>> {
        let reply = self.string_reply("pop", &[queue.into(), worker.into(), count.to_string()])?;
        match reply {
            None => Ok(Vec::new()),
            Some(raw) => Job::parse_many(&raw),
        }
    }

    /// Enqueue a job under `jid`. Optional argument pairs (priority, tags,
    /// retries, depends) follow the positional arguments.
    pub fn put(
        &self,
        worker: &str,
        queue: &str,
        jid: &str,
        klass: &str,
        data: &str,
        delay: u64,
        extra: &[String],
    ) -> Result<String> {
        let mut args = vec![
            worker.to_string(),
            queue.to_string(),
            jid.to_string(),
            klass.to_string(),
            data.to_string(),
            delay.to_string(),
        ];
        args.extend_from_slice(extra);
        self.string_reply("put", &args)?
            .ok_or_else(|| Error::Serialization("put returned no jid".into()))
    }

    /// Mark a job failed, releasing its lease.
    pub fn fail(
        &self,
        jid: &str,
        worker: &str,
        group: &str,
        message: &str,
        data: Option<&str>,
    ) -> Result<()> {
        let mut args = vec![
            jid.to_string(),
            worker.to_string(),
            group.to_string(),
            message.to_string(),
        ];
        if let Some(data) = data {
            args.push(data.to_string());
        }
        self.command("fail", &args)?;
        Ok(())
    }

    /// Complete a job; returns the job's resulting state when reported.
    pub fn complete(&self, jid: &str, worker: &str, queue: &str, data: &str) -> Result<Option<String>> {
        self.string_reply(
            "complete",
            &[jid.into(), worker.into(), queue.into(), data.into()],
        )
    }

    /// Renew the lease on a job; returns the new expiry (epoch seconds).
    pub fn heartbeat(&self, jid: &str, worker: &str, data: Option<&str>) -> Result<f64> {
        let mut args = vec![jid.to_string(), worker.to_string()];
        if let Some(data) = data {
            args.push(data.to_string());
        }
        let reply = self.command("heartbeat", &args)?;
        redis::from_redis_value(&reply)
            .map_err(|e| Error::Serialization(format!("unexpected heartbeat reply: {e}")))
    }

    /// Requeue a job for retry; returns the retries remaining.
    pub fn retry(
        &self,
        jid: &str,
        queue: &str,
        worker: &str,
        delay: u64,
        group: &str,
        message: &str,
    ) -> Result<i64> {
        let reply = self.command(
            "retry",
            &[
                jid.into(),
                queue.into(),
                worker.into(),
                delay.to_string(),
                group.into(),
                message.into(),
            ],
        )?;
        redis::from_redis_value(&reply)
            .map_err(|e| Error::Serialization(format!("unexpected retry reply: {e}")))
    }

    pub fn cancel(&self, jid: &str) -> Result<()> {
        self.command("cancel", &[jid.into()])?;
        Ok(())
    }

    /// Time out a running job, forcing it back onto its queue.
    pub fn timeout(&self, jid: &str) -> Result<()> {
        self.command("timeout", &[jid.into()])?;
        Ok(())
    }

    /// Number of jobs currently on a queue.
    pub fn length(&self, queue: &str) -> Result<i64> {
        let reply = self.command("length", &[queue.into()])?;
        redis::from_redis_value(&reply)
            .map_err(|e| Error::Serialization(format!("unexpected length reply: {e}")))
    }

    /// Tag bookkeeping; `op` is one of `add`, `remove`, `get`.
    pub fn tag(&self, op: &str, args: &[String]) -> Result<Option<String>> {
        let mut full = vec![op.to_string()];
        full.extend_from_slice(args);
        self.string_reply("tag", &full)
    }

    pub fn config_get(&self, name: &str) -> Result<Option<String>> {
        self.string_reply("config.get", &[name.into()])
    }

    pub fn config_set(&self, name: &str, value: &str) -> Result<()> {
        self.command("config.set", &[name.into(), value.into()])?;
        Ok(())
    }

    pub fn config_clear(&self, name: &str) -> Result<()> {
        self.command("config.unset", &[name.into()])?;
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Queue<'_> {
        Queue::new(self, name)
    }

    pub fn jobs(&self) -> Jobs<'_> {
        Jobs::new(self)
    }

    /// Open a dedicated subscription connection to the engine's event feed.
    pub fn listener(&self) -> Result<Listener> {
        Listener::connect(&self.config.url)
    }

    pub(crate) fn json_reply(&self, command: &str, args: &[String]) -> Result<Option<String>> {
        self.string_reply(command, args)
    }
}

fn optional_string(value: Value) -> Result<Option<String>> {
    match value {
        Value::Nil => Ok(None),
        other => redis::from_redis_value(&other)
            .map(Some)
            .map_err(|e| Error::Serialization(format!("unexpected engine reply: {e}"))),
    }
}
