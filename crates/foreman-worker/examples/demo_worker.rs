//! Demo worker: registers a couple of handlers and processes two queues.
//!
//! Enqueue work with the CLI, e.g.
//!
//! ```text
//! foreman put testQueue1 Echo --data '{"message":"hi"}'
//! foreman put testQueue2 Sleeper --data '{"seconds":30}'
//! ```
//!
//! Then pause with `kill -USR2 <pid>`, resume with `kill -CONT <pid>`,
//! and stop gracefully with `kill -QUIT <pid>`.

use std::time::Duration;

use anyhow::Context;
use foreman_core::{Client, ClientConfig, Job};
use foreman_worker::{HandlerRegistry, JobHandler, Worker};

struct Echo;

impl JobHandler for Echo {
    fn perform(&self, job: &Job, _client: &Client) -> anyhow::Result<()> {
        let message = job
            .data
            .get("message")
            .and_then(|m| m.as_str())
            .context("payload has no message")?;
        println!("echo: {message}");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut registry = HandlerRegistry::new();
    registry.register("Echo", Echo);
    registry.register("Sleeper", |job: &Job, _client: &Client| {
        let seconds = job.data.get("seconds").and_then(|s| s.as_u64()).unwrap_or(1);
        std::thread::sleep(Duration::from_secs(seconds));
        Ok(())
    });

    let name = format!("demo-{}", std::process::id());
    Worker::new(
        ClientConfig::default(),
        name,
        ["testQueue1", "testQueue2"],
        registry,
    )
    .with_interval(Duration::from_secs(5))
    .run()?;

    Ok(())
}
