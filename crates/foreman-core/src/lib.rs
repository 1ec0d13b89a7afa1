//! Client plumbing for the foreman job-queue worker.
//!
//! This crate provides:
//! - `Client` for issuing commands against the queue engine over Redis
//! - `Job` records and the `Queue`/`Jobs` accessors built on top of them
//! - `Listener` for the engine's event feed
//! - Typed errors for engine responses
//!
//! Queue semantics (priorities, leases, retries, dependencies) live
//! server-side in the engine's Lua core; nothing here recomputes them.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod jobs;
pub mod queue;
pub mod script;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use events::{EVENT_CHANNEL, Event, EventKind, Listener};
pub use job::{Failure, Job};
pub use jobs::Jobs;
pub use queue::{PutOptions, Queue};
