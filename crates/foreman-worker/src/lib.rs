//! Process-supervised worker for the foreman job queue.
//!
//! The worker reserves one job at a time and runs it in an isolated child
//! process, paired with a watchdog process that enforces lease loss and
//! cancellation off the engine's event feed. Misbehaving handler code can
//! be killed at any moment without taking the supervisor down.
//!
//! This crate provides:
//! - `Worker`: the master loop (reserve, spawn, reconcile)
//! - `HandlerRegistry`/`JobHandler`: job class resolution
//! - The IPC protocol and error channel between supervisor and children
//! - Signal routing for pause/resume and shutdown

pub mod channel;
pub mod child;
pub mod error;
pub mod executor;
pub mod forker;
pub mod protocol;
pub mod registry;
pub mod signals;
pub mod supervisor;
pub mod watchdog;

pub use error::{Error, Result};
pub use registry::{HandlerRegistry, JobHandler};
pub use supervisor::Worker;
