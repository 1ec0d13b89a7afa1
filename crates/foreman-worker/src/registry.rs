//! Handler registry: job class name to executable handler.
//!
//! Resolution is an explicit map lookup; a job whose class was never
//! registered fails with a clear error instead of any runtime reflection.

use std::collections::HashMap;

use foreman_core::{Client, Job};

use crate::error::{Error, Result};

/// A unit of work the worker knows how to perform.
///
/// Runs inside the executor child. Errors and panics are both contained by
/// the process boundary and reported to the engine as job failures.
pub trait JobHandler: Send + Sync {
    fn perform(&self, job: &Job, client: &Client) -> anyhow::Result<()>;
}

impl<F> JobHandler for F
where
    F: Fn(&Job, &Client) -> anyhow::Result<()> + Send + Sync,
{
    fn perform(&self, job: &Job, client: &Client) -> anyhow::Result<()> {
        self(job, client)
    }
}

/// Registered handlers, keyed by the job class name carried in job records.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job class, replacing any previous one.
    pub fn register(
        &mut self,
        klass: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(klass.into(), Box::new(handler));
        self
    }

    pub fn resolve(&self, klass: &str) -> Result<&dyn JobHandler> {
        self.handlers
            .get(klass)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| Error::HandlerNotRegistered(klass.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |_job: &Job, _client: &Client| Ok(()));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("Echo").is_ok());
    }

    #[test]
    fn unknown_class_is_a_typed_error() {
        let registry = HandlerRegistry::new();
        match registry.resolve("Mystery") {
            Err(Error::HandlerNotRegistered(name)) => assert_eq!(name, "Mystery"),
            other => panic!("expected HandlerNotRegistered, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |_job: &Job, _client: &Client| {
            anyhow::bail!("first")
        });
        registry.register("Echo", |_job: &Job, _client: &Client| Ok(()));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("Echo").is_ok());
    }
}
