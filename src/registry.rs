//! Maps job names to the logic that runs them.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::job::Job;

/// Executable logic for jobs of one name. Long-running handlers should
/// `touch` the job periodically and watch its cancellation token.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &mut Job) -> anyhow::Result<()>;
}

pub type BoxedRun<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Adapts a plain function into a [`JobHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Job) -> BoxedRun<'a> + Send + Sync,
{
    async fn run(&self, job: &mut Job) -> anyhow::Result<()> {
        (self.0)(job).await
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for jobs called `name`, replacing any previous
    /// registration.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registers a function returning a boxed future, e.g.
    /// `|job| Box::pin(async move { ... })`.
    pub fn define_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Job) -> BoxedRun<'a> + Send + Sync + 'static,
    {
        self.define(name, FnHandler(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_job: &mut Job) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_define_and_get() {
        let mut registry = Registry::new();
        registry
            .define_fn("email", |job| Box::pin(noop(job)))
            .define_fn("report", |job| Box::pin(noop(job)));

        assert!(registry.get("email").is_some());
        assert!(registry.get("Email").is_none());
        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["email", "report"]);

        // Redefining replaces rather than adds.
        registry.define_fn("email", |job| Box::pin(noop(job)));
        assert_eq!(registry.names().count(), 2);
    }
}
