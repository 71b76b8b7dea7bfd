use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::lease::LeaseManager;
use crate::registry::Registry;
use crate::store::JobStore;

/// What every job handled by one worker shares: where records live, what
/// runs them, and how leases behave.
pub struct JobContext {
    store: Arc<dyn JobStore>,
    registry: Registry,
    lease: LeaseManager,
    worker_name: Option<String>,
    shutdown: CancellationToken,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Registry,
        settings: Settings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            lease: LeaseManager::new(settings.lease_lifetime),
            worker_name: settings.worker_name,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    /// Cancels every job created from this context, e.g. at shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// A fresh cancellation token for one job, tied to this context's
    /// shutdown.
    pub(crate) fn job_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
