//! Execution leases.
//!
//! A lease is `lockedAt` on the persisted record plus a lifetime every worker
//! agrees on. The store is the only source of truth: nothing here holds an
//! in-process lock, because the workers competing for a job may live in
//! different processes.
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, trace};

use crate::error::{JobError, Result};
use crate::store::JobStore;
use crate::types::job::JobAttrs;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeaseManager {
    lifetime: TimeDelta,
}

impl LeaseManager {
    pub fn new(lifetime: TimeDelta) -> Self {
        Self { lifetime }
    }

    pub fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    /// Leases taken at or before this instant have expired by `now`.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lifetime)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Claims the job for this worker in one conditional store update.
    pub async fn acquire(
        &self,
        store: &dyn JobStore,
        attrs: &mut JobAttrs,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = attrs.id.ok_or(JobError::NotPersisted)?;

        let won = store
            .claim(id, attrs.next_run_at, now, self.stale_before(now))
            .await?;
        if !won {
            debug!(id, "lease already held");
            return Err(JobError::LeaseConflict(id));
        }

        attrs.locked_at = Some(now);
        trace!(id, "lease acquired");
        Ok(())
    }

    /// Refreshes a lease this worker holds. Fails with `LeaseConflict` if it
    /// expired and was taken by another worker, or was released.
    pub async fn renew(
        &self,
        store: &dyn JobStore,
        attrs: &mut JobAttrs,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = attrs.id.ok_or(JobError::NotPersisted)?;
        let held_since = attrs.locked_at.ok_or(JobError::LeaseConflict(id))?;

        if !store.renew(id, held_since, now).await? {
            debug!(id, %held_since, "lease lost before renewal");
            return Err(JobError::LeaseConflict(id));
        }

        attrs.locked_at = Some(now);
        trace!(id, "lease renewed");
        Ok(())
    }

    /// Gives up the lease. The local record is cleared even if the store
    /// call fails, so a retry is always a plain `release`.
    pub async fn release(
        &self,
        store: &dyn JobStore,
        attrs: &mut JobAttrs,
    ) -> Result<()> {
        attrs.locked_at = None;
        if let Some(id) = attrs.id {
            store.release(id).await?;
            trace!(id, "lease released");
        }
        Ok(())
    }

    pub fn is_leased(&self, attrs: &JobAttrs, now: DateTime<Utc>) -> bool {
        attrs
            .locked_at
            .is_some_and(|locked_at| locked_at > self.stale_before(now))
    }
}
