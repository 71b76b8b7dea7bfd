//! The persistence boundary, and an in-memory store honouring it.
//!
//! A store is shared by every worker process polling the same job pool, so
//! every conditional operation here (`claim`, `renew`, `upsert`) must be a
//! single atomic step in the backend.
use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::StoreError;
use crate::types::job::{JobAttrs, UniqueQuery};

/// How `upsert` treats a record that already matches the filter. In every
/// mode the existing record keeps its id and its `lockedAt`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpsertMode {
    /// Overwrite the record's attributes.
    Replace,
    /// Leave the record as it is.
    InsertOnly,
    /// Overwrite everything but `nextRunAt`.
    PreserveNextRunAt,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new record, returning it with its assigned id.
    async fn insert(&self, attrs: &JobAttrs) -> Result<JobAttrs, StoreError>;

    /// Overwrites the record with the same id.
    async fn update(&self, attrs: &JobAttrs) -> Result<JobAttrs, StoreError>;

    /// Updates the record matching every constraint in `filter` according to
    /// `mode`, or inserts `attrs` if none matches.
    async fn upsert(
        &self,
        filter: &UniqueQuery,
        attrs: &JobAttrs,
        mode: UpsertMode,
    ) -> Result<JobAttrs, StoreError>;

    /// Sets `lockedAt = now` if, and only if, the record exists, isn't
    /// disabled, still has `nextRunAt == expected_next_run_at`, and is either
    /// unlocked and due or locked no later than `stale_before`.
    async fn claim(
        &self,
        id: u64,
        expected_next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Moves `lockedAt` from `held_since` to `now`, failing if the lease
    /// has since been released or taken by someone else.
    async fn renew(
        &self,
        id: u64,
        held_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clears `lockedAt` unconditionally.
    async fn release(&self, id: u64) -> Result<(), StoreError>;

    /// Deletes a record, returning whether it existed.
    async fn remove(&self, id: u64) -> Result<bool, StoreError>;

    async fn get(&self, id: u64) -> Result<Option<JobAttrs>, StoreError>;

    /// Lists up to `limit` records eligible for claiming: not disabled, and
    /// either unlocked with `nextRunAt <= now` or locked no later than
    /// `stale_before`. Ordered by `nextRunAt`, then highest priority first.
    async fn due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobAttrs>, StoreError>;
}

/// Looks up a dotted path such as `data.to` in a serialised record.
fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

fn matches(attrs: &JobAttrs, filter: &UniqueQuery) -> Result<bool, StoreError> {
    let value = serde_json::to_value(attrs)?;
    Ok(filter
        .iter()
        .all(|(path, expected)| lookup(&value, path) == Some(expected)))
}

fn is_claimable(
    attrs: &JobAttrs,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> bool {
    match attrs.locked_at {
        _ if attrs.disabled => false,
        None => attrs.is_due(now),
        Some(locked_at) => locked_at <= stale_before,
    }
}

#[derive(Debug, Default)]
struct Inner {
    last_id: u64,
    jobs: BTreeMap<u64, JobAttrs>,
}

impl Inner {
    fn insert(&mut self, attrs: &JobAttrs) -> JobAttrs {
        self.last_id += 1;
        let record = JobAttrs {
            id: Some(self.last_id),
            ..attrs.clone()
        };
        self.jobs.insert(self.last_id, record.clone());
        record
    }
}

/// Keeps every record in a single process's memory. Atomicity comes from
/// holding one lock for the duration of each operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, attrs: &JobAttrs) -> Result<JobAttrs, StoreError> {
        let record = self.inner.lock().await.insert(attrs);
        trace!(id = record.id, name = %record.name, "inserted");
        Ok(record)
    }

    async fn update(&self, attrs: &JobAttrs) -> Result<JobAttrs, StoreError> {
        let id = attrs.id.ok_or(StoreError::NotFound(0))?;
        let mut inner = self.inner.lock().await;
        let record = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        *record = attrs.clone();
        trace!(id, "updated");
        Ok(record.clone())
    }

    async fn upsert(
        &self,
        filter: &UniqueQuery,
        attrs: &JobAttrs,
        mode: UpsertMode,
    ) -> Result<JobAttrs, StoreError> {
        let mut inner = self.inner.lock().await;

        let mut found = None;
        for (id, record) in inner.jobs.iter() {
            if matches(record, filter)? {
                found = Some(*id);
                break;
            }
        }

        let Some(id) = found else {
            let record = inner.insert(attrs);
            trace!(id = record.id, ?mode, "upsert inserted");
            return Ok(record);
        };

        let record = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let next_run_at = record.next_run_at;
        match mode {
            UpsertMode::InsertOnly => {},
            UpsertMode::Replace | UpsertMode::PreserveNextRunAt => {
                *record = JobAttrs {
                    id: Some(id),
                    locked_at: record.locked_at,
                    ..attrs.clone()
                };
                if mode == UpsertMode::PreserveNextRunAt {
                    record.next_run_at = next_run_at;
                }
            },
        }
        trace!(id, ?mode, "upsert matched");
        Ok(record.clone())
    }

    async fn claim(
        &self,
        id: u64,
        expected_next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };

        if record.next_run_at != expected_next_run_at
            || !is_claimable(record, now, stale_before)
        {
            return Ok(false);
        }

        record.locked_at = Some(now);
        Ok(true)
    }

    async fn renew(
        &self,
        id: u64,
        held_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(record) if record.locked_at == Some(held_since) => {
                record.locked_at = Some(now);
                Ok(true)
            },
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn release(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // The record may have been removed while it ran; nothing to release.
        if let Some(record) = inner.jobs.get_mut(&id) {
            record.locked_at = None;
        }
        Ok(())
    }

    async fn remove(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.jobs.remove(&id).is_some())
    }

    async fn get(&self, id: u64) -> Result<Option<JobAttrs>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobAttrs>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|attrs| is_claimable(attrs, now, stale_before))
            .sorted_by_key(|attrs| {
                (
                    attrs.next_run_at.is_none(),
                    attrs.next_run_at,
                    Reverse(attrs.priority),
                )
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
