pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::Job;
use crate::models::record::{NewRecord, Record, RecordFilters, UpsertOutcome};

pub use postgres::PgStore;

/// Durable job documents and their status state machine.
///
/// Every write is a single conditional statement so concurrent workers
/// never observe or claim the same job twice.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job. The payload is not validated here.
    async fn submit(&self, payload: serde_json::Value) -> Result<Uuid, AppError>;

    /// Atomically move the oldest pending job to running and return it. The
    /// claimer must finish it within `lease`, which is stamped as `deadline_at`.
    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, AppError>;

    /// running -> completed. Fails with `InvalidTransition` otherwise.
    async fn complete(&self, id: Uuid, count: i32) -> Result<(), AppError>;

    /// running -> failed. Fails with `InvalidTransition` otherwise.
    async fn fail(&self, id: Uuid, error: &str) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Job, AppError>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, AppError>;

    /// Fail running jobs whose `deadline_at` has passed, e.g. left by a
    /// crashed worker.
    async fn fail_abandoned(&self) -> Result<u64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// Scraped records deduplicated by natural key.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert or overwrite the record for `record.key`, never touching `first_seen`
    /// once set.
    async fn upsert(&self, record: NewRecord) -> Result<UpsertOutcome, AppError>;

    async fn list(&self, filters: &RecordFilters) -> Result<Vec<Record>, AppError>;
}

pub(crate) const ABANDONED_MESSAGE: &str = "abandoned: worker did not finish before its deadline";
