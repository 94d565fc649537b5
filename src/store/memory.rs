//! In-process store used by tests in place of Postgres. A single mutex
//! around each collection gives the same atomicity as the guarded SQL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::{Job, JobStatus};
use crate::models::record::{NewRecord, Record, RecordFilters, UpsertOutcome};
use crate::store::{JobStore, RecordSink, ABANDONED_MESSAGE};

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<Job>>,
    records: Mutex<HashMap<String, Record>>,
    /// Every status written, in order, per job.
    history: Mutex<HashMap<Uuid, Vec<JobStatus>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn record(&self, natural_key: &str) -> Option<Record> {
        self.records.lock().unwrap().get(natural_key).cloned()
    }

    pub fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn record_transition(&self, id: Uuid, status: JobStatus) {
        self.history
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(status);
    }

    fn finish(
        &self,
        id: Uuid,
        next: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;
        let current = job.status().map_err(AppError::Internal)?;
        if current != JobStatus::Running || !current.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "cannot move job {id} from '{current}' to '{next}'"
            )));
        }
        job.status = next.to_string();
        apply(job);
        self.record_transition(id, next);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn submit(&self, payload: serde_json::Value) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        self.jobs.lock().unwrap().push(Job {
            id,
            payload,
            status: JobStatus::Pending.to_string(),
            count: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            deadline_at: None,
            completed_at: None,
            failed_at: None,
        });
        self.record_transition(id, JobStatus::Pending);
        Ok(id)
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, AppError> {
        let lease =
            chrono::Duration::from_std(lease).map_err(|e| AppError::Internal(e.to_string()))?;
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending.as_str())
            .min_by_key(|j| j.created_at);
        let Some(job) = next else {
            return Ok(None);
        };
        job.status = JobStatus::Running.to_string();
        job.started_at = Some(Utc::now());
        job.deadline_at = Some(Utc::now() + lease);
        let claimed = job.clone();
        self.record_transition(claimed.id, JobStatus::Running);
        Ok(Some(claimed))
    }

    async fn complete(&self, id: Uuid, count: i32) -> Result<(), AppError> {
        self.finish(id, JobStatus::Completed, |job| {
            job.count = Some(count);
            job.completed_at = Some(Utc::now());
        })
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        self.finish(id, JobStatus::Failed, |job| {
            job.error = Some(error.to_string());
            job.failed_at = Some(Utc::now());
        })
    }

    async fn get(&self, id: Uuid) -> Result<Job, AppError> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        let mut jobs = self.jobs.lock().unwrap().clone();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn fail_abandoned(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let mut failed = 0;
        for job in jobs.iter_mut() {
            let stale = job.status == JobStatus::Running.as_str()
                && job.deadline_at.is_some_and(|t| t <= now);
            if stale {
                job.status = JobStatus::Failed.to_string();
                job.error = Some(ABANDONED_MESSAGE.to_string());
                job.failed_at = Some(Utc::now());
                self.record_transition(job.id, JobStatus::Failed);
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn upsert(&self, record: NewRecord) -> Result<UpsertOutcome, AppError> {
        let key = record.key.natural_key();
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&key) {
            Some(existing) => {
                existing.title = record.title;
                existing.url = record.url;
                existing.price = record.price;
                existing.raw_html = record.raw_html;
                existing.source = record.source;
                existing.job_query = record.job_query;
                existing.scraped_at = record.scraped_at;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                records.insert(
                    key.clone(),
                    Record {
                        id: Uuid::new_v4(),
                        natural_key: key,
                        title: record.title,
                        url: record.url,
                        price: record.price,
                        raw_html: record.raw_html,
                        source: record.source,
                        job_query: record.job_query,
                        first_seen: record.scraped_at,
                        scraped_at: record.scraped_at,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn list(&self, filters: &RecordFilters) -> Result<Vec<Record>, AppError> {
        let mut records: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| filters.source.as_ref().is_none_or(|s| &r.source == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        records.truncate(filters.effective_limit() as usize);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::RecordKey;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    fn listing(title: &str, price: &str) -> NewRecord {
        NewRecord {
            key: RecordKey::Link("https://example.test/item/1".to_string()),
            title: Some(title.to_string()),
            url: Some("https://example.test/item/1".to_string()),
            price: Some(price.to_string()),
            raw_html: None,
            source: "https://example.test".to_string(),
            job_query: None,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_same_key_keeps_one_record_and_first_seen() {
        let store = MemoryStore::new();

        let first = listing("Old title", "$10");
        let first_seen = first.scraped_at;
        assert_eq!(store.upsert(first).await.unwrap(), UpsertOutcome::Inserted);

        let second = listing("New title", "$12");
        let second_scraped = second.scraped_at;
        assert_eq!(store.upsert(second).await.unwrap(), UpsertOutcome::Updated);

        let records = store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.title.as_deref(), Some("New title"));
        assert_eq!(record.price.as_deref(), Some("$12"));
        assert_eq!(record.first_seen, first_seen);
        assert_eq!(record.scraped_at, second_scraped);
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_first() {
        let store = MemoryStore::new();
        let first = store.submit(json!({ "n": 1 })).await.unwrap();
        let second = store.submit(json!({ "n": 2 })).await.unwrap();

        let claimed = store.claim_next(LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, "running");
        assert!(claimed.started_at.is_some());

        let claimed = store.claim_next(LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, second);

        assert!(store.claim_next(LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_writes_require_running() {
        let store = MemoryStore::new();
        let id = store.submit(json!({})).await.unwrap();

        let err = store.complete(id, 3).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        store.claim_next(LEASE).await.unwrap();
        store.complete(id, 3).await.unwrap();

        let err = store.fail(id, "late failure").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        let err = store.complete(id, 4).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.count, Some(3));
        assert!(job.error.is_none());
        assert_eq!(
            store.history(id),
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn only_jobs_past_their_own_deadline_are_abandoned() {
        let store = MemoryStore::new();
        let expired = store.submit(json!({})).await.unwrap();
        let long_lease = store.submit(json!({})).await.unwrap();
        let pending = store.submit(json!({})).await.unwrap();

        store.claim_next(Duration::ZERO).await.unwrap();
        let claimed = store.claim_next(Duration::from_secs(3600)).await.unwrap().unwrap();
        assert_eq!(claimed.id, long_lease);
        assert!(claimed.deadline_at.unwrap() > claimed.started_at.unwrap());

        assert_eq!(store.fail_abandoned().await.unwrap(), 1);

        let job = store.get(expired).await.unwrap();
        assert_eq!(job.status, "failed");
        assert_eq!(job.error.as_deref(), Some(ABANDONED_MESSAGE));
        assert_eq!(store.get(long_lease).await.unwrap().status, "running");
        assert_eq!(store.get(pending).await.unwrap().status, "pending");

        store.complete(long_lease, 1).await.unwrap();
    }
}
