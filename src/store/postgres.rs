use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::{Job, JobStatus};
use crate::models::record::{NewRecord, Record, RecordFilters, UpsertOutcome};
use crate::store::{JobStore, RecordSink, ABANDONED_MESSAGE};

/// Job store and record sink backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn submit(&self, payload: serde_json::Value) -> Result<Uuid, AppError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO scrape_jobs (id, payload, status, created_at) VALUES ($1, $2, $3, NOW()) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&payload)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Uses SELECT FOR UPDATE SKIP LOCKED so concurrent workers skip rows
    /// another transaction is already claiming.
    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, AppError> {
        let job = sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = $1, started_at = NOW(), deadline_at = NOW() + make_interval(secs => $3)
             WHERE id = (
                 SELECT id FROM scrape_jobs
                 WHERE status = $2
                 ORDER BY created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(JobStatus::Running.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn complete(&self, id: Uuid, count: i32) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE scrape_jobs SET status = $3, count = $2, completed_at = NOW() WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(count)
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.rejected(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE scrape_jobs SET status = $3, error = $2, failed_at = NOW() WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(error)
        .bind(JobStatus::Failed.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.rejected(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, AppError> {
        sqlx::query_as::<_, Job>("SELECT * FROM scrape_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM scrape_jobs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn fail_abandoned(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE scrape_jobs SET status = $2, error = $1, failed_at = NOW()
             WHERE status = $3 AND deadline_at < NOW()",
        )
        .bind(ABANDONED_MESSAGE)
        .bind(JobStatus::Failed.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), AppError> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

impl PgStore {
    /// Explain why a guarded terminal write matched no row.
    async fn rejected(&self, id: Uuid, next: JobStatus) -> AppError {
        let job = match self.get(id).await {
            Ok(job) => job,
            Err(e) => return e,
        };
        match job.status() {
            Ok(current) if !current.can_transition_to(next) => AppError::InvalidTransition(
                format!("cannot move job {id} from '{current}' to '{next}'"),
            ),
            Ok(current) => AppError::InvalidTransition(format!(
                "job {id} changed concurrently while moving from '{current}' to '{next}'"
            )),
            Err(e) => AppError::Internal(e),
        }
    }
}

#[async_trait]
impl RecordSink for PgStore {
    /// `ON CONFLICT` makes the find-or-insert a single statement; `first_seen`
    /// is left out of the update set so it is only ever written on insert.
    async fn upsert(&self, record: NewRecord) -> Result<UpsertOutcome, AppError> {
        let (inserted,): (bool,) = sqlx::query_as(
            "INSERT INTO listings (id, natural_key, title, url, price, raw_html, source, job_query, first_seen, scraped_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             ON CONFLICT (natural_key) DO UPDATE SET
                 title = EXCLUDED.title,
                 url = EXCLUDED.url,
                 price = EXCLUDED.price,
                 raw_html = EXCLUDED.raw_html,
                 source = EXCLUDED.source,
                 job_query = EXCLUDED.job_query,
                 scraped_at = EXCLUDED.scraped_at
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(Uuid::new_v4())
        .bind(record.key.natural_key())
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.price)
        .bind(&record.raw_html)
        .bind(&record.source)
        .bind(&record.job_query)
        .bind(record.scraped_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn list(&self, filters: &RecordFilters) -> Result<Vec<Record>, AppError> {
        let records = sqlx::query_as::<_, Record>(
            "SELECT * FROM listings WHERE ($1::text IS NULL OR source = $1) ORDER BY first_seen DESC LIMIT $2",
        )
        .bind(&filters.source)
        .bind(filters.effective_limit())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
