use deadpool_redis::{Config, Pool, Runtime};
use futures::future::BoxFuture;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Failed to parse job data: {0}")]
    Parse(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Closed set of asynchronous operations the pipeline performs against the
/// PSA system. Workers dispatch on this exhaustively; there is no
/// stringly-typed job name beyond the serde tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Job {
    CreateTicket {
        local_ticket_id: i64,
        contact_id: i64,
        company_id: i64,
        title: String,
        description: String,
        user_id: i64,
    },
    SyncUser {
        user_id: i64,
        contact_id: i64,
        company_id: i64,
    },
    CreateNote {
        /// Local surrogate id, stable across sentinel finalization. The
        /// external id may be swapped between enqueue and execution.
        local_ticket_id: i64,
        contact_id: i64,
        user_id: i64,
        content: String,
    },
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Durable wrapper around a [`Job`] carrying its retry bookkeeping.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    pub id: String,
    pub job: Job,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job,
            attempts_made: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        }
    }
}

/// Exponential backoff: `base * 2^attempts_made`, shift capped so the
/// arithmetic can't overflow under a runaway attempt counter.
pub fn backoff_delay_ms(base_ms: u64, attempts_made: u32) -> u64 {
    let shift = attempts_made.min(20);
    base_ms.saturating_mul(1u64 << shift)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Producer seam so the ticket service can enqueue without knowing the
/// broker, and tests can record enqueued jobs in memory.
pub trait JobSink: Send + Sync {
    fn enqueue<'a>(&'a self, envelope: JobEnvelope) -> BoxFuture<'a, Result<(), QueueError>>;
}

/// Redis-backed durable queue with at-least-once delivery.
///
/// Four keys per queue name: a pending list (LPUSH/RPOPLPUSH), a processing
/// list holding claimed envelopes until they are acked, a delayed zset
/// scored by due time for retry backoff, and a failed list holding envelopes
/// whose attempts are exhausted. Delayed members are promoted back onto the
/// pending list on `pop`; envelopes stranded on the processing list by a
/// crash are recovered at startup.
pub struct JobQueue {
    pool: Pool,
    pending_key: String,
    processing_key: String,
    delayed_key: String,
    failed_key: String,
}

impl JobQueue {
    pub async fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Other(e.to_string()))?;

        Ok(Self {
            pool,
            pending_key: format!("{queue_name}:pending"),
            processing_key: format!("{queue_name}:processing"),
            delayed_key: format!("{queue_name}:delayed"),
            failed_key: format!("{queue_name}:failed"),
        })
    }

    fn serialize(envelope: &JobEnvelope) -> Result<String, QueueError> {
        serde_json::to_string(envelope).map_err(|e| QueueError::Parse(e.to_string()))
    }

    fn parse(raw: &str) -> Result<JobEnvelope, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Parse(e.to_string()))
    }

    pub async fn push(&self, envelope: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        conn.lpush::<_, _, ()>(&self.pending_key, Self::serialize(envelope)?)
            .await?;
        Ok(())
    }

    /// Moves due delayed envelopes back onto the pending list.
    ///
    /// ZREM-then-LPUSH is not atomic; a crash in between loses at most the
    /// promotion, and a concurrent promoter pushing the same member twice is
    /// absorbed by idempotent job handling downstream.
    async fn promote_due(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let due: Vec<String> = conn
            .zrangebyscore_limit(&self.delayed_key, 0f64, now_ms() as f64, 0, 16)
            .await?;

        for member in due {
            let removed: i64 = conn.zrem(&self.delayed_key, &member).await?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(&self.pending_key, &member).await?;
            }
        }
        Ok(())
    }

    /// Claims the next pending envelope, parking it on the processing list
    /// until `ack` records its outcome. A crash between pop and ack leaves
    /// the envelope there for `recover_stalled` instead of losing it.
    pub async fn pop(&self) -> Result<Option<JobEnvelope>, QueueError> {
        self.promote_due().await?;
        let mut conn = self.pool.get().await?;
        let result: Option<String> = conn
            .rpoplpush(&self.pending_key, &self.processing_key)
            .await?;
        result.map(|raw| Self::parse(&raw)).transpose()
    }

    /// Releases a claimed envelope once its outcome is recorded (completed,
    /// rescheduled or moved to the failed list). Must be called with the
    /// envelope exactly as popped; serde field order keeps the serialized
    /// form byte-stable for the LREM match.
    pub async fn ack(&self, envelope: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn
            .lrem(&self.processing_key, 1, Self::serialize(envelope)?)
            .await?;
        Ok(())
    }

    /// Requeues envelopes left on the processing list by a crashed worker.
    /// Run once at startup, before workers begin popping.
    pub async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut conn = self.pool.get().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.pending_key)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Requeues a failed envelope with exponential backoff, or moves it to
    /// the failed list when its attempts are exhausted. Returns whether the
    /// job will run again.
    pub async fn retry(&self, mut envelope: JobEnvelope) -> Result<bool, QueueError> {
        let delay_ms = backoff_delay_ms(envelope.backoff_base_ms, envelope.attempts_made);
        envelope.attempts_made += 1;
        if envelope.attempts_made >= envelope.max_attempts {
            self.fail(&envelope).await?;
            return Ok(false);
        }
        self.schedule(&envelope, delay_ms).await?;
        Ok(true)
    }

    /// Requeues with a fixed delay, bypassing the exponential schedule.
    /// Used for not-yet-ready dependencies, which clear on their own.
    pub async fn retry_with_delay(
        &self,
        mut envelope: JobEnvelope,
        delay_ms: u64,
    ) -> Result<bool, QueueError> {
        envelope.attempts_made += 1;
        if envelope.attempts_made >= envelope.max_attempts {
            self.fail(&envelope).await?;
            return Ok(false);
        }
        self.schedule(&envelope, delay_ms).await?;
        Ok(true)
    }

    async fn schedule(&self, envelope: &JobEnvelope, delay_ms: u64) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let due_at = now_ms().saturating_add(delay_ms) as f64;
        conn.zadd::<_, _, _, ()>(&self.delayed_key, Self::serialize(envelope)?, due_at)
            .await?;
        Ok(())
    }

    /// Terminal parking spot: failed envelopes are kept for triage but never
    /// retried automatically.
    pub async fn fail(&self, envelope: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        conn.lpush::<_, _, ()>(&self.failed_key, Self::serialize(envelope)?)
            .await?;
        Ok(())
    }
}

impl JobSink for JobQueue {
    fn enqueue<'a>(&'a self, envelope: JobEnvelope) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move { self.push(&envelope).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_tag_matches_queue_job_names() {
        let job = Job::CreateTicket {
            local_ticket_id: 1,
            contact_id: 2,
            company_id: 3,
            title: "t".to_string(),
            description: "d".to_string(),
            user_id: 4,
        };
        let raw = serde_json::to_value(&job).unwrap();
        assert_eq!(raw["type"], "create-ticket");

        let job = Job::SyncUser {
            user_id: 4,
            contact_id: 2,
            company_id: 3,
        };
        assert_eq!(serde_json::to_value(&job).unwrap()["type"], "sync-user");

        let job = Job::CreateNote {
            local_ticket_id: 5,
            contact_id: 2,
            user_id: 4,
            content: "hi".to_string(),
        };
        assert_eq!(serde_json::to_value(&job).unwrap()["type"], "create-note");
    }

    #[test]
    fn envelope_serialization_is_byte_stable() {
        // `ack` removes the claimed envelope with an LREM on its serialized
        // form, so parse-then-serialize must reproduce the exact string.
        let envelope = JobEnvelope::new(Job::CreateNote {
            local_ticket_id: 5,
            contact_id: 2,
            user_id: 4,
            content: "hi".to_string(),
        });

        let raw = JobQueue::serialize(&envelope).unwrap();
        let reparsed = JobQueue::parse(&raw).unwrap();
        assert_eq!(JobQueue::serialize(&reparsed).unwrap(), raw);
    }

    #[test]
    fn envelope_round_trips_with_attempt_state() {
        let mut envelope = JobEnvelope::new(Job::SyncUser {
            user_id: 1,
            contact_id: 2,
            company_id: 3,
        });
        envelope.attempts_made = 2;

        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: JobEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_ms(2_000, 0), 2_000);
        assert_eq!(backoff_delay_ms(2_000, 1), 4_000);
        assert_eq!(backoff_delay_ms(2_000, 2), 8_000);
    }

    #[test]
    fn backoff_shift_is_capped() {
        // A corrupted attempt counter must not overflow the delay arithmetic.
        assert_eq!(backoff_delay_ms(2_000, 63), 2_000 * (1 << 20));
    }

    #[test]
    fn new_envelope_defaults() {
        let envelope = JobEnvelope::new(Job::SyncUser {
            user_id: 1,
            contact_id: 2,
            company_id: 3,
        });
        assert_eq!(envelope.attempts_made, 0);
        assert_eq!(envelope.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(envelope.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
    }
}
