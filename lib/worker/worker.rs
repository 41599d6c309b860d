use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::NotKeyed;
use governor::RateLimiter;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::notify::{
    sync_finished_channel, ticket_finalized_channel, FinalizedTicketPayload, NotificationGateway,
    SyncFinishedPayload,
};
use crate::psa_client::error::PsaClientError;
use crate::queue::{Job, JobEnvelope, JobQueue, QueueError};
use crate::server::monitoring::WORKER_METRICS;
use crate::ticket_service::error::{RetryClass, TicketServiceError};
use crate::ticket_service::store::TicketStore;
use crate::ticket_service::{PsaApi, TicketService};

use super::pool::WorkerError;

/// Flat delay for jobs blocked on a sibling job that has not finished yet.
/// The blocking job normally completes within a couple of seconds.
pub const DEPENDENCY_RETRY_DELAY_MS: u64 = 2_000;

/// Poll interval when the pending list comes back empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn worker<P, S>(
    service: Arc<TicketService<P, S>>,
    queue: Arc<JobQueue>,
    gateway: Arc<NotificationGateway>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    cancel_token: CancellationToken,
) -> Result<(), WorkerError>
where
    P: PsaApi,
    S: TicketStore,
{
    while !cancel_token.is_cancelled() {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Worker received cancellation signal");
                break;
            }
            popped = queue.pop() => match popped {
                Ok(Some(envelope)) => {
                    rate_limiter.until_ready().await;
                    // On a queue error the claim stays on the processing
                    // list for startup recovery; the worker keeps running.
                    if let Err(e) = process_envelope(&service, &queue, &gateway, envelope).await {
                        error!("Failed to record job outcome: {e}");
                        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
                Err(e) => {
                    error!("Failed to pop job from queue: {e}");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }
    Ok(())
}

async fn process_envelope<P, S>(
    service: &TicketService<P, S>,
    queue: &JobQueue,
    gateway: &NotificationGateway,
    envelope: JobEnvelope,
) -> Result<(), QueueError>
where
    P: PsaApi,
    S: TicketStore,
{
    let started = Instant::now();
    let job_id = envelope.id.clone();

    match execute_job(service, gateway, envelope.job.clone()).await {
        Ok(()) => {
            info!(
                "job {job_id} completed in {:.2}s",
                started.elapsed().as_secs_f64()
            );
            if let Some(metrics) = WORKER_METRICS.get() {
                metrics.jobs_processed.inc();
            }
        }
        Err(e) => {
            log_job_failure(&job_id, &e, started.elapsed());
            handle_failure(queue, envelope.clone(), &e).await?;
        }
    }

    // Release the processing-list claim only once the outcome is recorded.
    queue.ack(&envelope).await
}

/// Executes one job against the ticket service and publishes the completion
/// events the WebSocket layer relays.
pub(crate) async fn execute_job<P, S>(
    service: &TicketService<P, S>,
    gateway: &NotificationGateway,
    job: Job,
) -> Result<(), TicketServiceError>
where
    P: PsaApi,
    S: TicketStore,
{
    match job {
        Job::CreateTicket {
            local_ticket_id,
            contact_id,
            company_id,
            title,
            description,
            user_id,
        } => {
            let external_id = service
                .create_in_external(contact_id, company_id, title, description)
                .await?;
            let ticket = service
                .finalize_ticket_creation(local_ticket_id, external_id)
                .await?;
            gateway.publish(
                ticket_finalized_channel(user_id),
                &FinalizedTicketPayload::from(&ticket),
            );
            Ok(())
        }
        Job::SyncUser {
            user_id,
            contact_id,
            company_id,
        } => {
            let started = Instant::now();
            let result = service
                .sync_tickets_and_messages_for_user(user_id, contact_id, company_id)
                .await;
            if let (Ok(outcome), Some(metrics)) = (&result, WORKER_METRICS.get()) {
                metrics.tickets_synced.inc_by(outcome.tickets_synced as u64);
                metrics.messages_upserted.inc_by(outcome.messages_upserted as u64);
            }
            gateway.publish(
                sync_finished_channel(user_id),
                &SyncFinishedPayload {
                    success: result.is_ok(),
                    duration_seconds: started.elapsed().as_secs_f64(),
                    finished_at: chrono::Utc::now(),
                },
            );
            result.map(|_| ())
        }
        Job::CreateNote {
            local_ticket_id,
            contact_id,
            user_id,
            content,
        } => {
            service
                .create_note_for_ticket(local_ticket_id, contact_id, user_id, content)
                .await
        }
    }
}

fn log_job_failure(job_id: &str, error: &TicketServiceError, elapsed: Duration) {
    // The PSA API puts the useful diagnostics in the response body, which the
    // error message alone does not carry.
    match error {
        TicketServiceError::Psa(PsaClientError::UnexpectedStatus { resource, status, body })
        | TicketServiceError::SyncUnavailable(PsaClientError::UnexpectedStatus {
            resource,
            status,
            body,
        }) => {
            error!(
                "job {job_id} failed after {:.2}s: PSA {resource} returned {status}: {body}",
                elapsed.as_secs_f64()
            );
        }
        _ => {
            error!(
                "job {job_id} failed after {:.2}s: {error}",
                elapsed.as_secs_f64()
            );
        }
    }
}

async fn handle_failure(
    queue: &JobQueue,
    envelope: JobEnvelope,
    error: &TicketServiceError,
) -> Result<(), QueueError> {
    let job_id = envelope.id.clone();
    let rescheduled = match error.retry_class() {
        RetryClass::Terminal => {
            queue.fail(&envelope).await?;
            false
        }
        RetryClass::ShortDelay => {
            queue
                .retry_with_delay(envelope, DEPENDENCY_RETRY_DELAY_MS)
                .await?
        }
        RetryClass::Backoff => queue.retry(envelope).await?,
    };

    if rescheduled {
        warn!("job {job_id} rescheduled for retry");
        if let Some(metrics) = WORKER_METRICS.get() {
            metrics.jobs_retried.inc();
        }
    } else {
        error!("job {job_id} moved to the failed list");
        if let Some(metrics) = WORKER_METRICS.get() {
            metrics.jobs_failed.inc();
        }
    }
    Ok(())
}
