use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::worker;
use crate::notify::NotificationGateway;
use crate::queue::JobQueue;
use crate::ticket_service::store::TicketStore;
use crate::ticket_service::{PsaApi, TicketService};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker task joined with an error: {0}")]
    JoinError(String),
}

#[derive(Error, Debug)]
pub struct ShutdownError {
    errors: Vec<WorkerError>,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Errors during shutdown: {:?}", self.errors)
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<Result<(), WorkerError>>>,
}

impl WorkerPool {
    /// Spawns `num_workers` job consumers sharing one rate limiter, so the
    /// pool as a whole stays under the PSA API's request ceiling.
    pub fn new<P, S>(
        num_workers: usize,
        service: Arc<TicketService<P, S>>,
        queue: Arc<JobQueue>,
        gateway: Arc<NotificationGateway>,
        cancellation_token: CancellationToken,
    ) -> Self
    where
        P: PsaApi + 'static,
        S: TicketStore + 'static,
    {
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(5u32))));
        let workers = (0..num_workers)
            .map(|_| {
                let worker_service = service.clone();
                let worker_queue = queue.clone();
                let worker_gateway = gateway.clone();
                let worker_limiter = rate_limiter.clone();
                let worker_token = cancellation_token.clone();
                tokio::spawn(async move {
                    worker(
                        worker_service,
                        worker_queue,
                        worker_gateway,
                        worker_limiter,
                        worker_token,
                    )
                    .await
                })
            })
            .collect();
        Self { workers }
    }

    pub async fn wait_for_completion(self) -> Result<(), ShutdownError> {
        let mut errors = vec![];
        for handle in self.workers {
            match handle.await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(WorkerError::JoinError(e.to_string())),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { errors })
        }
    }
}
