use thiserror::Error;

use super::store::StoreError;
use crate::psa_client::error::PsaClientError;
use crate::queue::QueueError;

/// How the queue should treat a failed job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Genuine external failure: exponential backoff schedule.
    Backoff,
    /// Dependency not ready yet: flat short delay, the blocking job is
    /// expected to finish well within it.
    ShortDelay,
    /// Permanent validation failure: retries would fail identically.
    Terminal,
}

#[derive(Error, Debug)]
pub enum TicketServiceError {
    /// Synchronous read path could not reach the PSA system. The stale cache
    /// entry (if any) is deliberately not used as a fallback.
    #[error("could not fetch tickets from the PSA system")]
    SyncUnavailable(#[source] PsaClientError),

    #[error(transparent)]
    Psa(#[from] PsaClientError),

    /// The ticket this operation depends on still carries its negative
    /// sentinel ID; the creating job has not completed yet.
    #[error("ticket {0} is not yet confirmed by the PSA system")]
    DependencyNotReady(i64),

    #[error("no local ticket matching id {0}")]
    UnknownTicket(i64),

    #[error("no local user with id {0}")]
    UnknownUser(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl TicketServiceError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::DependencyNotReady(_) => RetryClass::ShortDelay,
            Self::SyncUnavailable(inner) | Self::Psa(inner) => {
                if inner.is_retryable() {
                    RetryClass::Backoff
                } else {
                    RetryClass::Terminal
                }
            }
            // Pool exhaustion and transient DB/queue errors recover on replay.
            Self::Store(_) | Self::Queue(_) => RetryClass::Backoff,
            Self::UnknownTicket(_) | Self::UnknownUser(_) => RetryClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class() != RetryClass::Terminal
    }
}
