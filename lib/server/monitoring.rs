use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct WorkerMetrics {
    pub jobs_processed: Counter,
    pub jobs_retried: Counter,
    pub jobs_failed: Counter,
    pub tickets_synced: Counter,
    pub messages_upserted: Counter,
}

impl WorkerMetrics {
    fn init() -> Self {
        Self {
            jobs_processed: Counter::default(),
            jobs_retried: Counter::default(),
            jobs_failed: Counter::default(),
            tickets_synced: Counter::default(),
            messages_upserted: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::init();

        registry.register(
            "jobs_processed",
            "Total number of jobs completed successfully",
            metrics.jobs_processed.clone(),
        );
        registry.register(
            "jobs_retried",
            "Total number of job attempts rescheduled for retry",
            metrics.jobs_retried.clone(),
        );
        registry.register(
            "jobs_failed",
            "Total number of jobs moved to the failed list",
            metrics.jobs_failed.clone(),
        );
        registry.register(
            "tickets_synced",
            "Total number of tickets written by delta sync",
            metrics.tickets_synced.clone(),
        );
        registry.register(
            "messages_upserted",
            "Total number of ticket messages written by delta sync",
            metrics.messages_upserted.clone(),
        );

        metrics
    }
}

pub static WORKER_METRICS: OnceCell<WorkerMetrics> = OnceCell::const_new();
