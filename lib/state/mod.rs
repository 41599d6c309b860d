use diesel_async::{pg::AsyncPgConnection, pooled_connection::deadpool::Pool};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::notify::NotificationGateway;

pub struct AppState {
    pub pool: Pool<AsyncPgConnection>,
    pub registry: RwLock<Registry>,
    pub shutdown_token: CancellationToken,
    pub gateway: Arc<NotificationGateway>,
}

impl AppState {
    pub fn new(
        pool: Pool<AsyncPgConnection>,
        registry: Registry,
        shutdown_token: CancellationToken,
        gateway: Arc<NotificationGateway>,
    ) -> Self {
        Self {
            pool,
            registry: RwLock::new(registry),
            shutdown_token,
            gateway,
        }
    }
}
