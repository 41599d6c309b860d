//! Periodic refresh of the technician lookup table.
//!
//! The PSA resource list changes rarely, so it is mirrored wholesale on an
//! interval instead of being fetched during sync. Assignee enrichment and
//! note-author classification read from the mirrored table.

use log::{error, info};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::models::Technician;
use crate::psa_client::types::PsaResource;
use crate::ticket_service::error::TicketServiceError;
use crate::ticket_service::store::TicketStore;
use crate::ticket_service::PsaApi;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Resources without both name parts are integration accounts or
/// placeholders; they never appear as message authors or assignees.
fn to_technician(resource: PsaResource) -> Option<Technician> {
    let first = resource.first_name?;
    let last = resource.last_name?;
    Some(Technician {
        id: resource.id,
        full_name: format!("{first} {last}"),
        email: resource.email_address,
        is_active: resource.is_active,
    })
}

pub struct TechnicianRefresher<P, S>
where
    P: PsaApi,
    S: TicketStore,
{
    psa: P,
    store: S,
}

impl<P, S> TechnicianRefresher<P, S>
where
    P: PsaApi,
    S: TicketStore,
{
    pub fn new(psa: P, store: S) -> Self {
        Self { psa, store }
    }

    pub async fn refresh(&self) -> Result<usize, TicketServiceError> {
        let resources = self.psa.query_resources().await?;
        let rows: Vec<Technician> = resources.into_iter().filter_map(to_technician).collect();
        let count = self.store.upsert_technicians(rows).await?;
        info!("technician table refreshed: {count} rows");
        Ok(count)
    }

    /// Refreshes immediately, then on every interval tick until cancelled.
    pub async fn run_periodic(self, cancel_token: CancellationToken) {
        loop {
            if let Err(e) = self.refresh().await {
                error!("technician refresh failed: {e}");
            }
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("technician refresher stopping");
                    return;
                }
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ticket_service::test_support::{MemoryStore, MockPsa};

    fn resource(
        id: i64,
        first: Option<&str>,
        last: Option<&str>,
        active: bool,
    ) -> PsaResource {
        PsaResource {
            id,
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            email_address: Some(format!("r{id}@example.com")),
            is_active: active,
        }
    }

    #[tokio::test]
    async fn refresh_mirrors_named_resources_only() {
        let psa = Arc::new(MockPsa::new());
        let store = Arc::new(MemoryStore::new());
        psa.script_resource_query(Ok(vec![
            resource(555, Some("Jane"), Some("Smith"), true),
            resource(556, None, Some("API"), true),
            resource(557, Some("Orphaned"), None, false),
            resource(558, Some("Former"), Some("Employee"), false),
        ]));

        let refresher = TechnicianRefresher::new(psa, store.clone());
        let count = refresher.refresh().await.unwrap();

        assert_eq!(count, 2);
        let technicians = store.technicians.lock().unwrap();
        assert_eq!(technicians[&555].full_name, "Jane Smith");
        assert_eq!(technicians[&555].email.as_deref(), Some("r555@example.com"));
        assert!(!technicians[&558].is_active);
        assert!(!technicians.contains_key(&556));
    }

    #[tokio::test]
    async fn refresh_propagates_psa_failure() {
        let psa = Arc::new(MockPsa::new());
        let store = Arc::new(MemoryStore::new());
        psa.script_resource_query(Err(
            crate::ticket_service::test_support::transient_psa_error(),
        ));

        let refresher = TechnicianRefresher::new(psa, store);
        assert!(refresher.refresh().await.is_err());
    }
}
