pub mod error;
pub mod types;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::PsaCredentials;
use error::PsaClientError;
use types::{
    CreateResponse, FilterClause, NewPsaNote, NewPsaTicket, PsaNote, PsaResource, PsaTicket,
    PsaTimeEntry, QueryResponse, SingleItemResponse,
};

/// Upper bound on the number of ticket IDs a single batched `in` query may
/// carry. Note/time-entry sync chunks its ticket sets to this size.
pub const MAX_BATCH_QUERY_IDS: usize = 20;

pub struct PsaClient {
    /// TODO: Make this a connection pool if it becomes a bottleneck!
    client: reqwest::Client,
    base_url: String,
    credentials: PsaCredentials,
}

impl PsaClient {
    pub fn new(base_url: String, credentials: PsaCredentials) -> Result<Self, PsaClientError> {
        let client = reqwest::Client::new();
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap, PsaClientError> {
        let mut headers = HeaderMap::new();
        let to_value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|_| PsaClientError::ConnectError("invalid credential header".into()))
        };
        headers.insert("ApiIntegrationCode", to_value(&self.credentials.integration_code)?);
        headers.insert("UserName", to_value(&self.credentials.username)?);
        headers.insert("Secret", to_value(&self.credentials.secret)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PsaClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PsaClientError::UnexpectedStatus {
                resource: resource.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    fn filter_body(clauses: Vec<FilterClause>) -> serde_json::Value {
        json!({ "filter": clauses })
    }

    /// All tickets scoped to one `(company, contact)` pair. Not delta-filtered
    /// server-side: message sync needs the full member set.
    pub async fn query_tickets(
        &self,
        company_id: i64,
        contact_id: i64,
    ) -> Result<Vec<PsaTicket>, PsaClientError> {
        let body = Self::filter_body(vec![
            FilterClause::eq("CompanyID", company_id),
            FilterClause::eq("ContactID", contact_id),
        ]);
        let response: QueryResponse<PsaTicket> =
            self.post_json("tickets query", "/Tickets/query", &body).await?;
        Ok(response.items)
    }

    pub async fn get_ticket(&self, ticket_id: i64) -> Result<PsaTicket, PsaClientError> {
        let url = format!("{}/Tickets/{}", self.base_url, ticket_id);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PsaClientError::UnexpectedStatus {
                resource: format!("ticket {ticket_id}"),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let single = response.json::<SingleItemResponse<PsaTicket>>().await?;
        Ok(single.item)
    }

    /// Creates a ticket and returns the PSA-assigned permanent ID.
    pub async fn create_ticket(&self, new_ticket: &NewPsaTicket) -> Result<i64, PsaClientError> {
        let body = serde_json::to_value(new_ticket)?;
        let response: CreateResponse = self.post_json("ticket create", "/Tickets", &body).await?;
        Ok(response.item_id)
    }

    pub async fn create_note(&self, new_note: &NewPsaNote) -> Result<i64, PsaClientError> {
        let body = serde_json::to_value(new_note)?;
        let path = format!("/Tickets/{}/Notes", new_note.ticket_id);
        let response: CreateResponse = self.post_json("note create", &path, &body).await?;
        Ok(response.item_id)
    }

    /// All notes for a batch of tickets in one round trip.
    pub async fn query_notes(&self, ticket_ids: &[i64]) -> Result<Vec<PsaNote>, PsaClientError> {
        debug_assert!(ticket_ids.len() <= MAX_BATCH_QUERY_IDS);
        let body = Self::filter_body(vec![FilterClause::in_ids("TicketID", ticket_ids)]);
        let response: QueryResponse<PsaNote> = self
            .post_json("notes query", "/TicketNotes/query", &body)
            .await?;
        Ok(response.items)
    }

    /// All time entries for a batch of tickets in one round trip.
    pub async fn query_time_entries(
        &self,
        ticket_ids: &[i64],
    ) -> Result<Vec<PsaTimeEntry>, PsaClientError> {
        debug_assert!(ticket_ids.len() <= MAX_BATCH_QUERY_IDS);
        let body = Self::filter_body(vec![FilterClause::in_ids("TicketID", ticket_ids)]);
        let response: QueryResponse<PsaTimeEntry> = self
            .post_json("time entries query", "/TimeEntries/query", &body)
            .await?;
        Ok(response.items)
    }

    /// Full resource dump used by the technician refresher.
    pub async fn query_resources(&self) -> Result<Vec<PsaResource>, PsaClientError> {
        let body = json!({
            "filter": [FilterClause { op: "gt", field: "id", value: json!(0) }],
            "maxRecords": 500,
        });
        let response: QueryResponse<PsaResource> = self
            .post_json("resources query", "/Resources/query", &body)
            .await?;
        Ok(response.items)
    }
}
