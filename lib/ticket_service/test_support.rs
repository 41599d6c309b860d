//! In-memory doubles for the PSA client, the store and the job sink.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::db::models::{NewTicket, NewTicketMessage, Technician, Ticket, TicketMessage, User};
use crate::psa_client::error::PsaClientError;
use crate::psa_client::types::{
    NewPsaNote, NewPsaTicket, PsaNote, PsaResource, PsaTicket, PsaTimeEntry,
};
use crate::queue::{JobEnvelope, JobSink, QueueError};

use super::store::{StoreError, TicketFinalization, TicketStore};
use super::PsaApi;

pub fn transient_psa_error() -> PsaClientError {
    PsaClientError::UnexpectedStatus {
        resource: "Tickets/query".to_string(),
        status: 503,
        body: "{\"errors\":[\"upstream unavailable\"]}".to_string(),
    }
}

pub fn terminal_psa_error() -> PsaClientError {
    PsaClientError::UnexpectedStatus {
        resource: "Tickets".to_string(),
        status: 400,
        body: "{\"errors\":[\"ContactID is invalid\"]}".to_string(),
    }
}

/// Scripted PSA double: each method pops the next canned response and records
/// what it was called with.
#[derive(Default)]
pub struct MockPsa {
    pub ticket_query_responses: Mutex<VecDeque<Result<Vec<PsaTicket>, PsaClientError>>>,
    pub get_ticket_responses: Mutex<VecDeque<Result<PsaTicket, PsaClientError>>>,
    pub create_ticket_responses: Mutex<VecDeque<Result<i64, PsaClientError>>>,
    pub create_note_responses: Mutex<VecDeque<Result<i64, PsaClientError>>>,
    pub note_query_responses: Mutex<VecDeque<Result<Vec<PsaNote>, PsaClientError>>>,
    pub time_entry_query_responses: Mutex<VecDeque<Result<Vec<PsaTimeEntry>, PsaClientError>>>,
    pub resource_responses: Mutex<VecDeque<Result<Vec<PsaResource>, PsaClientError>>>,

    pub ticket_queries: Mutex<Vec<(i64, i64)>>,
    pub created_tickets: Mutex<Vec<NewPsaTicket>>,
    pub created_notes: Mutex<Vec<NewPsaNote>>,
    pub note_query_batches: Mutex<Vec<Vec<i64>>>,
    pub time_entry_query_batches: Mutex<Vec<Vec<i64>>>,
}

impl MockPsa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_ticket_query(&self, response: Result<Vec<PsaTicket>, PsaClientError>) {
        self.ticket_query_responses.lock().unwrap().push_back(response);
    }

    pub fn script_get_ticket(&self, response: Result<PsaTicket, PsaClientError>) {
        self.get_ticket_responses.lock().unwrap().push_back(response);
    }

    pub fn script_create_ticket(&self, response: Result<i64, PsaClientError>) {
        self.create_ticket_responses.lock().unwrap().push_back(response);
    }

    pub fn script_create_note(&self, response: Result<i64, PsaClientError>) {
        self.create_note_responses.lock().unwrap().push_back(response);
    }

    pub fn script_note_query(&self, response: Result<Vec<PsaNote>, PsaClientError>) {
        self.note_query_responses.lock().unwrap().push_back(response);
    }

    pub fn script_time_entry_query(&self, response: Result<Vec<PsaTimeEntry>, PsaClientError>) {
        self.time_entry_query_responses
            .lock()
            .unwrap()
            .push_back(response);
    }

    pub fn script_resource_query(&self, response: Result<Vec<PsaResource>, PsaClientError>) {
        self.resource_responses.lock().unwrap().push_back(response);
    }

    pub fn ticket_query_count(&self) -> usize {
        self.ticket_queries.lock().unwrap().len()
    }

    fn next<T>(queue: &Mutex<VecDeque<T>>, method: &str) -> T {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockPsa: no scripted response left for {method}"))
    }
}

impl PsaApi for MockPsa {
    fn query_tickets<'a>(
        &'a self,
        company_id: i64,
        contact_id: i64,
    ) -> BoxFuture<'a, Result<Vec<PsaTicket>, PsaClientError>> {
        self.ticket_queries
            .lock()
            .unwrap()
            .push((company_id, contact_id));
        let response = Self::next(&self.ticket_query_responses, "query_tickets");
        Box::pin(async move { response })
    }

    fn get_ticket<'a>(
        &'a self,
        _ticket_id: i64,
    ) -> BoxFuture<'a, Result<PsaTicket, PsaClientError>> {
        let response = Self::next(&self.get_ticket_responses, "get_ticket");
        Box::pin(async move { response })
    }

    fn create_ticket<'a>(
        &'a self,
        new_ticket: NewPsaTicket,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        self.created_tickets.lock().unwrap().push(new_ticket);
        let response = Self::next(&self.create_ticket_responses, "create_ticket");
        Box::pin(async move { response })
    }

    fn create_note<'a>(
        &'a self,
        new_note: NewPsaNote,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        self.created_notes.lock().unwrap().push(new_note);
        let response = Self::next(&self.create_note_responses, "create_note");
        Box::pin(async move { response })
    }

    fn query_notes<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaNote>, PsaClientError>> {
        self.note_query_batches.lock().unwrap().push(ticket_ids);
        let response = Self::next(&self.note_query_responses, "query_notes");
        Box::pin(async move { response })
    }

    fn query_time_entries<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaTimeEntry>, PsaClientError>> {
        self.time_entry_query_batches
            .lock()
            .unwrap()
            .push(ticket_ids);
        let response = Self::next(&self.time_entry_query_responses, "query_time_entries");
        Box::pin(async move { response })
    }

    fn query_resources<'a>(&'a self) -> BoxFuture<'a, Result<Vec<PsaResource>, PsaClientError>> {
        let response = Self::next(&self.resource_responses, "query_resources");
        Box::pin(async move { response })
    }
}

/// In-memory [`TicketStore`] with the same natural-key upsert semantics as
/// the Postgres implementation.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    pub tickets: Mutex<Vec<Ticket>>,
    pub messages: Mutex<Vec<TicketMessage>>,
    pub technicians: Mutex<HashMap<i64, Technician>>,
    pub users: Mutex<HashMap<i64, User>>,
    /// When set, `latest_synced_at_for_user` returns this instead of the
    /// computed maximum, pinning the delta-sync reference date under test.
    pub reference_override: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn with_user(user: User) -> Self {
        let store = Self::new();
        store.users.lock().unwrap().insert(user.id, user);
        store
    }

    pub fn add_technician(&self, technician: Technician) {
        self.technicians
            .lock()
            .unwrap()
            .insert(technician.id, technician);
    }

    pub fn pin_reference_date(&self, reference: DateTime<Utc>) {
        *self.reference_override.lock().unwrap() = Some(reference);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn materialize(&self, new: NewTicket) -> Ticket {
        Ticket {
            id: self.alloc_id(),
            external_ticket_id: new.external_ticket_id,
            ticket_number: new.ticket_number,
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            company_external_id: new.company_external_id,
            contact_external_id: new.contact_external_id,
            assigned_resource_id: new.assigned_resource_id,
            assigned_resource_name: new.assigned_resource_name,
            last_activity_date: new.last_activity_date,
            last_synced_at: new.last_synced_at,
            user_id: new.user_id,
        }
    }
}

impl TicketStore for MemoryStore {
    fn insert_ticket<'a>(&'a self, ticket: NewTicket) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        let row = self.materialize(ticket);
        self.tickets.lock().unwrap().push(row.clone());
        Box::pin(async move { Ok(row) })
    }

    fn upsert_synced_ticket<'a>(
        &'a self,
        ticket: NewTicket,
    ) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        let mut tickets = self.tickets.lock().unwrap();
        let row = match tickets
            .iter_mut()
            .find(|row| row.external_ticket_id == ticket.external_ticket_id)
        {
            Some(existing) => {
                // Mirror of the Postgres ON CONFLICT column list.
                existing.ticket_number = ticket.ticket_number;
                existing.title = ticket.title;
                existing.status = ticket.status;
                existing.priority = ticket.priority;
                existing.assigned_resource_id = ticket.assigned_resource_id;
                existing.assigned_resource_name = ticket.assigned_resource_name;
                existing.last_activity_date = ticket.last_activity_date;
                existing.last_synced_at = ticket.last_synced_at;
                existing.clone()
            }
            None => {
                let row = self.materialize(ticket);
                tickets.push(row.clone());
                row
            }
        };
        Box::pin(async move { Ok(row) })
    }

    fn upsert_message<'a>(
        &'a self,
        message: NewTicketMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|row| {
            row.external_message_id == message.external_message_id
                && row.source_type == message.source_type
        }) {
            Some(existing) => {
                existing.content = message.content;
                existing.author_name = message.author_name;
                existing.synced_at = message.synced_at;
            }
            None => {
                messages.push(TicketMessage {
                    id: self.alloc_id(),
                    external_message_id: message.external_message_id,
                    source_type: message.source_type,
                    ticket_id: message.ticket_id,
                    user_type: message.user_type,
                    author_name: message.author_name,
                    author_contact_id: message.author_contact_id,
                    local_user_id: message.local_user_id,
                    content: message.content,
                    created_at: message.created_at,
                    synced_at: message.synced_at,
                });
            }
        }
        Box::pin(async move { Ok(()) })
    }

    fn find_ticket_by_external_id<'a>(
        &'a self,
        external_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        let row = self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.external_ticket_id == external_ticket_id && row.user_id == user_id)
            .cloned();
        Box::pin(async move { Ok(row) })
    }

    fn find_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        let row = self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == local_ticket_id && row.user_id == user_id)
            .cloned();
        Box::pin(async move { Ok(row) })
    }

    fn finalize_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        changes: TicketFinalization,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        let mut tickets = self.tickets.lock().unwrap();

        // Same merge the Postgres store performs on a unique violation: a
        // concurrent sync already owns the external id, so the sentinel row
        // is folded into it.
        let conflict = tickets
            .iter()
            .find(|row| {
                row.external_ticket_id == changes.external_ticket_id && row.id != local_ticket_id
            })
            .cloned();
        if let Some(surviving) = conflict {
            if tickets.iter().any(|row| row.id == local_ticket_id) {
                let mut messages = self.messages.lock().unwrap();
                for message in messages
                    .iter_mut()
                    .filter(|message| message.ticket_id == local_ticket_id)
                {
                    message.ticket_id = surviving.id;
                }
                tickets.retain(|row| row.id != local_ticket_id);
                return Box::pin(async move { Ok(Some(surviving)) });
            }
        }

        let row = tickets
            .iter_mut()
            .find(|row| row.id == local_ticket_id)
            .map(|existing| {
                existing.external_ticket_id = changes.external_ticket_id;
                existing.ticket_number = changes.ticket_number;
                existing.status = changes.status;
                existing.priority = changes.priority;
                existing.last_activity_date = changes.last_activity_date;
                existing.last_synced_at = Some(changes.last_synced_at);
                existing.clone()
            });
        Box::pin(async move { Ok(row) })
    }

    fn latest_synced_at_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, StoreError>> {
        let pinned = *self.reference_override.lock().unwrap();
        let latest = pinned.or_else(|| {
            self.tickets
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.user_id == user_id)
                .filter_map(|row| row.last_synced_at)
                .max()
        });
        Box::pin(async move { Ok(latest) })
    }

    fn list_tickets_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>> {
        let rows: Vec<Ticket> = self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        Box::pin(async move { Ok(rows) })
    }

    fn find_technician<'a>(
        &'a self,
        technician_id: i64,
    ) -> BoxFuture<'a, Result<Option<Technician>, StoreError>> {
        let row = self.technicians.lock().unwrap().get(&technician_id).cloned();
        Box::pin(async move { Ok(row) })
    }

    fn find_user<'a>(&'a self, user_id: i64) -> BoxFuture<'a, Result<Option<User>, StoreError>> {
        let row = self.users.lock().unwrap().get(&user_id).cloned();
        Box::pin(async move { Ok(row) })
    }

    fn upsert_technicians<'a>(
        &'a self,
        rows: Vec<Technician>,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        let count = rows.len();
        let mut technicians = self.technicians.lock().unwrap();
        for row in rows {
            technicians.insert(row.id, row);
        }
        Box::pin(async move { Ok(count) })
    }
}

/// Records enqueued envelopes instead of talking to Redis.
#[derive(Default)]
pub struct RecordingSink {
    pub envelopes: Mutex<Vec<JobEnvelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<JobEnvelope> {
        std::mem::take(&mut self.envelopes.lock().unwrap())
    }
}

impl JobSink for RecordingSink {
    fn enqueue<'a>(&'a self, envelope: JobEnvelope) -> BoxFuture<'a, Result<(), QueueError>> {
        self.envelopes.lock().unwrap().push(envelope);
        Box::pin(async move { Ok(()) })
    }
}
