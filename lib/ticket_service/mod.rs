pub mod error;
pub mod store;
pub mod technician;
#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheLookup, TicketCache};
use crate::db::models::{
    AuthorType, MessageSource, NewTicket, NewTicketMessage, Ticket, User,
};
use crate::psa_client::error::PsaClientError;
use crate::psa_client::types::{
    NewPsaNote, NewPsaTicket, PsaNote, PsaResource, PsaTicket, PsaTimeEntry, DEFAULT_PRIORITY,
    STATUS_NEW,
};
use crate::psa_client::{PsaClient, MAX_BATCH_QUERY_IDS};
use crate::queue::{Job, JobEnvelope, JobSink};

use error::TicketServiceError;
use store::{TicketFinalization, TicketStore};
use technician::{
    resolve_assignee_id, API_USER_RESOURCE_ID, UNASSIGNED_NAME, UNKNOWN_TECHNICIAN_NAME,
};

pub const CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);
pub const RECENT_WRITE_GUARD: std::time::Duration = std::time::Duration::from_secs(30);

/// System/internal note type excluded from the user-visible mirror.
const SYSTEM_NOTE_TYPE: i32 = 13;
/// Note type and publish level for notes the portal writes back.
const PORTAL_NOTE_TYPE: i32 = 1;
const PUBLISH_ALL: i32 = 1;

/// Access to the PSA system, abstracted so sync logic is testable against
/// scripted responses.
pub trait PsaApi: Send + Sync {
    fn query_tickets<'a>(
        &'a self,
        company_id: i64,
        contact_id: i64,
    ) -> BoxFuture<'a, Result<Vec<PsaTicket>, PsaClientError>>;

    fn get_ticket<'a>(&'a self, ticket_id: i64)
        -> BoxFuture<'a, Result<PsaTicket, PsaClientError>>;

    fn create_ticket<'a>(
        &'a self,
        new_ticket: NewPsaTicket,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>>;

    fn create_note<'a>(&'a self, new_note: NewPsaNote)
        -> BoxFuture<'a, Result<i64, PsaClientError>>;

    fn query_notes<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaNote>, PsaClientError>>;

    fn query_time_entries<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaTimeEntry>, PsaClientError>>;

    fn query_resources<'a>(&'a self) -> BoxFuture<'a, Result<Vec<PsaResource>, PsaClientError>>;
}

impl PsaApi for PsaClient {
    fn query_tickets<'a>(
        &'a self,
        company_id: i64,
        contact_id: i64,
    ) -> BoxFuture<'a, Result<Vec<PsaTicket>, PsaClientError>> {
        Box::pin(PsaClient::query_tickets(self, company_id, contact_id))
    }

    fn get_ticket<'a>(
        &'a self,
        ticket_id: i64,
    ) -> BoxFuture<'a, Result<PsaTicket, PsaClientError>> {
        Box::pin(PsaClient::get_ticket(self, ticket_id))
    }

    fn create_ticket<'a>(
        &'a self,
        new_ticket: NewPsaTicket,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        Box::pin(async move { PsaClient::create_ticket(self, &new_ticket).await })
    }

    fn create_note<'a>(
        &'a self,
        new_note: NewPsaNote,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        Box::pin(async move { PsaClient::create_note(self, &new_note).await })
    }

    fn query_notes<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaNote>, PsaClientError>> {
        Box::pin(async move { PsaClient::query_notes(self, &ticket_ids).await })
    }

    fn query_time_entries<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaTimeEntry>, PsaClientError>> {
        Box::pin(async move { PsaClient::query_time_entries(self, &ticket_ids).await })
    }

    fn query_resources<'a>(&'a self) -> BoxFuture<'a, Result<Vec<PsaResource>, PsaClientError>> {
        Box::pin(PsaClient::query_resources(self))
    }
}

impl<T> PsaApi for Arc<T>
where
    T: PsaApi + ?Sized,
{
    fn query_tickets<'a>(
        &'a self,
        company_id: i64,
        contact_id: i64,
    ) -> BoxFuture<'a, Result<Vec<PsaTicket>, PsaClientError>> {
        (**self).query_tickets(company_id, contact_id)
    }

    fn get_ticket<'a>(
        &'a self,
        ticket_id: i64,
    ) -> BoxFuture<'a, Result<PsaTicket, PsaClientError>> {
        (**self).get_ticket(ticket_id)
    }

    fn create_ticket<'a>(
        &'a self,
        new_ticket: NewPsaTicket,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        (**self).create_ticket(new_ticket)
    }

    fn create_note<'a>(
        &'a self,
        new_note: NewPsaNote,
    ) -> BoxFuture<'a, Result<i64, PsaClientError>> {
        (**self).create_note(new_note)
    }

    fn query_notes<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaNote>, PsaClientError>> {
        (**self).query_notes(ticket_ids)
    }

    fn query_time_entries<'a>(
        &'a self,
        ticket_ids: Vec<i64>,
    ) -> BoxFuture<'a, Result<Vec<PsaTimeEntry>, PsaClientError>> {
        (**self).query_time_entries(ticket_ids)
    }

    fn query_resources<'a>(&'a self) -> BoxFuture<'a, Result<Vec<PsaResource>, PsaClientError>> {
        (**self).query_resources()
    }
}

/// Raw PSA ticket plus the resolved human assignee name; the shape served by
/// the read path and held in the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTicket {
    #[serde(flatten)]
    pub ticket: PsaTicket,
    #[serde(rename = "assignedResourceName")]
    pub assigned_resource_name: String,
}

/// Counters reported to the caller (and logs) after one delta-sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub tickets_synced: usize,
    pub messages_upserted: usize,
}

/// Orchestrates the PSA client, local store, read cache and job queue.
///
/// All writes toward the PSA system flow through the queue; the synchronous
/// surface only reads, inserts pending local rows and enqueues.
pub struct TicketService<P, S>
where
    P: PsaApi,
    S: TicketStore,
{
    psa: P,
    store: S,
    cache: TicketCache<Vec<EnrichedTicket>>,
    jobs: Arc<dyn JobSink>,
}

impl<P, S> TicketService<P, S>
where
    P: PsaApi,
    S: TicketStore,
{
    pub fn new(
        psa: P,
        store: S,
        cache: TicketCache<Vec<EnrichedTicket>>,
        jobs: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            psa,
            store,
            cache,
            jobs,
        }
    }

    /// Lists a user's tickets, served from cache when a fresh enough snapshot
    /// exists. A PSA failure surfaces as `SyncUnavailable`; the previous
    /// cache entry is never used as a fallback.
    pub async fn list_tickets(
        &self,
        contact_id: i64,
        company_id: i64,
        force_fresh: bool,
    ) -> Result<Vec<EnrichedTicket>, TicketServiceError> {
        if force_fresh {
            self.cache.invalidate(contact_id, company_id);
        } else {
            match self.cache.get(contact_id, company_id) {
                CacheLookup::Hit(tickets) => {
                    debug!("tickets for contact {contact_id} served from cache");
                    return Ok(tickets);
                }
                CacheLookup::EvictedTooFresh => {
                    debug!("cache entry for contact {contact_id} inside write guard, refetching");
                }
                CacheLookup::Miss => {}
            }
        }

        let raw = self
            .psa
            .query_tickets(company_id, contact_id)
            .await
            .map_err(TicketServiceError::SyncUnavailable)?;

        let enriched = join_all(raw.into_iter().map(|ticket| self.enrich_ticket(ticket))).await;
        let enriched = enriched
            .into_iter()
            .collect::<Result<Vec<_>, TicketServiceError>>()?;

        self.cache.set(contact_id, company_id, enriched.clone());
        Ok(enriched)
    }

    async fn enrich_ticket(&self, ticket: PsaTicket) -> Result<EnrichedTicket, TicketServiceError> {
        let assigned_resource_name = self.resolve_assignee_name(&ticket).await?;
        Ok(EnrichedTicket {
            ticket,
            assigned_resource_name,
        })
    }

    async fn resolve_assignee_name(
        &self,
        ticket: &PsaTicket,
    ) -> Result<String, TicketServiceError> {
        let Some(resource_id) = resolve_assignee_id(ticket) else {
            return Ok(UNASSIGNED_NAME.to_string());
        };
        let name = match self.store.find_technician(resource_id).await? {
            Some(technician) => technician.full_name,
            None => UNKNOWN_TECHNICIAN_NAME.to_string(),
        };
        Ok(name)
    }

    /// Creates a pending local ticket and queues the PSA-side creation.
    ///
    /// The returned row carries a negative sentinel `external_ticket_id`
    /// (`-now_millis`) and a `TEMP-<millis>` number until a worker finalizes
    /// it. The sentinel is unique in practice but not collision-safe across
    /// same-millisecond creations; see the allocation test.
    pub async fn create_ticket(
        &self,
        contact_id: i64,
        company_id: i64,
        title: String,
        description: String,
        user_id: i64,
    ) -> Result<Ticket, TicketServiceError> {
        let millis = Utc::now().timestamp_millis();

        let pending = NewTicket {
            external_ticket_id: -millis,
            ticket_number: format!("TEMP-{millis}"),
            title: title.clone(),
            description: Some(description.clone()),
            status: STATUS_NEW,
            priority: DEFAULT_PRIORITY,
            company_external_id: company_id,
            contact_external_id: contact_id,
            assigned_resource_id: None,
            assigned_resource_name: UNASSIGNED_NAME.to_string(),
            last_activity_date: None,
            last_synced_at: None,
            user_id,
        };
        let ticket = self.store.insert_ticket(pending).await?;

        self.jobs
            .enqueue(JobEnvelope::new(Job::CreateTicket {
                local_ticket_id: ticket.id,
                contact_id,
                company_id,
                title,
                description,
                user_id,
            }))
            .await?;

        // A snapshot taken before this insert must not outlive the write.
        self.cache.invalidate(contact_id, company_id);

        info!(
            "queued PSA creation for local ticket {} (sentinel {})",
            ticket.id, ticket.external_ticket_id
        );
        Ok(ticket)
    }

    /// Worker-only: performs the PSA-side ticket creation and returns the
    /// permanent external ID.
    pub async fn create_in_external(
        &self,
        contact_id: i64,
        company_id: i64,
        title: String,
        description: String,
    ) -> Result<i64, TicketServiceError> {
        let new_ticket = NewPsaTicket::portal_intake(company_id, contact_id, title, description);
        let external_id = self.psa.create_ticket(new_ticket).await?;
        Ok(external_id)
    }

    /// Worker-only: swaps the sentinel for the PSA system's canonical record.
    pub async fn finalize_ticket_creation(
        &self,
        local_ticket_id: i64,
        external_id: i64,
    ) -> Result<Ticket, TicketServiceError> {
        let canonical = self.psa.get_ticket(external_id).await?;
        let changes = TicketFinalization {
            external_ticket_id: canonical.id,
            ticket_number: canonical.ticket_number,
            status: canonical.status,
            priority: canonical.priority,
            last_activity_date: canonical.last_activity_date,
            last_synced_at: Utc::now(),
        };
        let ticket = self
            .store
            .finalize_ticket(local_ticket_id, changes)
            .await?
            .ok_or(TicketServiceError::UnknownTicket(local_ticket_id))?;

        info!(
            "finalized local ticket {} as {} ({})",
            ticket.id, ticket.external_ticket_id, ticket.ticket_number
        );
        Ok(ticket)
    }

    /// Delta-syncs one user's tickets and their notes/time entries.
    ///
    /// Only tickets whose PSA `lastActivityDate` is strictly newer than the
    /// reference date (the user's most recent `last_synced_at`) are touched.
    /// Ticket IDs are chunked so notes and time entries arrive in two batch
    /// queries per chunk instead of one round trip per ticket. Re-running the
    /// same input is a no-op thanks to natural-key upserts; a failure aborts
    /// remaining work without rolling back committed rows, and the reference
    /// date mechanism re-converges on the next run.
    pub async fn sync_tickets_and_messages_for_user(
        &self,
        user_id: i64,
        contact_id: i64,
        company_id: i64,
    ) -> Result<SyncOutcome, TicketServiceError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(TicketServiceError::UnknownUser(user_id))?;

        let reference_date = self
            .store
            .latest_synced_at_for_user(user_id)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let all_tickets = self.psa.query_tickets(company_id, contact_id).await?;
        let changed: Vec<PsaTicket> = all_tickets
            .into_iter()
            .filter(|ticket| {
                ticket
                    .last_activity_date
                    .map_or(false, |activity| activity > reference_date)
            })
            .collect();

        if changed.is_empty() {
            debug!("no ticket activity for user {user_id} since {reference_date}");
            return Ok(SyncOutcome::default());
        }

        info!(
            "syncing {} changed tickets for user {user_id} (reference {reference_date})",
            changed.len()
        );

        let mut outcome = SyncOutcome::default();
        for chunk in changed.chunks(MAX_BATCH_QUERY_IDS) {
            let ids: Vec<i64> = chunk.iter().map(|t| t.id).collect();
            let notes = self.psa.query_notes(ids.clone()).await?;
            let time_entries = self.psa.query_time_entries(ids).await?;

            let mut notes_by_ticket: HashMap<i64, Vec<PsaNote>> = HashMap::new();
            for note in notes {
                notes_by_ticket.entry(note.ticket_id).or_default().push(note);
            }
            let mut entries_by_ticket: HashMap<i64, Vec<PsaTimeEntry>> = HashMap::new();
            for entry in time_entries {
                entries_by_ticket
                    .entry(entry.ticket_id)
                    .or_default()
                    .push(entry);
            }

            let ticket_futures = chunk.iter().map(|raw| {
                let notes = notes_by_ticket.remove(&raw.id).unwrap_or_default();
                let entries = entries_by_ticket.remove(&raw.id).unwrap_or_default();
                self.sync_one_ticket(raw, notes, entries, &user, reference_date)
            });

            for result in join_all(ticket_futures).await {
                let ticket_outcome = result?;
                outcome.tickets_synced += 1;
                outcome.messages_upserted += ticket_outcome;
            }
        }

        info!(
            "sync finished for user {user_id}: {} tickets, {} messages",
            outcome.tickets_synced, outcome.messages_upserted
        );
        Ok(outcome)
    }

    /// Upserts one ticket row plus its in-window notes and time entries.
    /// Returns the number of messages written.
    async fn sync_one_ticket(
        &self,
        raw: &PsaTicket,
        notes: Vec<PsaNote>,
        time_entries: Vec<PsaTimeEntry>,
        user: &User,
        reference_date: DateTime<Utc>,
    ) -> Result<usize, TicketServiceError> {
        let now = Utc::now();
        let assigned_resource_id = resolve_assignee_id(raw);
        let assigned_resource_name = self.resolve_assignee_name(raw).await?;

        let ticket = self
            .store
            .upsert_synced_ticket(NewTicket {
                external_ticket_id: raw.id,
                ticket_number: raw.ticket_number.clone(),
                title: raw.title.clone(),
                description: raw.description.clone(),
                status: raw.status,
                priority: raw.priority,
                company_external_id: raw.company_id,
                contact_external_id: raw.contact_id.unwrap_or_default(),
                assigned_resource_id,
                assigned_resource_name,
                last_activity_date: raw.last_activity_date,
                last_synced_at: Some(now),
                user_id: user.id,
            })
            .await?;

        let mut written = 0usize;

        for note in notes {
            if note.publish != PUBLISH_ALL || note.note_type == SYSTEM_NOTE_TYPE {
                continue;
            }
            if !note
                .create_date_time
                .map_or(false, |created| created > reference_date)
            {
                continue;
            }

            let (user_type, author_name, local_user_id) = self.classify_note_author(&note, user).await?;
            self.store
                .upsert_message(NewTicketMessage {
                    external_message_id: note.id,
                    source_type: MessageSource::Note.as_db_str().to_string(),
                    ticket_id: ticket.id,
                    user_type: user_type.as_db_str().to_string(),
                    author_name,
                    author_contact_id: note.created_by_contact_id,
                    local_user_id,
                    content: note
                        .description
                        .or(note.title)
                        .unwrap_or_default(),
                    created_at: note.create_date_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }

        for entry in time_entries {
            if !entry
                .start_date_time
                .map_or(false, |started| started > reference_date)
            {
                continue;
            }

            let author_name = match entry.resource_id {
                Some(resource_id) => match self.store.find_technician(resource_id).await? {
                    Some(technician) => technician.full_name,
                    None => UNKNOWN_TECHNICIAN_NAME.to_string(),
                },
                None => UNKNOWN_TECHNICIAN_NAME.to_string(),
            };

            self.store
                .upsert_message(NewTicketMessage {
                    external_message_id: entry.id,
                    source_type: MessageSource::TimeEntry.as_db_str().to_string(),
                    ticket_id: ticket.id,
                    user_type: AuthorType::Technician.as_db_str().to_string(),
                    author_name,
                    author_contact_id: None,
                    local_user_id: None,
                    content: format!(
                        "[{}h] {}",
                        entry.hours_worked.unwrap_or_default(),
                        entry.summary_notes.as_deref().unwrap_or_default()
                    ),
                    created_at: entry.start_date_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }

        Ok(written)
    }

    /// Notes written through the portal's API account, or directly by this
    /// user's PSA contact, belong to the user; everything else is a
    /// technician resolved against the lookup table.
    async fn classify_note_author(
        &self,
        note: &PsaNote,
        user: &User,
    ) -> Result<(AuthorType, String, Option<i64>), TicketServiceError> {
        let is_api_user = note.creator_resource_id == Some(API_USER_RESOURCE_ID);
        let is_own_contact = note.created_by_contact_id == Some(user.contact_external_id);
        if is_api_user || is_own_contact {
            return Ok((AuthorType::User, user.display_name.clone(), Some(user.id)));
        }

        let name = match note.creator_resource_id {
            Some(resource_id) => match self.store.find_technician(resource_id).await? {
                Some(technician) => technician.full_name,
                None => UNKNOWN_TECHNICIAN_NAME.to_string(),
            },
            None => UNKNOWN_TECHNICIAN_NAME.to_string(),
        };
        Ok((AuthorType::Technician, name, None))
    }

    /// Creates a note against a ticket that may still carry a sentinel ID.
    ///
    /// The job addresses the ticket by its local surrogate id, which is
    /// stable across finalization, so a retried note lands on the same row
    /// after the sentinel has been swapped for the permanent external id.
    /// While the `create-ticket` job has not finished, this fails with
    /// `DependencyNotReady` so the queue's retry delay gives the creation
    /// time to complete; no explicit ordering primitive exists between the
    /// two jobs.
    pub async fn create_note_for_ticket(
        &self,
        local_ticket_id: i64,
        contact_id: i64,
        user_id: i64,
        content: String,
    ) -> Result<(), TicketServiceError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(TicketServiceError::UnknownUser(user_id))?;

        let ticket = self
            .store
            .find_ticket(local_ticket_id, user_id)
            .await?
            .ok_or(TicketServiceError::UnknownTicket(local_ticket_id))?;

        if ticket.is_pending() {
            warn!(
                "note for local ticket {local_ticket_id} blocked: creation not yet confirmed, retrying later"
            );
            return Err(TicketServiceError::DependencyNotReady(
                ticket.external_ticket_id,
            ));
        }

        let note_id = self
            .psa
            .create_note(NewPsaNote {
                ticket_id: ticket.external_ticket_id,
                title: "Client portal note".to_string(),
                description: content.clone(),
                note_type: PORTAL_NOTE_TYPE,
                publish: PUBLISH_ALL,
            })
            .await?;

        let now = Utc::now();
        self.store
            .upsert_message(NewTicketMessage {
                external_message_id: note_id,
                source_type: MessageSource::Note.as_db_str().to_string(),
                ticket_id: ticket.id,
                user_type: AuthorType::User.as_db_str().to_string(),
                author_name: user.display_name.clone(),
                author_contact_id: Some(contact_id),
                local_user_id: Some(user.id),
                content,
                created_at: Some(now),
                synced_at: now,
            })
            .await?;

        Ok(())
    }

    /// Mirrored conversation for one locally stored ticket.
    pub async fn list_tickets_from_store(
        &self,
        user_id: i64,
    ) -> Result<Vec<Ticket>, TicketServiceError> {
        Ok(self.store.list_tickets_for_user(user_id).await?)
    }

    pub async fn queue_sync_user(
        &self,
        user_id: i64,
        contact_id: i64,
        company_id: i64,
    ) -> Result<(), TicketServiceError> {
        self.jobs
            .enqueue(JobEnvelope::new(Job::SyncUser {
                user_id,
                contact_id,
                company_id,
            }))
            .await?;
        Ok(())
    }

    /// Resolves the caller's external id (possibly still a sentinel) to the
    /// local row before enqueueing, so the job payload survives the sentinel
    /// swap performed by finalization.
    pub async fn queue_create_note(
        &self,
        external_ticket_id: i64,
        contact_id: i64,
        user_id: i64,
        content: String,
    ) -> Result<(), TicketServiceError> {
        let ticket = self
            .store
            .find_ticket_by_external_id(external_ticket_id, user_id)
            .await?
            .ok_or(TicketServiceError::UnknownTicket(external_ticket_id))?;

        self.jobs
            .enqueue(JobEnvelope::new(Job::CreateNote {
                local_ticket_id: ticket.id,
                contact_id,
                user_id,
                content,
            }))
            .await?;
        Ok(())
    }
}
