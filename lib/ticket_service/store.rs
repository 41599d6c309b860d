use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::insert_into;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::{Pool, PoolError};
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::db::models::{NewTicket, NewTicketMessage, Technician, Ticket, User};
use crate::db::schema::{technicians, ticket_messages, tickets, users};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Diesel(#[from] DieselError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Field set applied when a sentinel ticket is reconciled with the PSA
/// system's canonical record.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketFinalization {
    pub external_ticket_id: i64,
    pub ticket_number: String,
    pub status: i32,
    pub priority: i32,
    pub last_activity_date: Option<DateTime<Utc>>,
    pub last_synced_at: DateTime<Utc>,
}

/// Persistence seam for the ticket service.
///
/// Abstracted in the same way the PSA client is, so sync and reconciliation
/// logic can be unit-tested against an in-memory store.
pub trait TicketStore: Send + Sync {
    /// Plain insert for a locally created pending ticket.
    fn insert_ticket<'a>(&'a self, ticket: NewTicket) -> BoxFuture<'a, Result<Ticket, StoreError>>;

    /// Upsert keyed by `external_ticket_id`: creates the row or refreshes its
    /// mutable fields. The owning `user_id` is only set on first creation.
    fn upsert_synced_ticket<'a>(
        &'a self,
        ticket: NewTicket,
    ) -> BoxFuture<'a, Result<Ticket, StoreError>>;

    /// Upsert keyed by `(external_message_id, source_type)`; replays are
    /// absorbed without duplicating rows.
    fn upsert_message<'a>(
        &'a self,
        message: NewTicketMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn find_ticket_by_external_id<'a>(
        &'a self,
        external_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>>;

    /// Lookup by the local surrogate id, which stays stable while
    /// finalization swaps the external id.
    fn find_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>>;

    /// Swaps a sentinel row for its reconciled identity. `None` when no such
    /// local ticket exists. When a concurrent sync already mirrored the
    /// external id, the sentinel row is folded into that row instead.
    fn finalize_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        changes: TicketFinalization,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>>;

    /// Most recent successful sync instant across the user's tickets; the
    /// delta-sync reference date.
    fn latest_synced_at_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, StoreError>>;

    fn list_tickets_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>>;

    fn find_technician<'a>(
        &'a self,
        technician_id: i64,
    ) -> BoxFuture<'a, Result<Option<Technician>, StoreError>>;

    fn find_user<'a>(&'a self, user_id: i64) -> BoxFuture<'a, Result<Option<User>, StoreError>>;

    /// Wholesale refresh of the technician lookup table.
    fn upsert_technicians<'a>(
        &'a self,
        rows: Vec<Technician>,
    ) -> BoxFuture<'a, Result<usize, StoreError>>;
}

impl<T> TicketStore for std::sync::Arc<T>
where
    T: TicketStore + ?Sized,
{
    fn insert_ticket<'a>(&'a self, ticket: NewTicket) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        (**self).insert_ticket(ticket)
    }

    fn upsert_synced_ticket<'a>(
        &'a self,
        ticket: NewTicket,
    ) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        (**self).upsert_synced_ticket(ticket)
    }

    fn upsert_message<'a>(
        &'a self,
        message: NewTicketMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).upsert_message(message)
    }

    fn find_ticket_by_external_id<'a>(
        &'a self,
        external_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        (**self).find_ticket_by_external_id(external_ticket_id, user_id)
    }

    fn find_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        (**self).find_ticket(local_ticket_id, user_id)
    }

    fn finalize_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        changes: TicketFinalization,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        (**self).finalize_ticket(local_ticket_id, changes)
    }

    fn latest_synced_at_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, StoreError>> {
        (**self).latest_synced_at_for_user(user_id)
    }

    fn list_tickets_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>> {
        (**self).list_tickets_for_user(user_id)
    }

    fn find_technician<'a>(
        &'a self,
        technician_id: i64,
    ) -> BoxFuture<'a, Result<Option<Technician>, StoreError>> {
        (**self).find_technician(technician_id)
    }

    fn find_user<'a>(&'a self, user_id: i64) -> BoxFuture<'a, Result<Option<User>, StoreError>> {
        (**self).find_user(user_id)
    }

    fn upsert_technicians<'a>(
        &'a self,
        rows: Vec<Technician>,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        (**self).upsert_technicians(rows)
    }
}

/// Postgres-backed store used by the production runtime.
pub struct PgTicketStore {
    pool: Pool<diesel_async::AsyncPgConnection>,
}

impl PgTicketStore {
    pub fn new(pool: Pool<diesel_async::AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

impl TicketStore for PgTicketStore {
    fn insert_ticket<'a>(&'a self, ticket: NewTicket) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = insert_into(tickets::table)
                .values(&ticket)
                .get_result::<Ticket>(&mut conn)
                .await?;
            Ok(row)
        })
    }

    fn upsert_synced_ticket<'a>(
        &'a self,
        ticket: NewTicket,
    ) -> BoxFuture<'a, Result<Ticket, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = insert_into(tickets::table)
                .values(&ticket)
                .on_conflict(tickets::external_ticket_id)
                .do_update()
                .set((
                    tickets::ticket_number.eq(excluded(tickets::ticket_number)),
                    tickets::title.eq(excluded(tickets::title)),
                    tickets::status.eq(excluded(tickets::status)),
                    tickets::priority.eq(excluded(tickets::priority)),
                    tickets::assigned_resource_id.eq(excluded(tickets::assigned_resource_id)),
                    tickets::assigned_resource_name.eq(excluded(tickets::assigned_resource_name)),
                    tickets::last_activity_date.eq(excluded(tickets::last_activity_date)),
                    tickets::last_synced_at.eq(excluded(tickets::last_synced_at)),
                ))
                .get_result::<Ticket>(&mut conn)
                .await?;
            Ok(row)
        })
    }

    fn upsert_message<'a>(
        &'a self,
        message: NewTicketMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            insert_into(ticket_messages::table)
                .values(&message)
                .on_conflict((
                    ticket_messages::external_message_id,
                    ticket_messages::source_type,
                ))
                .do_update()
                .set((
                    ticket_messages::content.eq(excluded(ticket_messages::content)),
                    ticket_messages::author_name.eq(excluded(ticket_messages::author_name)),
                    ticket_messages::synced_at.eq(excluded(ticket_messages::synced_at)),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn find_ticket_by_external_id<'a>(
        &'a self,
        external_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = tickets::table
                .filter(tickets::external_ticket_id.eq(external_ticket_id))
                .filter(tickets::user_id.eq(user_id))
                .first::<Ticket>(&mut conn)
                .await
                .optional()?;
            Ok(row)
        })
    }

    fn find_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = tickets::table
                .filter(tickets::id.eq(local_ticket_id))
                .filter(tickets::user_id.eq(user_id))
                .first::<Ticket>(&mut conn)
                .await
                .optional()?;
            Ok(row)
        })
    }

    fn finalize_ticket<'a>(
        &'a self,
        local_ticket_id: i64,
        changes: TicketFinalization,
    ) -> BoxFuture<'a, Result<Option<Ticket>, StoreError>> {
        Box::pin(async move {
            let external_ticket_id = changes.external_ticket_id;
            let mut conn = self.pool.get().await?;
            let updated = diesel::update(tickets::table.find(local_ticket_id))
                .set((
                    tickets::external_ticket_id.eq(changes.external_ticket_id),
                    tickets::ticket_number.eq(changes.ticket_number),
                    tickets::status.eq(changes.status),
                    tickets::priority.eq(changes.priority),
                    tickets::last_activity_date.eq(changes.last_activity_date),
                    tickets::last_synced_at.eq(changes.last_synced_at),
                ))
                .get_result::<Ticket>(&mut conn)
                .await;

            match updated {
                Ok(row) => Ok(Some(row)),
                Err(DieselError::NotFound) => Ok(None),
                // A concurrent sync run already mirrored this external id.
                // Fold the sentinel row into the synced one: repoint its
                // messages, then drop it.
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    let surviving = tickets::table
                        .filter(tickets::external_ticket_id.eq(external_ticket_id))
                        .first::<Ticket>(&mut conn)
                        .await
                        .optional()?;
                    let Some(surviving) = surviving else {
                        return Ok(None);
                    };
                    diesel::update(
                        ticket_messages::table
                            .filter(ticket_messages::ticket_id.eq(local_ticket_id)),
                    )
                    .set(ticket_messages::ticket_id.eq(surviving.id))
                    .execute(&mut conn)
                    .await?;
                    diesel::delete(tickets::table.find(local_ticket_id))
                        .execute(&mut conn)
                        .await?;
                    Ok(Some(surviving))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn latest_synced_at_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let latest: Option<DateTime<Utc>> = tickets::table
                .filter(tickets::user_id.eq(user_id))
                .select(max(tickets::last_synced_at))
                .first(&mut conn)
                .await?;
            Ok(latest)
        })
    }

    fn list_tickets_for_user<'a>(
        &'a self,
        user_id: i64,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let rows = tickets::table
                .filter(tickets::user_id.eq(user_id))
                .order(tickets::last_activity_date.desc().nulls_last())
                .load::<Ticket>(&mut conn)
                .await?;
            Ok(rows)
        })
    }

    fn find_technician<'a>(
        &'a self,
        technician_id: i64,
    ) -> BoxFuture<'a, Result<Option<Technician>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = technicians::table
                .find(technician_id)
                .first::<Technician>(&mut conn)
                .await
                .optional()?;
            Ok(row)
        })
    }

    fn find_user<'a>(&'a self, user_id: i64) -> BoxFuture<'a, Result<Option<User>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let row = users::table
                .find(user_id)
                .first::<User>(&mut conn)
                .await
                .optional()?;
            Ok(row)
        })
    }

    fn upsert_technicians<'a>(
        &'a self,
        rows: Vec<Technician>,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(0);
            }
            let mut conn = self.pool.get().await?;
            let count = insert_into(technicians::table)
                .values(&rows)
                .on_conflict(technicians::id)
                .do_update()
                .set((
                    technicians::full_name.eq(excluded(technicians::full_name)),
                    technicians::email.eq(excluded(technicians::email)),
                    technicians::is_active.eq(excluded(technicians::is_active)),
                ))
                .execute(&mut conn)
                .await?;
            Ok(count)
        })
    }
}
