use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{technicians, ticket_messages, tickets, users};

/// Where a mirrored message came from in the PSA system.
///
/// Together with the external message ID this forms the natural key that
/// makes message replay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSource {
    Note,
    TimeEntry,
}

impl MessageSource {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::TimeEntry => "time_entry",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "note" => Some(Self::Note),
            "time_entry" => Some(Self::TimeEntry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorType {
    User,
    Technician,
}

impl AuthorType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Technician => "technician",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i64,
    /// Negative sentinel until the PSA system confirms creation.
    pub external_ticket_id: i64,
    pub ticket_number: String,
    pub title: String,
    pub description: Option<String>,
    pub status: i32,
    pub priority: i32,
    pub company_external_id: i64,
    pub contact_external_id: i64,
    pub assigned_resource_id: Option<i64>,
    pub assigned_resource_name: String,
    pub last_activity_date: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub user_id: i64,
}

impl Ticket {
    pub fn is_pending(&self) -> bool {
        self.external_ticket_id < 0
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub external_ticket_id: i64,
    pub ticket_number: String,
    pub title: String,
    pub description: Option<String>,
    pub status: i32,
    pub priority: i32,
    pub company_external_id: i64,
    pub contact_external_id: i64,
    pub assigned_resource_id: Option<i64>,
    pub assigned_resource_name: String,
    pub last_activity_date: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = ticket_messages)]
pub struct TicketMessage {
    pub id: i64,
    pub external_message_id: i64,
    pub source_type: String,
    pub ticket_id: i64,
    pub user_type: String,
    pub author_name: String,
    pub author_contact_id: Option<i64>,
    pub local_user_id: Option<i64>,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ticket_messages)]
pub struct NewTicketMessage {
    pub external_message_id: i64,
    pub source_type: String,
    pub ticket_id: i64,
    pub user_type: String,
    pub author_name: String,
    pub author_contact_id: Option<i64>,
    pub local_user_id: Option<i64>,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = technicians)]
pub struct Technician {
    /// PSA resource ID. Refreshed wholesale; never mutated by the sync path.
    pub id: i64,
    pub full_name: String,
    pub email: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub display_name: String,
    pub contact_external_id: i64,
    pub company_external_id: i64,
}
