use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Query envelope: the PSA API wraps every query result in `{"items": [...]}`.
#[derive(Deserialize, Debug)]
pub struct QueryResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Create envelope: `{"itemId": ...}`.
#[derive(Deserialize, Debug)]
pub struct CreateResponse {
    #[serde(rename = "itemId")]
    pub item_id: i64,
}

/// Single-fetch envelope: `{"item": {...}}`.
#[derive(Deserialize, Debug)]
pub struct SingleItemResponse<T> {
    pub item: T,
}

/// One `{op, field, value}` clause of a PSA query filter.
#[derive(Serialize, Debug)]
pub struct FilterClause {
    pub op: &'static str,
    pub field: &'static str,
    pub value: serde_json::Value,
}

impl FilterClause {
    pub fn eq(field: &'static str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            op: "eq",
            field,
            value: value.into(),
        }
    }

    pub fn in_ids(field: &'static str, ids: &[i64]) -> Self {
        Self {
            op: "in",
            field,
            value: json!(ids),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PsaTicket {
    pub id: i64,
    #[serde(rename = "ticketNumber")]
    pub ticket_number: String,
    pub title: String,
    pub description: Option<String>,
    pub status: i32,
    pub priority: i32,
    #[serde(rename = "companyID")]
    pub company_id: i64,
    #[serde(rename = "contactID")]
    pub contact_id: Option<i64>,
    #[serde(rename = "assignedResourceID")]
    pub assigned_resource_id: Option<i64>,
    #[serde(rename = "completedByResourceID")]
    pub completed_by_resource_id: Option<i64>,
    #[serde(rename = "firstResponseInitiatingResourceID")]
    pub first_response_initiating_resource_id: Option<i64>,
    #[serde(rename = "lastActivityResourceID")]
    pub last_activity_resource_id: Option<i64>,
    #[serde(rename = "lastActivityDate")]
    pub last_activity_date: Option<DateTime<Utc>>,
}

/// Creation payload. The queue/source/type/billing-code values are the
/// portal's fixed intake configuration in the PSA system.
#[derive(Serialize, Debug, Clone)]
pub struct NewPsaTicket {
    #[serde(rename = "companyID")]
    pub company_id: i64,
    #[serde(rename = "contactID")]
    pub contact_id: i64,
    pub title: String,
    pub description: String,
    #[serde(rename = "queueID")]
    pub queue_id: i64,
    pub status: i32,
    pub priority: i32,
    pub source: i32,
    #[serde(rename = "ticketType")]
    pub ticket_type: i32,
    #[serde(rename = "billingCodeID")]
    pub billing_code_id: i64,
}

pub const PORTAL_QUEUE_ID: i64 = 29682833;
pub const PORTAL_BILLING_CODE_ID: i64 = 29682801;
pub const STATUS_NEW: i32 = 1;
pub const DEFAULT_PRIORITY: i32 = 3;
pub const SOURCE_CLIENT_PORTAL: i32 = -1;
pub const TICKET_TYPE_SERVICE_REQUEST: i32 = 1;

impl NewPsaTicket {
    pub fn portal_intake(
        company_id: i64,
        contact_id: i64,
        title: String,
        description: String,
    ) -> Self {
        Self {
            company_id,
            contact_id,
            title,
            description,
            queue_id: PORTAL_QUEUE_ID,
            status: STATUS_NEW,
            priority: DEFAULT_PRIORITY,
            source: SOURCE_CLIENT_PORTAL,
            ticket_type: TICKET_TYPE_SERVICE_REQUEST,
            billing_code_id: PORTAL_BILLING_CODE_ID,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PsaNote {
    pub id: i64,
    #[serde(rename = "ticketID")]
    pub ticket_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "noteType")]
    pub note_type: i32,
    pub publish: i32,
    #[serde(rename = "creatorResourceID")]
    pub creator_resource_id: Option<i64>,
    #[serde(rename = "createdByContactID")]
    pub created_by_contact_id: Option<i64>,
    #[serde(rename = "createDateTime")]
    pub create_date_time: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone)]
pub struct NewPsaNote {
    #[serde(rename = "ticketID")]
    pub ticket_id: i64,
    pub title: String,
    pub description: String,
    #[serde(rename = "noteType")]
    pub note_type: i32,
    pub publish: i32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PsaTimeEntry {
    pub id: i64,
    #[serde(rename = "ticketID")]
    pub ticket_id: i64,
    #[serde(rename = "resourceID")]
    pub resource_id: Option<i64>,
    #[serde(rename = "hoursWorked")]
    pub hours_worked: Option<f64>,
    #[serde(rename = "summaryNotes")]
    pub summary_notes: Option<String>,
    #[serde(rename = "startDateTime")]
    pub start_date_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PsaResource {
    pub id: i64,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    #[serde(rename = "emailAddress")]
    pub email_address: Option<String>,
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
}
