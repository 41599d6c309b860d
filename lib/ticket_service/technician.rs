use crate::psa_client::types::PsaTicket;

/// PSA resource IDs belonging to API/integration/monitoring accounts.
/// These must never be surfaced as a ticket's human assignee.
pub const SYSTEM_RESOURCE_IDS: &[i64] = &[
    4,        // administrator account
    29682909, // API automation user
    29682914, // RMM integration
    29682921, // backup monitoring
    29682931, // password manager API
    29682932, // distributor API
    29682936, // dark web monitoring API
    29682946, // provisioning API
    29682961, // license sync API
    29682962, // phone system API
];

/// Resource ID the PSA system stamps on notes created through the REST API.
/// Notes carrying it were written by the portal on behalf of the user.
pub const API_USER_RESOURCE_ID: i64 = 29682909;

pub const UNASSIGNED_NAME: &str = "Unassigned";
pub const UNKNOWN_TECHNICIAN_NAME: &str = "Unknown";

fn is_system_resource(id: i64) -> bool {
    SYSTEM_RESOURCE_IDS.contains(&id)
}

/// Picks the "true" human assignee for a raw PSA ticket.
///
/// Priority order: assigned resource, then whoever completed the ticket,
/// then the first responder, then the most recent activity. System accounts
/// are excluded at every step. `None` means no human candidate exists.
pub fn resolve_assignee_id(ticket: &PsaTicket) -> Option<i64> {
    [
        ticket.assigned_resource_id,
        ticket.completed_by_resource_id,
        ticket.first_response_initiating_resource_id,
        ticket.last_activity_resource_id,
    ]
    .into_iter()
    .flatten()
    .find(|id| !is_system_resource(*id))
}
