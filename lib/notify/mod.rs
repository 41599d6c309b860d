//! In-process notification fan-out.
//!
//! Workers publish completion events onto named channels; the WebSocket
//! layer subscribes and forwards them to connected clients. Publishing with
//! nobody listening is a normal condition, not an error.

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::models::Ticket;

const CHANNEL_CAPACITY: usize = 256;

pub fn ticket_finalized_channel(user_id: i64) -> String {
    format!("ticket_finalized_{user_id}")
}

pub fn sync_finished_channel(user_id: i64) -> String {
    format!("sync_finished_{user_id}")
}

/// Payload announcing that a pending ticket gained its permanent identity.
///
/// IDs are stringified: these payloads cross a JSON boundary into clients
/// whose number type cannot hold a full 64-bit value.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTicketPayload {
    #[serde(rename = "localTicketId")]
    pub local_ticket_id: String,
    #[serde(rename = "externalTicketId")]
    pub external_ticket_id: String,
    #[serde(rename = "ticketNumber")]
    pub ticket_number: String,
    pub status: i32,
}

impl From<&Ticket> for FinalizedTicketPayload {
    fn from(ticket: &Ticket) -> Self {
        Self {
            local_ticket_id: ticket.id.to_string(),
            external_ticket_id: ticket.external_ticket_id.to_string(),
            ticket_number: ticket.ticket_number.clone(),
            status: ticket.status,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SyncFinishedPayload {
    pub success: bool,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: f64,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

/// One published event: a channel name and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Broadcast hub connecting workers to WebSocket sessions.
///
/// A single tokio broadcast channel carries all events; subscribers filter by
/// channel name themselves. Slow subscribers lag and drop old events rather
/// than blocking publishers.
pub struct NotificationGateway {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotificationGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationGateway {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish<T: Serialize>(&self, channel: String, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("dropping unserializable notification on {channel}: {e}");
                return;
            }
        };
        // Err here just means no subscriber is connected right now.
        let _ = self.sender.send(Notification { channel, payload });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_ticket() -> Ticket {
        Ticket {
            id: 12,
            external_ticket_id: 424242,
            ticket_number: "T20240915.0042".to_string(),
            title: "t".to_string(),
            description: None,
            status: 1,
            priority: 3,
            company_external_id: 100,
            contact_external_id: 200,
            assigned_resource_id: None,
            assigned_resource_name: "Unassigned".to_string(),
            last_activity_date: None,
            last_synced_at: None,
            user_id: 7,
        }
    }

    #[test]
    fn finalized_payload_stringifies_ids() {
        let payload = FinalizedTicketPayload::from(&sample_ticket());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["localTicketId"], "12");
        assert_eq!(json["externalTicketId"], "424242");
        assert_eq!(json["ticketNumber"], "T20240915.0042");
        assert_eq!(json["status"], 1);
    }

    #[test]
    fn channel_names_embed_the_user() {
        assert_eq!(ticket_finalized_channel(7), "ticket_finalized_7");
        assert_eq!(sync_finished_channel(7), "sync_finished_7");
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let gateway = NotificationGateway::new();
        let mut receiver = gateway.subscribe();

        gateway.publish(
            sync_finished_channel(7),
            &SyncFinishedPayload {
                success: true,
                duration_seconds: 1.25,
                finished_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
        );

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.channel, "sync_finished_7");
        assert_eq!(event.payload["success"], true);
        assert_eq!(event.payload["durationSeconds"], 1.25);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let gateway = NotificationGateway::new();
        gateway.publish(
            ticket_finalized_channel(7),
            &FinalizedTicketPayload::from(&sample_ticket()),
        );
    }
}
