use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message envelope carried on the broker topic. The payload is opaque JSON so
/// consumers can forward it to clients without reinterpreting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_instance_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Adjust,
    Delete,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Adjust => "adjust",
            OperationType::Delete => "delete",
        }
    }
}

/// Inventory change notification pushed to real-time clients. Mirrors the
/// outbox row that produced it; sku/store/user names are denormalized so
/// consumers need no extra lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub sender_instance_id: String,
    pub inventory_id: Uuid,
    pub sku_id: Uuid,
    pub sku_name: String,
    pub store_id: Uuid,
    pub store_name: String,
    pub user_id: Uuid,
    pub user_name: String,
    pub delta_quantity: i32,
    pub new_quantity: i32,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(sender_instance_id: String, event: &InventoryEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            sender_instance_id,
            payload: serde_json::to_value(event)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> InventoryEvent {
        InventoryEvent {
            id: Uuid::new_v4(),
            operation_type: OperationType::Adjust,
            sender_instance_id: "node-a".to_string(),
            inventory_id: Uuid::new_v4(),
            sku_id: Uuid::new_v4(),
            sku_name: "Widget".to_string(),
            store_id: Uuid::new_v4(),
            store_name: "Downtown".to_string(),
            user_id: Uuid::new_v4(),
            user_name: "alice".to_string(),
            delta_quantity: -3,
            new_quantity: 7,
            version: 2,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_wire_fields_are_snake_case() {
        let event = sample_event();
        let envelope = Envelope::new("node-a".to_string(), &event).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["sender_instance_id"], "node-a");
        assert_eq!(json["payload"]["operation_type"], "adjust");
        assert_eq!(json["payload"]["delta_quantity"], -3);
        assert_eq!(json["payload"]["new_quantity"], 7);
        assert_eq!(json["payload"]["sku_name"], "Widget");
    }

    #[test]
    fn envelope_round_trips_from_foreign_producer() {
        // Consumers must accept envelopes produced by any instance, including
        // ones serialized by a different language runtime.
        let raw = r#"{"sender_instance_id":"node-b","payload":{"note":"opaque"}}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.sender_instance_id, "node-b");
        assert_eq!(envelope.payload["note"], "opaque");
    }
}
