use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{InventoryEvent, OperationType};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::skus)]
pub struct Sku {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: BigDecimal,
    pub version: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::skus)]
pub struct NewSku {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: BigDecimal,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stores)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stores)]
pub struct NewStore {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

/// One quantity-on-hand row per (sku, store) pair. `version` increments on
/// every committed mutation and is copied into the outbox row written in the
/// same transaction.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory)]
pub struct Inventory {
    pub id: Uuid,
    pub sku_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    pub version: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory)]
pub struct NewInventory {
    pub id: Uuid,
    pub sku_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    pub version: i32,
}

/// Durable notification intent, written in the same transaction as the
/// inventory change it describes and deleted by the relay once published.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub operation_type: String,
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
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox)]
pub struct NewOutboxRecord {
    pub id: Uuid,
    pub operation_type: String,
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
}

impl TryFrom<OutboxRecord> for InventoryEvent {
    type Error = anyhow::Error;

    fn try_from(record: OutboxRecord) -> Result<Self, Self::Error> {
        let operation_type = match record.operation_type.as_str() {
            "create" => OperationType::Create,
            "update" => OperationType::Update,
            "adjust" => OperationType::Adjust,
            "delete" => OperationType::Delete,
            other => anyhow::bail!("unknown operation type: {}", other),
        };

        Ok(Self {
            id: record.id,
            operation_type,
            sender_instance_id: record.sender_instance_id,
            inventory_id: record.inventory_id,
            sku_id: record.sku_id,
            sku_name: record.sku_name,
            store_id: record.store_id,
            store_name: record.store_name,
            user_id: record.user_id,
            user_name: record.user_name,
            delta_quantity: record.delta_quantity,
            new_quantity: record.new_quantity,
            version: record.version,
            created_at: record.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_record_converts_to_event() {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            operation_type: "adjust".to_string(),
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
            created_at: Some(Utc::now()),
        };

        let event = InventoryEvent::try_from(record.clone()).unwrap();
        assert_eq!(event.operation_type, OperationType::Adjust);
        assert_eq!(event.new_quantity, 7);
        assert_eq!(event.version, record.version);
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            operation_type: "upsert".to_string(),
            sender_instance_id: "node-a".to_string(),
            inventory_id: Uuid::new_v4(),
            sku_id: Uuid::new_v4(),
            sku_name: "Widget".to_string(),
            store_id: Uuid::new_v4(),
            store_name: "Downtown".to_string(),
            user_id: Uuid::new_v4(),
            user_name: "alice".to_string(),
            delta_quantity: 0,
            new_quantity: 0,
            version: 1,
            created_at: None,
        };

        assert!(InventoryEvent::try_from(record).is_err());
    }
}
