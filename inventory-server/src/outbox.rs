use anyhow::Result;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{Envelope, InventoryEvent};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::OutboxRecord;
use crate::schema::outbox;

type DbPool = Pool<AsyncPgConnection>;

/// Drains this instance's outbox rows into the broker. At-least-once: a row
/// is deleted only after its publish succeeded, and a failed publish leaves
/// the row in place for the next cycle.
pub struct OutboxRelay {
    pool: DbPool,
    producer: Option<FutureProducer>,
    topic: String,
    instance_id: String,
    interval: Duration,
    batch_size: i64,
    shutdown: CancellationToken,
}

impl OutboxRelay {
    pub fn new(
        pool: DbPool,
        producer: Option<FutureProducer>,
        topic: String,
        instance_id: String,
        interval: Duration,
        batch_size: i64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            producer,
            topic,
            instance_id,
            interval,
            batch_size,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!("Outbox relay started (interval {:?}, batch {})", self.interval, self.batch_size);

        // The first tick fires immediately, so startup drains whatever a
        // previous run of this instance left behind.
        let mut ticker = time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Outbox relay stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_batch().await {
                        error!("Error draining outbox: {:#}", e);
                    }
                }
            }
        }
    }

    async fn drain_batch(&self) -> Result<()> {
        let Some(producer) = &self.producer else {
            debug!("Broker unavailable, skipping outbox cycle");
            return Ok(());
        };

        let mut conn = self.pool.get().await?;

        // (version, created_at) ordering means no consumer sees a later state
        // of a row before an earlier one.
        let pending = outbox::table
            .filter(outbox::sender_instance_id.eq(&self.instance_id))
            .order((outbox::version.asc(), outbox::created_at.asc()))
            .limit(self.batch_size)
            .load::<OutboxRecord>(&mut conn)
            .await?;

        if pending.is_empty() {
            return Ok(());
        }

        for record in pending {
            let record_id = record.id;

            if let Err(e) = self.publish(producer, record).await {
                error!("Failed to publish outbox record {}: {:#}", record_id, e);
                continue;
            }

            if let Err(e) = diesel::delete(outbox::table.find(record_id))
                .execute(&mut conn)
                .await
            {
                // The row stays and will be republished; consumers tolerate
                // the duplicate.
                error!("Failed to delete published outbox record {}: {}", record_id, e);
                continue;
            }

            debug!("Relayed outbox record {}", record_id);
        }

        Ok(())
    }

    async fn publish(&self, producer: &FutureProducer, record: OutboxRecord) -> Result<()> {
        let (key, json) = envelope_message(&self.instance_id, record)?;
        let kafka_record = FutureRecord::to(&self.topic).payload(&json).key(&key);

        producer
            .send(kafka_record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

/// Builds the broker message for one outbox row. Keyed by inventory id so
/// per-row ordering holds within a partition.
fn envelope_message(instance_id: &str, record: OutboxRecord) -> Result<(String, String)> {
    let event = InventoryEvent::try_from(record)?;
    let envelope = Envelope::new(instance_id.to_string(), &event)?;
    let key = event.inventory_id.to_string();
    Ok((key, serde_json::to_string(&envelope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn envelope_message_is_keyed_by_inventory_row() {
        let inventory_id = Uuid::new_v4();
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            operation_type: "adjust".to_string(),
            sender_instance_id: "node-a".to_string(),
            inventory_id,
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

        let (key, json) = envelope_message("node-a", record).unwrap();
        assert_eq!(key, inventory_id.to_string());

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sender_instance_id"], "node-a");
        assert_eq!(value["payload"]["inventory_id"], inventory_id.to_string());
        assert_eq!(value["payload"]["new_quantity"], 7);
        assert_eq!(value["payload"]["version"], 2);
    }

    #[test]
    fn corrupt_outbox_row_does_not_build_a_message() {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            operation_type: "unknown".to_string(),
            sender_instance_id: "node-a".to_string(),
            inventory_id: Uuid::new_v4(),
            sku_id: Uuid::new_v4(),
            sku_name: String::new(),
            store_id: Uuid::new_v4(),
            store_name: String::new(),
            user_id: Uuid::new_v4(),
            user_name: String::new(),
            delta_quantity: 0,
            new_quantity: 0,
            version: 1,
            created_at: None,
        };

        assert!(envelope_message("node-a", record).is_err());
    }
}
