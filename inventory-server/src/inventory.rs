use anyhow::anyhow;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::OperationType;
use tracing::info;
use uuid::Uuid;

use crate::auth::Claims;
use crate::cache::ListCache;
use crate::error::ServiceError;
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

/// Identity a mutation is attributed to, taken from the caller's token.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub user_name: String,
}

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            user_name: claims.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub store_id: Option<Uuid>,
    pub sku_id: Option<Uuid>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryView {
    pub id: Uuid,
    pub sku_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    pub version: i32,
    pub sku_name: String,
    pub store_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<(Inventory, Sku, Store)> for InventoryView {
    fn from((record, sku, store): (Inventory, Sku, Store)) -> Self {
        Self {
            id: record.id,
            sku_id: record.sku_id,
            store_id: record.store_id,
            quantity: record.quantity,
            version: record.version,
            sku_name: sku.name,
            store_name: store.name,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub items: Vec<InventoryView>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

/// Cache key layout: `inventory:store:<id|all>[:sku:<id>]:page:<n>:size:<m>`.
/// Keeping the store segment first is what makes pattern invalidation work.
pub fn list_cache_key(filter: &ListFilter) -> String {
    let mut parts = vec!["inventory".to_string(), "store".to_string()];
    match filter.store_id {
        Some(store_id) => parts.push(store_id.to_string()),
        None => parts.push("all".to_string()),
    }
    if let Some(sku_id) = filter.sku_id {
        parts.push("sku".to_string());
        parts.push(sku_id.to_string());
    }
    parts.push("page".to_string());
    parts.push(filter.page.to_string());
    parts.push("size".to_string());
    parts.push(filter.page_size.to_string());
    parts.join(":")
}

/// Applies a delta to a quantity, rejecting results below zero.
fn next_quantity(current: i32, delta: i32) -> Result<i32, ServiceError> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| ServiceError::Infrastructure(anyhow!("quantity overflow")))?;
    if next < 0 {
        return Err(ServiceError::InsufficientQuantity { current, delta });
    }
    Ok(next)
}

/// Mutations of inventory rows. Every mutating call locks the target row,
/// writes the matching outbox record in the same transaction, and invalidates
/// affected cache entries before returning.
#[derive(Clone)]
pub struct InventoryService {
    pool: DbPool,
    cache: ListCache,
    instance_id: String,
}

impl InventoryService {
    pub fn new(pool: DbPool, cache: ListCache, instance_id: String) -> Self {
        Self {
            pool,
            cache,
            instance_id,
        }
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<ListResponse, ServiceError> {
        let key = list_cache_key(filter);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(response) = serde_json::from_str::<ListResponse>(&cached) {
                return Ok(response);
            }
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let mut count_query = inventory::table.count().into_boxed();
        if let Some(store_id) = filter.store_id {
            count_query = count_query.filter(inventory::store_id.eq(store_id));
        }
        if let Some(sku_id) = filter.sku_id {
            count_query = count_query.filter(inventory::sku_id.eq(sku_id));
        }
        let total: i64 = count_query.get_result(&mut conn).await?;

        let mut query = inventory::table
            .inner_join(skus::table)
            .inner_join(stores::table)
            .select((
                inventory::all_columns,
                skus::all_columns,
                stores::all_columns,
            ))
            .into_boxed();
        if let Some(store_id) = filter.store_id {
            query = query.filter(inventory::store_id.eq(store_id));
        }
        if let Some(sku_id) = filter.sku_id {
            query = query.filter(inventory::sku_id.eq(sku_id));
        }

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);
        let rows = query
            .order(inventory::created_at.desc())
            .offset((page - 1) * page_size)
            .limit(page_size)
            .load::<(Inventory, Sku, Store)>(&mut conn)
            .await?;

        let items: Vec<InventoryView> = rows.into_iter().map(InventoryView::from).collect();
        let total_pages = (total + page_size - 1) / page_size;
        let response = ListResponse {
            items,
            total,
            page,
            page_size,
            total_pages,
        };

        if let Ok(serialized) = serde_json::to_string(&response) {
            self.cache.put(&key, &serialized).await;
        }

        Ok(response)
    }

    pub async fn get(&self, id: Uuid) -> Result<InventoryView, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let row = inventory::table
            .inner_join(skus::table)
            .inner_join(stores::table)
            .select((
                inventory::all_columns,
                skus::all_columns,
                stores::all_columns,
            ))
            .filter(inventory::id.eq(id))
            .first::<(Inventory, Sku, Store)>(&mut conn)
            .await
            .optional()?
            .ok_or(ServiceError::NotFound("inventory"))?;

        Ok(row.into())
    }

    pub async fn create(
        &self,
        sku_id: Uuid,
        store_id: Uuid,
        quantity: i32,
        actor: &Actor,
    ) -> Result<InventoryView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::InsufficientQuantity {
                current: 0,
                delta: quantity,
            });
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let sku = skus::table
            .find(sku_id)
            .first::<Sku>(&mut conn)
            .await
            .optional()?
            .ok_or(ServiceError::NotFound("SKU"))?;
        let store = stores::table
            .find(store_id)
            .first::<Store>(&mut conn)
            .await
            .optional()?
            .ok_or(ServiceError::NotFound("store"))?;

        let existing = inventory::table
            .filter(inventory::sku_id.eq(sku_id))
            .filter(inventory::store_id.eq(store_id))
            .first::<Inventory>(&mut conn)
            .await
            .optional()?;
        if existing.is_some() {
            return Err(ServiceError::DuplicateInventory);
        }

        let instance_id = self.instance_id.clone();
        let actor = actor.clone();
        let sku_name = sku.name.clone();
        let store_name = store.name.clone();

        let created = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    // A concurrent create for the same (sku, store) pair loses
                    // here on the unique index and maps to DuplicateInventory.
                    let record: Inventory = diesel::insert_into(inventory::table)
                        .values(&NewInventory {
                            id: Uuid::new_v4(),
                            sku_id,
                            store_id,
                            quantity,
                            version: 1,
                        })
                        .get_result(conn)
                        .await?;

                    diesel::insert_into(outbox::table)
                        .values(&NewOutboxRecord {
                            id: Uuid::new_v4(),
                            operation_type: OperationType::Create.as_str().to_string(),
                            sender_instance_id: instance_id,
                            inventory_id: record.id,
                            sku_id,
                            sku_name,
                            store_id,
                            store_name,
                            user_id: actor.user_id,
                            user_name: actor.user_name,
                            delta_quantity: quantity,
                            new_quantity: quantity,
                            version: record.version,
                        })
                        .execute(conn)
                        .await?;

                    Ok(record)
                })
            })
            .await?;

        info!("Created inventory {} for sku {} at store {}", created.id, sku_id, store_id);
        self.cache.invalidate(store_id, None).await;

        Ok(InventoryView::from((created, sku, store)))
    }

    pub async fn set_quantity(
        &self,
        id: Uuid,
        quantity: i32,
        actor: &Actor,
    ) -> Result<InventoryView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::InsufficientQuantity {
                current: 0,
                delta: quantity,
            });
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let instance_id = self.instance_id.clone();
        let actor = actor.clone();

        let (record, sku, store) = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let current = inventory::table
                        .find(id)
                        .for_update()
                        .first::<Inventory>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound("inventory"))?;

                    let sku = skus::table.find(current.sku_id).first::<Sku>(conn).await?;
                    let store = stores::table.find(current.store_id).first::<Store>(conn).await?;

                    let delta = quantity - current.quantity;
                    let updated: Inventory = diesel::update(inventory::table.find(id))
                        .set((
                            inventory::quantity.eq(quantity),
                            inventory::version.eq(current.version + 1),
                            inventory::updated_at.eq(Some(Utc::now())),
                        ))
                        .get_result(conn)
                        .await?;

                    diesel::insert_into(outbox::table)
                        .values(&NewOutboxRecord {
                            id: Uuid::new_v4(),
                            operation_type: OperationType::Update.as_str().to_string(),
                            sender_instance_id: instance_id,
                            inventory_id: updated.id,
                            sku_id: updated.sku_id,
                            sku_name: sku.name.clone(),
                            store_id: updated.store_id,
                            store_name: store.name.clone(),
                            user_id: actor.user_id,
                            user_name: actor.user_name,
                            delta_quantity: delta,
                            new_quantity: quantity,
                            version: updated.version,
                        })
                        .execute(conn)
                        .await?;

                    Ok((updated, sku, store))
                })
            })
            .await?;

        self.cache.invalidate(record.store_id, Some(record.sku_id)).await;

        Ok(InventoryView::from((record, sku, store)))
    }

    pub async fn adjust(
        &self,
        id: Uuid,
        delta: i32,
        actor: &Actor,
    ) -> Result<InventoryView, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let instance_id = self.instance_id.clone();
        let actor = actor.clone();

        let (record, sku, store) = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let current = inventory::table
                        .find(id)
                        .for_update()
                        .first::<Inventory>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound("inventory"))?;

                    let sku = skus::table.find(current.sku_id).first::<Sku>(conn).await?;
                    let store = stores::table.find(current.store_id).first::<Store>(conn).await?;

                    // Rejection rolls the transaction back untouched.
                    let new_quantity = next_quantity(current.quantity, delta)?;

                    let updated: Inventory = diesel::update(inventory::table.find(id))
                        .set((
                            inventory::quantity.eq(new_quantity),
                            inventory::version.eq(current.version + 1),
                            inventory::updated_at.eq(Some(Utc::now())),
                        ))
                        .get_result(conn)
                        .await?;

                    diesel::insert_into(outbox::table)
                        .values(&NewOutboxRecord {
                            id: Uuid::new_v4(),
                            operation_type: OperationType::Adjust.as_str().to_string(),
                            sender_instance_id: instance_id,
                            inventory_id: updated.id,
                            sku_id: updated.sku_id,
                            sku_name: sku.name.clone(),
                            store_id: updated.store_id,
                            store_name: store.name.clone(),
                            user_id: actor.user_id,
                            user_name: actor.user_name,
                            delta_quantity: delta,
                            new_quantity,
                            version: updated.version,
                        })
                        .execute(conn)
                        .await?;

                    Ok((updated, sku, store))
                })
            })
            .await?;

        self.cache.invalidate(record.store_id, Some(record.sku_id)).await;

        Ok(InventoryView::from((record, sku, store)))
    }

    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<(), ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let instance_id = self.instance_id.clone();
        let actor = actor.clone();

        let removed = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let current = inventory::table
                        .find(id)
                        .for_update()
                        .first::<Inventory>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound("inventory"))?;

                    let sku = skus::table.find(current.sku_id).first::<Sku>(conn).await?;
                    let store = stores::table.find(current.store_id).first::<Store>(conn).await?;

                    diesel::delete(inventory::table.find(id)).execute(conn).await?;

                    // The outbox row outlives the inventory row so consumers
                    // still learn about the deletion.
                    diesel::insert_into(outbox::table)
                        .values(&NewOutboxRecord {
                            id: Uuid::new_v4(),
                            operation_type: OperationType::Delete.as_str().to_string(),
                            sender_instance_id: instance_id,
                            inventory_id: current.id,
                            sku_id: current.sku_id,
                            sku_name: sku.name,
                            store_id: current.store_id,
                            store_name: store.name,
                            user_id: actor.user_id,
                            user_name: actor.user_name,
                            delta_quantity: -current.quantity,
                            new_quantity: 0,
                            version: current.version + 1,
                        })
                        .execute(conn)
                        .await?;

                    Ok(current)
                })
            })
            .await?;

        info!("Deleted inventory {}", removed.id);
        self.cache.invalidate(removed.store_id, Some(removed.sku_id)).await;

        Ok(())
    }

    pub async fn create_sku(&self, new_sku: NewSku) -> Result<Sku, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let sku = diesel::insert_into(skus::table)
            .values(&new_sku)
            .get_result::<Sku>(&mut conn)
            .await?;
        Ok(sku)
    }

    pub async fn list_skus(&self) -> Result<Vec<Sku>, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        Ok(skus::table
            .order(skus::created_at.desc())
            .load::<Sku>(&mut conn)
            .await?)
    }

    pub async fn create_store(&self, new_store: NewStore) -> Result<Store, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        let store = diesel::insert_into(stores::table)
            .values(&new_store)
            .get_result::<Store>(&mut conn)
            .await?;
        Ok(store)
    }

    pub async fn list_stores(&self) -> Result<Vec<Store>, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Infrastructure(anyhow!("database pool error: {}", e)))?;

        Ok(stores::table
            .order(stores::created_at.desc())
            .load::<Store>(&mut conn)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{store_pattern, unscoped_pattern};

    #[test]
    fn adjustment_applies_delta() {
        assert_eq!(next_quantity(10, -3).unwrap(), 7);
        assert_eq!(next_quantity(7, 5).unwrap(), 12);
        assert_eq!(next_quantity(0, 0).unwrap(), 0);
    }

    #[test]
    fn adjustment_below_zero_is_rejected_with_context() {
        let err = next_quantity(7, -10).unwrap_err();
        match err {
            ServiceError::InsufficientQuantity { current, delta } => {
                assert_eq!(current, 7);
                assert_eq!(delta, -10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn adjustment_to_exactly_zero_is_allowed() {
        assert_eq!(next_quantity(3, -3).unwrap(), 0);
    }

    #[test]
    fn adjustment_overflow_is_an_infrastructure_error() {
        assert!(matches!(
            next_quantity(i32::MAX, 1),
            Err(ServiceError::Infrastructure(_))
        ));
    }

    #[test]
    fn store_scoped_cache_key_matches_invalidation_pattern() {
        let store_id = Uuid::new_v4();
        let filter = ListFilter {
            store_id: Some(store_id),
            sku_id: None,
            page: 1,
            page_size: 20,
        };
        let key = list_cache_key(&filter);
        let prefix = store_pattern(store_id);
        assert!(key.starts_with(prefix.trim_end_matches('*')));
    }

    #[test]
    fn unscoped_cache_key_matches_catch_all_pattern() {
        let filter = ListFilter {
            store_id: None,
            sku_id: Some(Uuid::new_v4()),
            page: 2,
            page_size: 50,
        };
        let key = list_cache_key(&filter);
        assert!(key.starts_with(unscoped_pattern().trim_end_matches('*')));
        assert!(key.ends_with("page:2:size:50"));
    }
}
