use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{AuthUser, TokenVerifier};
use crate::error::ServiceError;
use crate::hub::HubHandle;
use crate::inventory::{Actor, InventoryService, InventoryView, ListFilter, ListResponse};
use crate::models::{NewSku, NewStore, Sku, Store};

#[derive(Clone)]
pub struct AppState {
    pub service: InventoryService,
    pub hub: HubHandle,
    pub verifier: TokenVerifier,
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInventoryRequest {
    pub sku_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct AdjustQuantityRequest {
    pub delta_quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub store_id: Option<Uuid>,
    pub sku_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreateSkuRequest {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateStoreRequest {
    pub name: String,
    pub address: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/inventory", get(list_inventory).post(create_inventory))
        .route(
            "/inventory/:id",
            get(get_inventory)
                .put(set_inventory_quantity)
                .delete(delete_inventory),
        )
        .route("/inventory/:id/adjust", post(adjust_inventory))
        .route("/skus", get(list_skus).post(create_sku))
        .route("/stores", get(list_stores).post(create_store))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_inventory(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ServiceError> {
    let filter = ListFilter {
        store_id: query.store_id,
        sku_id: query.sku_id,
        page: query.page,
        page_size: query.page_size,
    };
    Ok(Json(state.service.list(&filter).await?))
}

async fn get_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InventoryView>, ServiceError> {
    Ok(Json(state.service.get(id).await?))
}

async fn create_inventory(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(request): Json<CreateInventoryRequest>,
) -> Result<(StatusCode, Json<InventoryView>), ServiceError> {
    let actor = Actor::from(&claims);
    let created = state
        .service
        .create(request.sku_id, request.store_id, request.quantity, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_inventory_quantity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AuthUser(claims): AuthUser,
    Json(request): Json<SetQuantityRequest>,
) -> Result<Json<InventoryView>, ServiceError> {
    let actor = Actor::from(&claims);
    Ok(Json(
        state.service.set_quantity(id, request.quantity, &actor).await?,
    ))
}

async fn adjust_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AuthUser(claims): AuthUser,
    Json(request): Json<AdjustQuantityRequest>,
) -> Result<Json<InventoryView>, ServiceError> {
    let actor = Actor::from(&claims);
    Ok(Json(
        state.service.adjust(id, request.delta_quantity, &actor).await?,
    ))
}

async fn delete_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, ServiceError> {
    let actor = Actor::from(&claims);
    state.service.delete(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_skus(State(state): State<AppState>) -> Result<Json<Vec<Sku>>, ServiceError> {
    Ok(Json(state.service.list_skus().await?))
}

async fn create_sku(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Json(request): Json<CreateSkuRequest>,
) -> Result<(StatusCode, Json<Sku>), ServiceError> {
    let price = BigDecimal::try_from(request.price)
        .map_err(|e| ServiceError::Infrastructure(anyhow::anyhow!("invalid price: {}", e)))?;
    let sku = state
        .service
        .create_sku(NewSku {
            id: Uuid::new_v4(),
            name: request.name,
            category: request.category,
            description: request.description,
            price,
            version: 1,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(sku)))
}

async fn list_stores(State(state): State<AppState>) -> Result<Json<Vec<Store>>, ServiceError> {
    Ok(Json(state.service.list_stores().await?))
}

async fn create_store(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Json(request): Json<CreateStoreRequest>,
) -> Result<(StatusCode, Json<Store>), ServiceError> {
    let store = state
        .service
        .create_store(NewStore {
            id: Uuid::new_v4(),
            name: request.name,
            address: request.address,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(store)))
}
