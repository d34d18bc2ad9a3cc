use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::ItemQuery,
    repo_types::{ItemDraft, ItemPatch, MenuItem},
};
use crate::{
    auth::services::AuthUser, error::reject, sections::dto::ReorderRequest, state::AppState,
};

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/:id", patch(update_item).delete(delete_item))
        .route("/items/:id/availability", post(toggle_availability))
        .route("/sections/:id/items/order", put(reorder_items))
}

#[instrument(skip(state))]
pub async fn list_items(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<ItemQuery>,
) -> Result<Json<Vec<MenuItem>>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.items.fetch(q.section_id).await.map(Json).map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn create_item(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ItemDraft>,
) -> Result<(StatusCode, Json<MenuItem>), (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let created = ws.add_item(payload).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, payload))]
pub async fn update_item(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ItemPatch>,
) -> Result<Json<MenuItem>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.update_item(id, payload).await.map(Json).map_err(reject)
}

#[instrument(skip(state))]
pub async fn delete_item(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.items.delete(id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn toggle_availability(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MenuItem>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.ensure_menu().await.map_err(reject)?;
    ws.items.toggle_availability(id).await.map(Json).map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn reorder_items(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(section_id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<Vec<MenuItem>>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.ensure_menu().await.map_err(reject)?;
    ws.items
        .reorder(section_id, &payload.ordered_ids)
        .await
        .map(Json)
        .map_err(reject)
}
