use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{ReorderRequest, SectionRequest},
    repo_types::MenuSection,
};
use crate::{auth::services::AuthUser, error::reject, state::AppState};

pub fn section_routes() -> Router<AppState> {
    Router::new()
        .route("/sections", get(list_sections).post(create_section))
        .route("/sections/order", put(reorder_sections))
        .route("/sections/:id", put(update_section).delete(delete_section))
}

#[instrument(skip(state))]
pub async fn list_sections(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<MenuSection>>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    ws.sections.fetch(&restaurant).await.map(Json).map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn create_section(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SectionRequest>,
) -> Result<(StatusCode, Json<MenuSection>), (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.ensure_menu().await.map_err(reject)?;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    let created = ws
        .sections
        .add(&restaurant, &payload.name, payload.description)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, payload))]
pub async fn update_section(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SectionRequest>,
) -> Result<Json<MenuSection>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.sections
        .update(id, &payload.name, payload.description)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state))]
pub async fn delete_section(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.delete_section(id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn reorder_sections(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<Vec<MenuSection>>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.ensure_menu().await.map_err(reject)?;
    ws.sections
        .reorder(&payload.ordered_ids)
        .await
        .map(Json)
        .map_err(reject)
}
