use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::PublicMenu,
    repo_types::{ProfileUpdate, Restaurant, RestaurantDetails},
    services::public_menu,
};
use crate::{
    auth::services::AuthUser,
    error::{reject, StoreError},
    state::AppState,
};

pub fn restaurant_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/restaurant",
            get(get_restaurant)
                .post(create_restaurant)
                .patch(update_details),
        )
        .route("/restaurant/profile", put(update_profile))
        .route("/restaurant/key", post(reset_key))
}

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/public/menu/:key", get(get_public_menu))
}

#[instrument(skip(state))]
pub async fn get_restaurant(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Restaurant>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws
        .restaurant
        .fetch()
        .await
        .and_then(|r| r.ok_or(StoreError::NotOnboarded))
        .map_err(reject)?;
    Ok(Json(restaurant))
}

#[instrument(skip(state, payload))]
pub async fn create_restaurant(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<RestaurantDetails>,
) -> Result<(StatusCode, Json<Restaurant>), (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let created = ws.restaurant.create(payload).await.map_err(reject)?;
    info!(%user_id, restaurant_id = %created.id, "owner onboarded");
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, payload))]
pub async fn update_details(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<RestaurantDetails>,
) -> Result<Json<Restaurant>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.restaurant
        .update_details(payload)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<Restaurant>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.restaurant
        .update_profile(payload)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state))]
pub async fn reset_key(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Restaurant>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    ws.restaurant.reset_key().await.map(Json).map_err(reject)
}

#[instrument(skip(state))]
pub async fn get_public_menu(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PublicMenu>, (StatusCode, String)> {
    public_menu(&state.backend, &key)
        .await
        .map(Json)
        .map_err(reject)
}
