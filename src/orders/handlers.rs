use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        BoardQuery, BulkStatusRequest, BulkStatusResponse, OrderBoard, OrderCard, OrderPage,
        OrderStatistics, SearchQuery, StatsQuery, StatusUpdateRequest,
    },
    repo_types::{NewOrder, OrderDetails, OrderFilter},
    services::{
        create_order, estimated_delivery_time, get_order, order_statistics, search_orders,
    },
};
use crate::{auth::services::AuthUser, error::reject, state::AppState};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(place_order))
        .route("/orders/board", get(board))
        .route("/orders/search", get(search))
        .route("/orders/stats", get(statistics))
        .route("/orders/status", post(bulk_update_status))
        .route("/orders/:id", get(get_one))
        .route("/orders/:id/status", patch(update_status))
}

#[instrument(skip(state))]
pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<OrderPage>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    ws.watch_orders(restaurant.id).await;
    let (orders, total_count) = ws
        .orders
        .fetch(restaurant.id, &filter)
        .await
        .map_err(reject)?;
    Ok(Json(OrderPage {
        orders: orders.into_iter().map(OrderCard::from).collect(),
        total_count,
    }))
}

/// Columns of the live board, covering every order of the restaurant.
#[instrument(skip(state))]
pub async fn board(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<BoardQuery>,
) -> Result<Json<OrderBoard>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    ws.watch_orders(restaurant.id).await;
    ws.orders.load_board(restaurant.id).await.map_err(reject)?;

    let columns = match q.status {
        Some(status) => BTreeMap::from([(status, ws.orders.filter_by_status(Some(status)).await)]),
        None => ws.orders.partition_by_status().await,
    };
    Ok(Json(OrderBoard {
        columns: columns
            .into_iter()
            .map(|(status, orders)| (status, orders.into_iter().map(OrderCard::from).collect()))
            .collect(),
        total_count: ws.orders.total_count().await,
    }))
}

/// Customer checkout.
#[instrument(skip(state, payload))]
pub async fn place_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderDetails>), (StatusCode, String)> {
    let placed = create_order(state.backend.orders.as_ref(), user_id, &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(placed)))
}

#[instrument(skip(state))]
pub async fn get_one(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderCard>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    get_order(state.backend.orders.as_ref(), restaurant.id, id)
        .await
        .map(|d| Json(OrderCard::from(d)))
        .map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<OrderCard>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    let eta = payload
        .estimated_delivery_time
        .or_else(|| payload.prep_minutes.map(estimated_delivery_time));
    ws.orders
        .update_status(restaurant.id, id, payload.status, eta)
        .await
        .map_err(reject)?;
    info!(order_id = %id, status = %payload.status, "order status changed");
    get_order(state.backend.orders.as_ref(), restaurant.id, id)
        .await
        .map(|d| Json(OrderCard::from(d)))
        .map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn bulk_update_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<BulkStatusRequest>,
) -> Result<Json<BulkStatusResponse>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    let updated = ws
        .orders
        .bulk_update_status(restaurant.id, &payload.ids, payload.status)
        .await
        .map_err(reject)?;
    Ok(Json(BulkStatusResponse { updated }))
}

#[instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<OrderCard>>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    let hits = search_orders(state.backend.orders.as_ref(), restaurant.id, &q.q)
        .await
        .map_err(reject)?;
    Ok(Json(hits.into_iter().map(OrderCard::from).collect()))
}

#[instrument(skip(state))]
pub async fn statistics(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<StatsQuery>,
) -> Result<Json<OrderStatistics>, (StatusCode, String)> {
    let ws = state.workspaces.get(user_id).await;
    let restaurant = ws.restaurant.require().await.map_err(reject)?;
    order_statistics(
        state.backend.orders.as_ref(),
        restaurant.id,
        q.date_from,
        q.date_to,
    )
    .await
    .map(Json)
    .map_err(reject)
}
