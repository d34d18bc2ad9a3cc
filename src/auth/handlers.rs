use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, AuthStatus, CredentialsRequest, OAuthResponse, RefreshRequest},
        services::{bearer_token, AuthUser},
    },
    error::reject,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/oauth/:provider", get(oauth_url))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), (StatusCode, String)> {
    let resp = state
        .auth
        .signup(&payload.email, &payload.password)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    state
        .auth
        .login(&payload.email, &payload.password)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    state
        .auth
        .refresh(&payload.refresh_token)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state, headers))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, String)> {
    let token = bearer_token(&headers)?;
    state.auth.logout(token, user_id).await.map_err(reject)?;
    info!(%user_id, "user signed out");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn oauth_url(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<OAuthResponse>, (StatusCode, String)> {
    let url = state.auth.oauth_url(&provider).map_err(reject)?;
    Ok(Json(OAuthResponse { url }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AuthStatus>, (StatusCode, String)> {
    state.auth.status(user_id).await.map(Json).map_err(reject)
}
