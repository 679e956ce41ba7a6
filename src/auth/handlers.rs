use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest, UserSearch},
        extractors::{AdminUser, CurrentUser},
        jwt::JwtKeys,
        services,
    },
    error::AppResult,
    extract::JsonBody,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(get_me))
}

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users", get(list_users))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens) = services::register(state.users.as_ref(), &keys, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            tokens,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens) = services::login(state.users.as_ref(), &keys, payload).await?;
    Ok(Json(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens) = services::refresh(state.users.as_ref(), &keys, payload).await?;
    Ok(Json(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> AppResult<Json<PublicUser>> {
    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(q): Query<UserSearch>,
) -> AppResult<Json<Vec<PublicUser>>> {
    let term = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let users = state.users.search(term).await?;
    debug!(admin_id = %admin.id, count = users.len(), "users listed");
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}
