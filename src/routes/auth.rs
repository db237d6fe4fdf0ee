use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::{
        auth::{MagicLinkRequest, MagicLinkResponse, VerifyRequest, VerifyResponse},
        common::PlayerSummary,
    },
    error::AppError,
    services::auth_service,
    state::SharedState,
};

/// Magic-link sign-in endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/magic-link", post(request_magic_link))
        .route("/auth/verify", post(verify))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
}

/// Email a one-time sign-in link.
#[utoipa::path(
    post,
    path = "/auth/magic-link",
    tag = "auth",
    request_body = MagicLinkRequest,
    responses(
        (status = 202, description = "Link sent", body = MagicLinkResponse),
        (status = 400, description = "Invalid email")
    )
)]
pub async fn request_magic_link(
    State(state): State<SharedState>,
    payload: Result<Json<MagicLinkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MagicLinkResponse>), AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    let sent = auth_service::request_magic_link(&state, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(sent)))
}

/// Exchange a sign-in link token for a session cookie.
#[utoipa::path(
    post,
    path = "/auth/verify",
    tag = "auth",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Signed in; the session cookie is set", body = VerifyResponse),
        (status = 401, description = "Invalid, expired or used link")
    )
)]
pub async fn verify(
    State(state): State<SharedState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    let verified = auth_service::verify_magic_link(&state, payload).await?;
    let cookie = auth_service::session_cookie(&state.config().auth, &verified.token);
    Ok(([(header::SET_COOKIE, cookie)], Json(verified)).into_response())
}

/// Currently signed-in player.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Signed-in player", body = PlayerSummary),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<PlayerSummary>, AppError> {
    Ok(Json(auth_service::current_player(&state, &headers).await?))
}

/// Clear the session cookie.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(State(state): State<SharedState>) -> Response {
    let cookie = auth_service::cleared_session_cookie(&state.config().auth);
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response()
}
