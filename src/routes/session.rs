use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::session::{
        CreateSessionRequest, CreateSessionResponse, EndSessionResponse, JoinSessionRequest,
        JoinSessionResponse, RecalculateLevelResponse, SessionDetailsResponse,
        SessionMemberRequest, SessionQuery, SubmitScoreRequest, SubmitScoreResponse,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Session lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session/create", post(create_session))
        .route("/session/join", post(join_session))
        .route("/session/submit-score", post(submit_score))
        .route("/session/end", post(end_session))
        .route("/session/recalculate-level", post(recalculate_level))
        .route("/session/{id}", get(get_session))
}

/// Open a new session on a box.
#[utoipa::path(
    post,
    path = "/session/create",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "The box already has an active session")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    let created = session_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Join an active session, optionally replacing another member.
#[utoipa::path(
    post,
    path = "/session/join",
    tag = "session",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Player joined", body = JoinSessionResponse),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session not active or color taken")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    payload: Result<Json<JoinSessionRequest>, JsonRejection>,
) -> Result<Json<JoinSessionResponse>, AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    Ok(Json(session_service::join_session(&state, payload).await?))
}

/// Session with its members, stats and continuation.
#[utoipa::path(
    get,
    path = "/session/{id}",
    tag = "session",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        SessionQuery
    ),
    responses(
        (status = 200, description = "Session details", body = SessionDetailsResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionDetailsResponse>, AppError> {
    let Query(query) = query?;
    Ok(Json(session_service::get_session(&state, id, query).await?))
}

/// Submit a member's final score.
#[utoipa::path(
    post,
    path = "/session/submit-score",
    tag = "session",
    request_body = SubmitScoreRequest,
    responses(
        (status = 200, description = "Score recorded", body = SubmitScoreResponse),
        (status = 404, description = "Unknown session or member"),
        (status = 409, description = "Session not active or color taken")
    )
)]
pub async fn submit_score(
    State(state): State<SharedState>,
    payload: Result<Json<SubmitScoreRequest>, JsonRejection>,
) -> Result<Json<SubmitScoreResponse>, AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    Ok(Json(session_service::submit_score(&state, payload).await?))
}

/// Vote to end the session early.
#[utoipa::path(
    post,
    path = "/session/end",
    tag = "session",
    request_body = SessionMemberRequest,
    responses(
        (status = 200, description = "Vote recorded", body = EndSessionResponse),
        (status = 404, description = "Unknown session or member"),
        (status = 409, description = "Session not active")
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    payload: Result<Json<SessionMemberRequest>, JsonRejection>,
) -> Result<Json<EndSessionResponse>, AppError> {
    let Json(payload) = payload?;
    Ok(Json(session_service::vote_end(&state, payload).await?))
}

/// Realign the session level with its members' progress.
#[utoipa::path(
    post,
    path = "/session/recalculate-level",
    tag = "session",
    request_body = SessionMemberRequest,
    responses(
        (status = 200, description = "Level checked", body = RecalculateLevelResponse),
        (status = 404, description = "Unknown session or member"),
        (status = 409, description = "Session not active")
    )
)]
pub async fn recalculate_level(
    State(state): State<SharedState>,
    payload: Result<Json<SessionMemberRequest>, JsonRejection>,
) -> Result<Json<RecalculateLevelResponse>, AppError> {
    let Json(payload) = payload?;
    Ok(Json(
        session_service::recalculate_level(&state, payload).await?,
    ))
}
