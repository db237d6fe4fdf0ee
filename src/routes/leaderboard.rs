use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::{
        boxes::{BoxOverviewResponse, PlayerProgressResponse},
        leaderboard::{LeaderboardEntry, LeaderboardQuery, LevelLeaderboardEntry},
    },
    error::AppError,
    services::{box_service, leaderboard_service, player_service},
    state::SharedState,
};

/// Read-only views: rankings, boxes and player progress.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/leaderboard", get(overall))
        .route("/leaderboard/levels/{level}", get(level))
        .route("/boxes/{code}", get(box_overview))
        .route("/players/{id}/progress", get(player_progress))
}

/// Players ranked by their summed best scores.
#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "leaderboard",
    params(LeaderboardQuery),
    responses((status = 200, description = "Overall ranking", body = [LeaderboardEntry]))
)]
pub async fn overall(
    State(state): State<SharedState>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let Query(query) = query?;
    Ok(Json(leaderboard_service::overall(&state, query.limit).await?))
}

/// Best scores on one universe level.
#[utoipa::path(
    get,
    path = "/leaderboard/levels/{level}",
    tag = "leaderboard",
    params(("level" = u8, Path, description = "Universe level (1 to 13)"), LeaderboardQuery),
    responses(
        (status = 200, description = "Level ranking", body = [LevelLeaderboardEntry]),
        (status = 400, description = "Level outside the campaign")
    )
)]
pub async fn level(
    State(state): State<SharedState>,
    Path(level): Path<u8>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<Vec<LevelLeaderboardEntry>>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        leaderboard_service::for_level(&state, level, query.limit).await?,
    ))
}

/// A box with its active session and history.
#[utoipa::path(
    get,
    path = "/boxes/{code}",
    tag = "boxes",
    params(("code" = String, Path, description = "Box code (NE-YYYY-NNNNN)")),
    responses(
        (status = 200, description = "Box overview", body = BoxOverviewResponse),
        (status = 404, description = "Unknown box")
    )
)]
pub async fn box_overview(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<BoxOverviewResponse>, AppError> {
    Ok(Json(box_service::box_overview(&state, &code).await?))
}

/// Progress journal of a player.
#[utoipa::path(
    get,
    path = "/players/{id}/progress",
    tag = "players",
    params(("id" = Uuid, Path, description = "Player identifier")),
    responses(
        (status = 200, description = "Player progress", body = PlayerProgressResponse),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn player_progress(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PlayerProgressResponse>, AppError> {
    Ok(Json(player_service::player_progress(&state, id).await?))
}
