use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the Neon Expedition backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::join_session,
        crate::routes::session::get_session,
        crate::routes::session::submit_score,
        crate::routes::session::end_session,
        crate::routes::session::recalculate_level,
        crate::routes::auth::request_magic_link,
        crate::routes::auth::verify,
        crate::routes::auth::me,
        crate::routes::auth::logout,
        crate::routes::leaderboard::overall,
        crate::routes::leaderboard::level,
        crate::routes::leaderboard::box_overview,
        crate::routes::leaderboard::player_progress,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::common::PlayerColor,
            crate::dto::common::SessionStatusDto,
            crate::dto::common::NextSessionRef,
            crate::dto::session::SessionStats,
            crate::dto::session::ReferenceScores,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Session lifecycle and level progression"),
        (name = "auth", description = "Magic-link sign-in"),
        (name = "leaderboard", description = "Rankings built from the progress journal"),
        (name = "boxes", description = "Game boxes and their session history"),
        (name = "players", description = "Player progress"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/session/create",
            "/session/{id}",
            "/session/recalculate-level",
            "/auth/verify",
            "/leaderboard/levels/{level}",
            "/players/{id}/progress",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
