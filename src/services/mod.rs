/// Magic-link sign-in and session token handling.
pub mod auth_service;
/// Game box registration and overview.
pub mod box_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Rankings built from the progress journal.
pub mod leaderboard_service;
/// Sign-in link delivery.
pub mod notifier;
/// Player identity resolution and progress.
pub mod player_service;
/// Session lifecycle and level progression.
pub mod session_service;
/// Background storage connection supervisor.
pub mod storage_supervisor;
/// Signed session tokens.
pub mod tokens;
