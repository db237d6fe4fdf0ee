//! Request and response bodies of the session lifecycle routes.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::dto::{
    common::{NextSessionRef, PlayerColor, PlayerSummary, SessionPlayerSummary, SessionSummary},
    validation::{validate_box_code, validate_player_name},
};

/// Payload opening a new session on a box.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Printed box code (`NE-YYYY-NNNNN`).
    #[validate(custom(function = "validate_box_code"))]
    pub box_id: String,
    #[validate(range(min = 1, max = 13))]
    pub universe_level: u8,
    #[validate(custom(function = "validate_player_name"))]
    pub player_name: String,
    #[serde(default)]
    pub player_color: Option<PlayerColor>,
    /// Identity the client already holds, if any.
    #[serde(default)]
    pub player_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session: SessionSummary,
    pub player: PlayerSummary,
}

/// Payload joining an active session, optionally taking over another member's seat.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub session_id: Uuid,
    #[validate(custom(function = "validate_player_name"))]
    pub player_name: String,
    #[serde(default)]
    pub player_color: Option<PlayerColor>,
    #[serde(default)]
    pub player_id: Option<Uuid>,
    /// Membership dropped in favour of the resolved player (guest signing in mid-session).
    #[serde(default)]
    pub replace_player_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionResponse {
    pub session: SessionSummary,
    pub player: PlayerSummary,
    pub session_player: SessionPlayerSummary,
    pub rejoined: bool,
    pub level_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_level: Option<u8>,
}

/// Final score reported by one member.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreRequest {
    pub session_id: Uuid,
    pub player_id: Uuid,
    #[validate(range(min = 0))]
    pub final_nn: i64,
    #[serde(default)]
    pub color: Option<PlayerColor>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub starting_nn: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreResponse {
    pub session_player: SessionPlayerSummary,
    pub all_submitted: bool,
    pub submitted_count: usize,
    pub total_players: usize,
    pub session_completed: bool,
    /// Session continuing the campaign; `null` while scores are pending or after the last level.
    pub next_session: Option<NextSessionRef>,
}

/// Identifies a member of a session.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionMemberRequest {
    pub session_id: Uuid,
    pub player_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub session_completed: bool,
    pub voted_count: usize,
    pub total_players: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateLevelResponse {
    pub session: SessionSummary,
    pub level_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_level: Option<u8>,
}

/// Optional viewer of a session, used to compute reference scores.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub player_id: Option<Uuid>,
}

/// Member of a session together with the player details shown on the table.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionMemberView {
    pub player_id: Uuid,
    pub display_name: String,
    pub is_guest: bool,
    pub color: Option<PlayerColor>,
    pub starting_nn: i64,
    pub final_nn: Option<i64>,
    pub voted_to_end: bool,
    pub joined_at: String,
}

/// Session with its members embedded.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithPlayers {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub players: Vec<SessionMemberView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_players: usize,
    pub submitted_count: usize,
    pub voted_count: usize,
}

/// Scores a player can aim for on the session's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceScores {
    /// Viewer's best score on this level.
    pub personal_best: Option<i64>,
    /// Best score anyone recorded on this level.
    pub level_record: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailsResponse {
    pub session: SessionWithPlayers,
    pub stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_session: Option<NextSessionRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_scores: Option<ReferenceScores>,
}
