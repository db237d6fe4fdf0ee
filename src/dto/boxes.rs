use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::common::{PlayerSummary, SessionSummary};

/// A game box with its current and past sessions.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoxOverviewResponse {
    pub code: String,
    pub registered_at: String,
    pub owner_player_id: Option<Uuid>,
    pub active_session: Option<SessionSummary>,
    /// Every session played on the box, oldest first.
    pub sessions: Vec<SessionSummary>,
}

/// One personal best of a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntryView {
    pub level: u8,
    pub best_nn: i64,
    pub achieved_at: String,
    pub session_id: Uuid,
}

/// Progress journal of a player, lowest level first.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProgressResponse {
    pub player: PlayerSummary,
    pub max_unlocked_level: u8,
    pub entries: Vec<ProgressEntryView>,
}
