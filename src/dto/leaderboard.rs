use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LeaderboardQuery {
    /// Number of rows to return (clamped server-side).
    pub limit: Option<usize>,
}

/// Overall ranking row: sum of a player's best scores across levels.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player_id: Uuid,
    pub display_name: String,
    pub total_nn: i64,
    pub levels_completed: usize,
    pub highest_level: u8,
}

/// Ranking row for a single universe level.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LevelLeaderboardEntry {
    pub rank: usize,
    pub player_id: Uuid,
    pub display_name: String,
    pub best_nn: i64,
    pub achieved_at: String,
    pub session_id: Uuid,
}
