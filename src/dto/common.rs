use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{PlayerColorEntity, PlayerEntity, SessionEntity, SessionPlayerEntity, SessionStatus},
    dto::format_system_time,
};

/// Pawn color a member plays with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Red,
    Blue,
    Green,
    Yellow,
}

impl From<PlayerColor> for PlayerColorEntity {
    fn from(color: PlayerColor) -> Self {
        match color {
            PlayerColor::Red => PlayerColorEntity::Red,
            PlayerColor::Blue => PlayerColorEntity::Blue,
            PlayerColor::Green => PlayerColorEntity::Green,
            PlayerColor::Yellow => PlayerColorEntity::Yellow,
        }
    }
}

impl From<PlayerColorEntity> for PlayerColor {
    fn from(color: PlayerColorEntity) -> Self {
        match color {
            PlayerColorEntity::Red => PlayerColor::Red,
            PlayerColorEntity::Blue => PlayerColor::Blue,
            PlayerColorEntity::Green => PlayerColor::Green,
            PlayerColorEntity::Yellow => PlayerColor::Yellow,
        }
    }
}

/// Lifecycle status exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatusDto {
    Active,
    Completed,
    Abandoned,
}

impl From<SessionStatus> for SessionStatusDto {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Active => SessionStatusDto::Active,
            SessionStatus::Completed => SessionStatusDto::Completed,
            SessionStatus::Abandoned => SessionStatusDto::Abandoned,
        }
    }
}

/// Public projection of a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: Uuid,
    pub display_name: String,
    pub is_guest: bool,
}

impl From<&PlayerEntity> for PlayerSummary {
    fn from(player: &PlayerEntity) -> Self {
        Self {
            id: player.id,
            display_name: player.display_name.clone(),
            is_guest: player.is_guest,
        }
    }
}

/// Session row as exposed by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub box_id: String,
    pub universe_level: u8,
    pub status: SessionStatusDto,
    pub host_player_id: Uuid,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl From<&SessionEntity> for SessionSummary {
    fn from(session: &SessionEntity) -> Self {
        Self {
            id: session.id,
            box_id: session.box_code.clone(),
            universe_level: session.level,
            status: session.status.into(),
            host_player_id: session.host_player_id,
            started_at: format_system_time(session.started_at),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Membership row as exposed by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlayerSummary {
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub color: Option<PlayerColor>,
    pub starting_nn: i64,
    pub final_nn: Option<i64>,
    pub voted_to_end: bool,
    pub joined_at: String,
}

impl From<&SessionPlayerEntity> for SessionPlayerSummary {
    fn from(member: &SessionPlayerEntity) -> Self {
        Self {
            session_id: member.session_id,
            player_id: member.player_id,
            color: member.color.map(PlayerColor::from),
            starting_nn: member.starting_score,
            final_nn: member.final_score,
            voted_to_end: member.voted_to_end,
            joined_at: format_system_time(member.joined_at),
        }
    }
}

/// Reference to the session that continues a box's campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NextSessionRef {
    pub id: Uuid,
    pub universe_level: u8,
}

impl From<&SessionEntity> for NextSessionRef {
    fn from(session: &SessionEntity) -> Self {
        Self {
            id: session.id,
            universe_level: session.level,
        }
    }
}
