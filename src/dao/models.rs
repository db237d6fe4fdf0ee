use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Identity record shared by memberships, progress entries and magic tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier for the player.
    pub id: Uuid,
    /// Name shown to other members of a session.
    pub display_name: String,
    /// Registered email; always present once the player is no longer a guest.
    pub email: Option<String>,
    /// Guests are capped at the first universe level.
    pub is_guest: bool,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the player row was updated.
    pub updated_at: SystemTime,
}

impl PlayerEntity {
    /// Build a fresh guest player.
    pub fn guest(id: Uuid, display_name: String) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            display_name,
            email: None,
            is_guest: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a fresh registered player bound to `email`.
    pub fn registered(id: Uuid, display_name: String, email: String) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            display_name,
            email: Some(email),
            is_guest: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Physical copy of the game identified by its printed box code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameBoxEntity {
    /// Box code (`NE-YYYY-NNNNN`), stored uppercase.
    pub code: String,
    /// First time the box was seen by the backend.
    pub registered_at: SystemTime,
    /// Player who owns the box, when known.
    pub owner_player_id: Option<Uuid>,
    /// Email given at registration time, when known.
    pub registration_email: Option<String>,
}

/// Persisted lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Players are still playing the level.
    Active,
    /// Every member submitted a score or voted to end.
    Completed,
    /// Reserved; never produced by the lifecycle engine.
    Abandoned,
}

impl SessionStatus {
    /// Lowercase label used in storage filters and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

/// One play-through of one universe level on one box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Code of the box the session is played on.
    pub box_code: String,
    /// Universe level in `1..=13`.
    pub level: u8,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Player who created the session (or inherited it through a replacement).
    pub host_player_id: Uuid,
    /// Start timestamp.
    pub started_at: SystemTime,
    /// Set once the session leaves the active status.
    pub ended_at: Option<SystemTime>,
}

/// Fixed set of pawn colors a member can pick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColorEntity {
    Red,
    Blue,
    Green,
    Yellow,
}

/// Membership of one player in one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPlayerEntity {
    /// Owning session.
    pub session_id: Uuid,
    /// Member.
    pub player_id: Uuid,
    /// Chosen pawn color.
    pub color: Option<PlayerColorEntity>,
    /// Score the member started the level with.
    pub starting_score: i64,
    /// Final score, unset until submitted.
    pub final_score: Option<i64>,
    /// Whether the member voted to end the session early.
    pub voted_to_end: bool,
    /// Join timestamp.
    pub joined_at: SystemTime,
}

impl SessionPlayerEntity {
    /// Build a fresh membership with scores unset.
    pub fn new(session_id: Uuid, player_id: Uuid, color: Option<PlayerColorEntity>) -> Self {
        Self {
            session_id,
            player_id,
            color,
            starting_score: 0,
            final_score: None,
            voted_to_end: false,
            joined_at: SystemTime::now(),
        }
    }
}

/// Personal best of a player on a universe level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEntryEntity {
    /// Player the entry belongs to.
    pub player_id: Uuid,
    /// Universe level.
    pub level: u8,
    /// Best score ever recorded on that level.
    pub best_score: i64,
    /// When the best score was achieved.
    pub achieved_at: SystemTime,
    /// Session where the best score was achieved.
    pub session_id: Uuid,
}

/// One-time sign-in credential delivered by email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MagicTokenEntity {
    /// Opaque token value.
    pub token: String,
    /// Email the link was sent to.
    pub email: String,
    /// Guest player that requested the link, upgraded on verification.
    pub player_id: Option<Uuid>,
    /// Expiry timestamp.
    pub expires_at: SystemTime,
    /// Set on first successful verification.
    pub used_at: Option<SystemTime>,
}

impl MagicTokenEntity {
    /// Whether the token can still be exchanged at `now`.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}
