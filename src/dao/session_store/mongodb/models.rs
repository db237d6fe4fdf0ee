use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::{
    models::{
        GameBoxEntity, MagicTokenEntity, PlayerColorEntity, PlayerEntity, ProgressEntryEntity,
        SessionEntity, SessionPlayerEntity, SessionStatus,
    },
    storage::{StorageError, StorageResult},
};

// Identifiers are stored as their hyphenated string form so documents stay readable in the
// shell and filters do not depend on the binary subtype chosen by the serializer.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    display_name: String,
    email: Option<String>,
    is_guest: bool,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            display_name: value.display_name,
            email: value.email,
            is_guest: value.is_guest,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = StorageError;

    fn try_from(value: MongoPlayerDocument) -> StorageResult<Self> {
        Ok(Self {
            id: parse_uuid("player", &value.id)?,
            display_name: value.display_name,
            email: value.email,
            is_guest: value.is_guest,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoBoxDocument {
    #[serde(rename = "_id")]
    code: String,
    registered_at: DateTime,
    owner_player_id: Option<String>,
    registration_email: Option<String>,
}

impl From<GameBoxEntity> for MongoBoxDocument {
    fn from(value: GameBoxEntity) -> Self {
        Self {
            code: value.code,
            registered_at: DateTime::from_system_time(value.registered_at),
            owner_player_id: value.owner_player_id.map(|id| id.to_string()),
            registration_email: value.registration_email,
        }
    }
}

impl TryFrom<MongoBoxDocument> for GameBoxEntity {
    type Error = StorageError;

    fn try_from(value: MongoBoxDocument) -> StorageResult<Self> {
        Ok(Self {
            code: value.code,
            registered_at: value.registered_at.to_system_time(),
            owner_player_id: value
                .owner_player_id
                .as_deref()
                .map(|id| parse_uuid("box", id))
                .transpose()?,
            registration_email: value.registration_email,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    box_code: String,
    level: i32,
    status: SessionStatus,
    host_player_id: String,
    started_at: DateTime,
    ended_at: Option<DateTime>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            box_code: value.box_code,
            level: i32::from(value.level),
            status: value.status,
            host_player_id: value.host_player_id.to_string(),
            started_at: DateTime::from_system_time(value.started_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = StorageError;

    fn try_from(value: MongoSessionDocument) -> StorageResult<Self> {
        Ok(Self {
            id: parse_uuid("session", &value.id)?,
            box_code: value.box_code,
            level: parse_level("session", value.level)?,
            status: value.status,
            host_player_id: parse_uuid("session", &value.host_player_id)?,
            started_at: value.started_at.to_system_time(),
            ended_at: value.ended_at.map(|at| at.to_system_time()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    player_id: String,
    color: Option<PlayerColorEntity>,
    starting_score: i64,
    final_score: Option<i64>,
    voted_to_end: bool,
    joined_at: DateTime,
}

impl From<SessionPlayerEntity> for MongoSessionPlayerDocument {
    fn from(value: SessionPlayerEntity) -> Self {
        Self {
            id: member_key(value.session_id, value.player_id),
            session_id: value.session_id.to_string(),
            player_id: value.player_id.to_string(),
            color: value.color,
            starting_score: value.starting_score,
            final_score: value.final_score,
            voted_to_end: value.voted_to_end,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl TryFrom<MongoSessionPlayerDocument> for SessionPlayerEntity {
    type Error = StorageError;

    fn try_from(value: MongoSessionPlayerDocument) -> StorageResult<Self> {
        Ok(Self {
            session_id: parse_uuid("session player", &value.session_id)?,
            player_id: parse_uuid("session player", &value.player_id)?,
            color: value.color,
            starting_score: value.starting_score,
            final_score: value.final_score,
            voted_to_end: value.voted_to_end,
            joined_at: value.joined_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoProgressDocument {
    #[serde(rename = "_id")]
    id: String,
    player_id: String,
    level: i32,
    best_score: i64,
    achieved_at: DateTime,
    session_id: String,
}

impl From<ProgressEntryEntity> for MongoProgressDocument {
    fn from(value: ProgressEntryEntity) -> Self {
        Self {
            id: progress_key(value.player_id, value.level),
            player_id: value.player_id.to_string(),
            level: i32::from(value.level),
            best_score: value.best_score,
            achieved_at: DateTime::from_system_time(value.achieved_at),
            session_id: value.session_id.to_string(),
        }
    }
}

impl TryFrom<MongoProgressDocument> for ProgressEntryEntity {
    type Error = StorageError;

    fn try_from(value: MongoProgressDocument) -> StorageResult<Self> {
        Ok(Self {
            player_id: parse_uuid("progress entry", &value.player_id)?,
            level: parse_level("progress entry", value.level)?,
            best_score: value.best_score,
            achieved_at: value.achieved_at.to_system_time(),
            session_id: parse_uuid("progress entry", &value.session_id)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMagicTokenDocument {
    #[serde(rename = "_id")]
    token: String,
    email: String,
    player_id: Option<String>,
    expires_at: DateTime,
    used_at: Option<DateTime>,
}

impl From<MagicTokenEntity> for MongoMagicTokenDocument {
    fn from(value: MagicTokenEntity) -> Self {
        Self {
            token: value.token,
            email: value.email,
            player_id: value.player_id.map(|id| id.to_string()),
            expires_at: DateTime::from_system_time(value.expires_at),
            used_at: value.used_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoMagicTokenDocument> for MagicTokenEntity {
    type Error = StorageError;

    fn try_from(value: MongoMagicTokenDocument) -> StorageResult<Self> {
        Ok(Self {
            token: value.token,
            email: value.email,
            player_id: value
                .player_id
                .as_deref()
                .map(|id| parse_uuid("magic token", id))
                .transpose()?,
            expires_at: value.expires_at.to_system_time(),
            used_at: value.used_at.map(|at| at.to_system_time()),
        })
    }
}

/// Composite primary key of a membership document.
pub fn member_key(session_id: Uuid, player_id: Uuid) -> String {
    format!("{session_id}/{player_id}")
}

/// Composite primary key of a progress document.
pub fn progress_key(player_id: Uuid, level: u8) -> String {
    format!("{player_id}/{level}")
}

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_uuid(entity: &'static str, value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| StorageError::Corrupted {
        entity,
        message: format!("invalid identifier `{value}`: {err}"),
    })
}

fn parse_level(entity: &'static str, value: i32) -> StorageResult<u8> {
    u8::try_from(value).map_err(|_| StorageError::Corrupted {
        entity,
        message: format!("level {value} out of range"),
    })
}
