pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    GameBoxEntity, MagicTokenEntity, PlayerEntity, ProgressEntryEntity, SessionEntity,
    SessionPlayerEntity,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for players, boxes, sessions and their satellites.
///
/// Backends enforce the uniqueness constraints themselves and report violations as
/// [`StorageError::Duplicate`](crate::dao::storage::StorageError::Duplicate):
/// one active session per box, one membership per (session, player), one progress
/// entry per (player, level), unique box codes, player emails and magic tokens.
pub trait SessionStore: Send + Sync {
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    fn find_players(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    fn find_player_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace a player row, returning `false` when it does not exist.
    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<bool>>;

    fn find_box(&self, code: String) -> BoxFuture<'static, StorageResult<Option<GameBoxEntity>>>;
    fn insert_box(&self, game_box: GameBoxEntity) -> BoxFuture<'static, StorageResult<()>>;

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn find_active_session(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Every session ever played on a box, oldest first.
    fn list_sessions_for_box(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Set the level of an active session; `false` when the session is missing or not active.
    fn update_session_level(&self, id: Uuid, level: u8)
    -> BoxFuture<'static, StorageResult<bool>>;
    fn update_session_host(
        &self,
        id: Uuid,
        host_player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Move an active session to completed. Returns `true` only for the caller that performed
    /// the transition.
    fn complete_session(
        &self,
        id: Uuid,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Members of a session in join order.
    fn list_session_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionPlayerEntity>>>;
    fn find_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>>;
    fn insert_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn update_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn delete_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    fn list_progress(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>>;
    fn list_progress_for_level(
        &self,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>>;
    fn list_all_progress(&self) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>>;
    /// Upsert a personal best, keeping the greater score. Returns `true` when the entry was
    /// created or improved.
    fn record_progress(
        &self,
        entry: ProgressEntryEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    fn insert_magic_token(&self, token: MagicTokenEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    fn find_magic_token(
        &self,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<MagicTokenEntity>>>;
    /// Mark a token as used if nobody used it before. Returns `true` for the single winner.
    fn consume_magic_token(
        &self,
        token: String,
        used_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
