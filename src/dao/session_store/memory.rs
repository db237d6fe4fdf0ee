//! In-process [`SessionStore`] backed by concurrent maps.
//!
//! Used by the test-suite and selectable at runtime for local play without MongoDB. Secondary
//! maps stand in for the unique indexes of a real database.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, ready};
use uuid::Uuid;

use super::SessionStore;
use crate::dao::{
    models::{
        GameBoxEntity, MagicTokenEntity, PlayerEntity, ProgressEntryEntity, SessionEntity,
        SessionPlayerEntity, SessionStatus,
    },
    storage::{StorageError, StorageResult},
};

/// [`SessionStore`] keeping every collection in process memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    players: DashMap<Uuid, PlayerEntity>,
    player_emails: DashMap<String, Uuid>,
    boxes: DashMap<String, GameBoxEntity>,
    sessions: DashMap<Uuid, SessionEntity>,
    active_sessions: DashMap<String, Uuid>,
    members: DashMap<(Uuid, Uuid), SessionPlayerEntity>,
    progress: DashMap<(Uuid, u8), ProgressEntryEntity>,
    tokens: DashMap<String, MagicTokenEntity>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_player_row(&self, player: PlayerEntity) -> StorageResult<()> {
        if let Some(email) = player.email.clone() {
            match self.inner.player_emails.entry(email.clone()) {
                Entry::Occupied(_) => return Err(StorageError::duplicate("player email", email)),
                Entry::Vacant(slot) => {
                    slot.insert(player.id);
                }
            }
        }

        match self.inner.players.entry(player.id) {
            Entry::Occupied(_) => {
                if let Some(email) = &player.email {
                    self.inner
                        .player_emails
                        .remove_if(email, |_, owner| *owner == player.id);
                }
                Err(StorageError::duplicate("player", player.id))
            }
            Entry::Vacant(slot) => {
                slot.insert(player);
                Ok(())
            }
        }
    }

    fn update_player_row(&self, player: PlayerEntity) -> StorageResult<bool> {
        let Some(previous) = self.inner.players.get(&player.id).map(|row| row.clone()) else {
            return Ok(false);
        };

        if previous.email != player.email {
            if let Some(email) = player.email.clone() {
                match self.inner.player_emails.entry(email.clone()) {
                    Entry::Occupied(owner) if *owner.get() != player.id => {
                        return Err(StorageError::duplicate("player email", email));
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(player.id);
                    }
                }
            }
            if let Some(old_email) = &previous.email {
                self.inner
                    .player_emails
                    .remove_if(old_email, |_, owner| *owner == player.id);
            }
        }

        self.inner.players.insert(player.id, player);
        Ok(true)
    }

    fn insert_session_row(&self, session: SessionEntity) -> StorageResult<()> {
        if session.status == SessionStatus::Active {
            match self.inner.active_sessions.entry(session.box_code.clone()) {
                Entry::Occupied(_) => {
                    return Err(StorageError::duplicate(
                        "active session for box",
                        &session.box_code,
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(session.id);
                }
            }
        }

        if self.inner.sessions.contains_key(&session.id) {
            self.inner
                .active_sessions
                .remove_if(&session.box_code, |_, id| *id == session.id);
            return Err(StorageError::duplicate("session", session.id));
        }

        self.inner.sessions.insert(session.id, session);
        Ok(())
    }

    fn complete_session_row(&self, id: Uuid, ended_at: SystemTime) -> bool {
        let box_code = {
            let Some(mut session) = self.inner.sessions.get_mut(&id) else {
                return false;
            };
            if session.status != SessionStatus::Active {
                return false;
            }
            session.status = SessionStatus::Completed;
            session.ended_at = Some(ended_at);
            session.box_code.clone()
        };

        self.inner
            .active_sessions
            .remove_if(&box_code, |_, active| *active == id);
        true
    }

    fn record_progress_row(&self, entry: ProgressEntryEntity) -> bool {
        match self.inner.progress.entry((entry.player_id, entry.level)) {
            Entry::Occupied(mut existing) => {
                if entry.best_score > existing.get().best_score {
                    existing.insert(entry);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }
}

fn done<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(ready(value))
}

impl SessionStore for MemorySessionStore {
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        done(Ok(self.inner.players.get(&id).map(|row| row.clone())))
    }

    fn find_players(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let players = ids
            .iter()
            .filter_map(|id| self.inner.players.get(id).map(|row| row.clone()))
            .collect();
        done(Ok(players))
    }

    fn find_player_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let player = self
            .inner
            .player_emails
            .get(&email)
            .and_then(|id| self.inner.players.get(&*id).map(|row| row.clone()));
        done(Ok(player))
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        done(self.insert_player_row(player))
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<bool>> {
        done(self.update_player_row(player))
    }

    fn find_box(&self, code: String) -> BoxFuture<'static, StorageResult<Option<GameBoxEntity>>> {
        done(Ok(self.inner.boxes.get(&code).map(|row| row.clone())))
    }

    fn insert_box(&self, game_box: GameBoxEntity) -> BoxFuture<'static, StorageResult<()>> {
        let result = match self.inner.boxes.entry(game_box.code.clone()) {
            Entry::Occupied(_) => Err(StorageError::duplicate("box", game_box.code)),
            Entry::Vacant(slot) => {
                slot.insert(game_box);
                Ok(())
            }
        };
        done(result)
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        done(Ok(self.inner.sessions.get(&id).map(|row| row.clone())))
    }

    fn find_active_session(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let session = self
            .inner
            .active_sessions
            .get(&box_code)
            .map(|id| *id)
            .and_then(|id| self.inner.sessions.get(&id).map(|row| row.clone()))
            .filter(|session| session.status == SessionStatus::Active);
        done(Ok(session))
    }

    fn list_sessions_for_box(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let mut sessions: Vec<SessionEntity> = self
            .inner
            .sessions
            .iter()
            .filter(|row| row.box_code == box_code)
            .map(|row| row.clone())
            .collect();
        sessions.sort_by_key(|session| session.started_at);
        done(Ok(sessions))
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        done(self.insert_session_row(session))
    }

    fn update_session_level(
        &self,
        id: Uuid,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let updated = match self.inner.sessions.get_mut(&id) {
            Some(mut session) if session.status == SessionStatus::Active => {
                session.level = level;
                true
            }
            _ => false,
        };
        done(Ok(updated))
    }

    fn update_session_host(
        &self,
        id: Uuid,
        host_player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let updated = match self.inner.sessions.get_mut(&id) {
            Some(mut session) => {
                session.host_player_id = host_player_id;
                true
            }
            None => false,
        };
        done(Ok(updated))
    }

    fn complete_session(
        &self,
        id: Uuid,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        done(Ok(self.complete_session_row(id, ended_at)))
    }

    fn list_session_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionPlayerEntity>>> {
        let mut members: Vec<SessionPlayerEntity> = self
            .inner
            .members
            .iter()
            .filter(|row| row.session_id == session_id)
            .map(|row| row.clone())
            .collect();
        members.sort_by_key(|member| (member.joined_at, member.player_id));
        done(Ok(members))
    }

    fn find_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>> {
        let member = self
            .inner
            .members
            .get(&(session_id, player_id))
            .map(|row| row.clone());
        done(Ok(member))
    }

    fn insert_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let key = (member.session_id, member.player_id);
        let result = match self.inner.members.entry(key) {
            Entry::Occupied(_) => Err(StorageError::duplicate(
                "session player",
                format!("{}/{}", key.0, key.1),
            )),
            Entry::Vacant(slot) => {
                slot.insert(member);
                Ok(())
            }
        };
        done(result)
    }

    fn update_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let updated = match self
            .inner
            .members
            .get_mut(&(member.session_id, member.player_id))
        {
            Some(mut row) => {
                *row = member;
                true
            }
            None => false,
        };
        done(Ok(updated))
    }

    fn delete_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.inner.members.remove(&(session_id, player_id)).is_some();
        done(Ok(removed))
    }

    fn list_progress(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let mut entries: Vec<ProgressEntryEntity> = self
            .inner
            .progress
            .iter()
            .filter(|row| row.player_id == player_id)
            .map(|row| row.clone())
            .collect();
        entries.sort_by_key(|entry| entry.level);
        done(Ok(entries))
    }

    fn list_progress_for_level(
        &self,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let entries = self
            .inner
            .progress
            .iter()
            .filter(|row| row.level == level)
            .map(|row| row.clone())
            .collect();
        done(Ok(entries))
    }

    fn list_all_progress(&self) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let entries = self.inner.progress.iter().map(|row| row.clone()).collect();
        done(Ok(entries))
    }

    fn record_progress(
        &self,
        entry: ProgressEntryEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        done(Ok(self.record_progress_row(entry)))
    }

    fn insert_magic_token(
        &self,
        token: MagicTokenEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = match self.inner.tokens.entry(token.token.clone()) {
            Entry::Occupied(_) => Err(StorageError::duplicate("magic token", "<redacted>")),
            Entry::Vacant(slot) => {
                slot.insert(token);
                Ok(())
            }
        };
        done(result)
    }

    fn find_magic_token(
        &self,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<MagicTokenEntity>>> {
        done(Ok(self.inner.tokens.get(&token).map(|row| row.clone())))
    }

    fn consume_magic_token(
        &self,
        token: String,
        used_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let consumed = match self.inner.tokens.get_mut(&token) {
            Some(mut row) if row.used_at.is_none() => {
                row.used_at = Some(used_at);
                true
            }
            _ => false,
        };
        done(Ok(consumed))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        done(Ok(()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        done(Ok(()))
    }
}
