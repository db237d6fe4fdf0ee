use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    error::Error as MongoError,
    options::IndexOptions,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoBoxDocument, MongoMagicTokenDocument, MongoPlayerDocument, MongoProgressDocument,
        MongoSessionDocument, MongoSessionPlayerDocument, doc_id, member_key, progress_key,
    },
};
use crate::dao::{
    models::{
        GameBoxEntity, MagicTokenEntity, PlayerEntity, ProgressEntryEntity, SessionEntity,
        SessionPlayerEntity, SessionStatus,
    },
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

const PLAYERS: &str = "players";
const BOXES: &str = "game_boxes";
const SESSIONS: &str = "sessions";
const SESSION_PLAYERS: &str = "session_players";
const PROGRESS: &str = "progress_journal";
const MAGIC_TOKENS: &str = "magic_tokens";

/// Attempts made by [`MongoSessionStore::record_progress`] before giving up on a racing writer.
const PROGRESS_UPSERT_ATTEMPTS: usize = 3;

/// MongoDB-backed [`SessionStore`] implementation.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn read_error(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Read { collection, source }
}

fn write_error(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Write { collection, source }
}

/// Translate an insert failure, surfacing unique index violations as duplicates.
fn insert_error(
    collection: &'static str,
    entity: &'static str,
    key: impl ToString,
) -> impl FnOnce(MongoError) -> StorageError {
    move |source| {
        if is_duplicate_key(&source) {
            StorageError::duplicate(entity, key.to_string())
        } else {
            MongoDaoError::Write { collection, source }.into()
        }
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let indexes: [(&'static str, &'static str, Document, IndexOptions); 4] = [
            (
                SESSIONS,
                "one_active_session_per_box",
                doc! {"box_code": 1},
                IndexOptions::builder()
                    .name(Some("one_active_session_per_box".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(
                        doc! {"status": SessionStatus::Active.as_str()},
                    ))
                    .build(),
            ),
            (
                PLAYERS,
                "unique_player_email",
                doc! {"email": 1},
                IndexOptions::builder()
                    .name(Some("unique_player_email".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(doc! {"email": {"$type": "string"}}))
                    .build(),
            ),
            (
                SESSION_PLAYERS,
                "session_players_by_session",
                doc! {"session_id": 1, "joined_at": 1},
                IndexOptions::builder()
                    .name(Some("session_players_by_session".to_owned()))
                    .build(),
            ),
            (
                PROGRESS,
                "progress_by_level",
                doc! {"level": 1, "best_score": -1},
                IndexOptions::builder()
                    .name(Some("progress_by_level".to_owned()))
                    .build(),
            ),
        ];

        for (collection, index, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync + Serialize + DeserializeOwned,
    {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn find_one_as<D, E>(&self, name: &'static str, filter: Document) -> StorageResult<Option<E>>
    where
        D: Send + Sync + Serialize + DeserializeOwned,
        E: TryFrom<D, Error = StorageError>,
    {
        let document = self
            .collection::<D>(name)
            .await
            .find_one(filter)
            .await
            .map_err(read_error(name))?;
        document.map(E::try_from).transpose()
    }

    async fn find_many_as<D, E>(
        &self,
        name: &'static str,
        filter: Document,
        sort: Document,
    ) -> StorageResult<Vec<E>>
    where
        D: Send + Sync + Serialize + DeserializeOwned,
        E: TryFrom<D, Error = StorageError>,
    {
        let documents: Vec<D> = self
            .collection::<D>(name)
            .await
            .find(filter)
            .sort(sort)
            .await
            .map_err(read_error(name))?
            .try_collect()
            .await
            .map_err(read_error(name))?;
        documents.into_iter().map(E::try_from).collect()
    }

    async fn insert_player(&self, player: PlayerEntity) -> StorageResult<()> {
        let key = player.id;
        let document: MongoPlayerDocument = player.into();
        self.collection::<MongoPlayerDocument>(PLAYERS)
            .await
            .insert_one(&document)
            .await
            .map_err(insert_error(PLAYERS, "player", key))?;
        Ok(())
    }

    async fn update_player(&self, player: PlayerEntity) -> StorageResult<bool> {
        let id = player.id;
        let document: MongoPlayerDocument = player.into();
        let result = self
            .collection::<MongoPlayerDocument>(PLAYERS)
            .await
            .replace_one(doc_id(id), &document)
            .await
            .map_err(insert_error(PLAYERS, "player email", id))?;
        Ok(result.matched_count > 0)
    }

    async fn insert_box(&self, game_box: GameBoxEntity) -> StorageResult<()> {
        let key = game_box.code.clone();
        let document: MongoBoxDocument = game_box.into();
        self.collection::<MongoBoxDocument>(BOXES)
            .await
            .insert_one(&document)
            .await
            .map_err(insert_error(BOXES, "box", key))?;
        Ok(())
    }

    async fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        let key = session.box_code.clone();
        let document: MongoSessionDocument = session.into();
        self.collection::<MongoSessionDocument>(SESSIONS)
            .await
            .insert_one(&document)
            .await
            .map_err(insert_error(SESSIONS, "active session for box", key))?;
        Ok(())
    }

    async fn update_session_fields(
        &self,
        filter: Document,
        update: Document,
    ) -> StorageResult<bool> {
        let result = self
            .collection::<MongoSessionDocument>(SESSIONS)
            .await
            .update_one(filter, update)
            .await
            .map_err(write_error(SESSIONS))?;
        Ok(result.matched_count > 0)
    }

    async fn insert_session_player(&self, member: SessionPlayerEntity) -> StorageResult<()> {
        let key = member_key(member.session_id, member.player_id);
        let document: MongoSessionPlayerDocument = member.into();
        self.collection::<MongoSessionPlayerDocument>(SESSION_PLAYERS)
            .await
            .insert_one(&document)
            .await
            .map_err(insert_error(SESSION_PLAYERS, "session player", key))?;
        Ok(())
    }

    async fn update_session_player(&self, member: SessionPlayerEntity) -> StorageResult<bool> {
        let key = member_key(member.session_id, member.player_id);
        let document: MongoSessionPlayerDocument = member.into();
        let result = self
            .collection::<MongoSessionPlayerDocument>(SESSION_PLAYERS)
            .await
            .replace_one(doc_id(key), &document)
            .await
            .map_err(write_error(SESSION_PLAYERS))?;
        Ok(result.matched_count > 0)
    }

    async fn delete_session_player(&self, session_id: Uuid, player_id: Uuid) -> StorageResult<bool> {
        let result = self
            .collection::<MongoSessionPlayerDocument>(SESSION_PLAYERS)
            .await
            .delete_one(doc_id(member_key(session_id, player_id)))
            .await
            .map_err(write_error(SESSION_PLAYERS))?;
        Ok(result.deleted_count > 0)
    }

    /// Raise the stored best score only when the new one is strictly greater, inserting the
    /// entry when none exists yet. A lost insert race falls back to the conditional update.
    async fn record_progress(&self, entry: ProgressEntryEntity) -> StorageResult<bool> {
        let collection = self
            .collection::<MongoProgressDocument>(PROGRESS)
            .await;
        let key = progress_key(entry.player_id, entry.level);

        for _ in 0..PROGRESS_UPSERT_ATTEMPTS {
            let improved = collection
                .update_one(
                    doc! {"_id": key.as_str(), "best_score": {"$lt": entry.best_score}},
                    doc! {"$set": {
                        "best_score": entry.best_score,
                        "achieved_at": DateTime::from_system_time(entry.achieved_at),
                        "session_id": entry.session_id.to_string(),
                    }},
                )
                .await
                .map_err(write_error(PROGRESS))?;
            if improved.matched_count > 0 {
                return Ok(true);
            }

            let exists = collection
                .find_one(doc_id(&key))
                .await
                .map_err(read_error(PROGRESS))?
                .is_some();
            if exists {
                return Ok(false);
            }

            let document: MongoProgressDocument = entry.clone().into();
            match collection.insert_one(&document).await {
                Ok(_) => return Ok(true),
                Err(err) if is_duplicate_key(&err) => {
                    debug!(key = %key, "progress entry inserted concurrently; retrying update");
                }
                Err(source) => return Err(write_error(PROGRESS)(source).into()),
            }
        }

        Ok(false)
    }

    async fn insert_magic_token(&self, token: MagicTokenEntity) -> StorageResult<()> {
        let document: MongoMagicTokenDocument = token.into();
        self.collection::<MongoMagicTokenDocument>(MAGIC_TOKENS)
            .await
            .insert_one(&document)
            .await
            .map_err(insert_error(MAGIC_TOKENS, "magic token", "<redacted>"))?;
        Ok(())
    }

    async fn consume_magic_token(&self, token: String, used_at: SystemTime) -> StorageResult<bool> {
        let result = self
            .collection::<MongoMagicTokenDocument>(MAGIC_TOKENS)
            .await
            .update_one(
                doc! {"_id": token, "used_at": null},
                doc! {"$set": {"used_at": DateTime::from_system_time(used_at)}},
            )
            .await
            .map_err(write_error(MAGIC_TOKENS))?;
        Ok(result.matched_count > 0)
    }
}

impl SessionStore for MongoSessionStore {
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoPlayerDocument, _>(PLAYERS, doc_id(id))
                .await
        })
    }

    fn find_players(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            store
                .find_many_as::<MongoPlayerDocument, _>(
                    PLAYERS,
                    doc! {"_id": {"$in": ids}},
                    doc! {"_id": 1},
                )
                .await
        })
    }

    fn find_player_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoPlayerDocument, _>(PLAYERS, doc! {"email": email})
                .await
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await })
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_player(player).await })
    }

    fn find_box(&self, code: String) -> BoxFuture<'static, StorageResult<Option<GameBoxEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoBoxDocument, _>(BOXES, doc_id(code))
                .await
        })
    }

    fn insert_box(&self, game_box: GameBoxEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_box(game_box).await })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoSessionDocument, _>(SESSIONS, doc_id(id))
                .await
        })
    }

    fn find_active_session(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoSessionDocument, _>(
                    SESSIONS,
                    doc! {"box_code": box_code, "status": SessionStatus::Active.as_str()},
                )
                .await
        })
    }

    fn list_sessions_for_box(
        &self,
        box_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many_as::<MongoSessionDocument, _>(
                    SESSIONS,
                    doc! {"box_code": box_code},
                    doc! {"started_at": 1},
                )
                .await
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await })
    }

    fn update_session_level(
        &self,
        id: Uuid,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_fields(
                    doc! {"_id": id.to_string(), "status": SessionStatus::Active.as_str()},
                    doc! {"$set": {"level": i32::from(level)}},
                )
                .await
        })
    }

    fn update_session_host(
        &self,
        id: Uuid,
        host_player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_fields(
                    doc_id(id),
                    doc! {"$set": {"host_player_id": host_player_id.to_string()}},
                )
                .await
        })
    }

    fn complete_session(
        &self,
        id: Uuid,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_fields(
                    doc! {"_id": id.to_string(), "status": SessionStatus::Active.as_str()},
                    doc! {"$set": {
                        "status": SessionStatus::Completed.as_str(),
                        "ended_at": DateTime::from_system_time(ended_at),
                    }},
                )
                .await
        })
    }

    fn list_session_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionPlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many_as::<MongoSessionPlayerDocument, _>(
                    SESSION_PLAYERS,
                    doc! {"session_id": session_id.to_string()},
                    doc! {"joined_at": 1, "player_id": 1},
                )
                .await
        })
    }

    fn find_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoSessionPlayerDocument, _>(
                    SESSION_PLAYERS,
                    doc_id(member_key(session_id, player_id)),
                )
                .await
        })
    }

    fn insert_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session_player(member).await })
    }

    fn update_session_player(
        &self,
        member: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_session_player(member).await })
    }

    fn delete_session_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session_player(session_id, player_id).await })
    }

    fn list_progress(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many_as::<MongoProgressDocument, _>(
                    PROGRESS,
                    doc! {"player_id": player_id.to_string()},
                    doc! {"level": 1},
                )
                .await
        })
    }

    fn list_progress_for_level(
        &self,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many_as::<MongoProgressDocument, _>(
                    PROGRESS,
                    doc! {"level": i32::from(level)},
                    doc! {"best_score": -1},
                )
                .await
        })
    }

    fn list_all_progress(&self) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many_as::<MongoProgressDocument, _>(PROGRESS, doc! {}, doc! {"player_id": 1})
                .await
        })
    }

    fn record_progress(
        &self,
        entry: ProgressEntryEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.record_progress(entry).await })
    }

    fn insert_magic_token(
        &self,
        token: MagicTokenEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_magic_token(token).await })
    }

    fn find_magic_token(
        &self,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<MagicTokenEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_as::<MongoMagicTokenDocument, _>(MAGIC_TOKENS, doc_id(token))
                .await
        })
    }

    fn consume_magic_token(
        &self,
        token: String,
        used_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.consume_magic_token(token, used_at).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
