//! Player identity resolution and progress lookups shared by the session and auth flows.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{models::PlayerEntity, session_store::SessionStore},
    dto::{
        boxes::{PlayerProgressResponse, ProgressEntryView},
        common::PlayerSummary,
        format_system_time,
    },
    error::ServiceError,
    state::{SharedState, progression::max_unlocked_level},
};

/// Resolve the player designated by `requested`, creating a guest named `display_name` when
/// no such row exists. A missing requested id is reused for the new guest.
pub(crate) async fn resolve_or_create_player(
    store: &Arc<dyn SessionStore>,
    requested: Option<Uuid>,
    display_name: &str,
) -> Result<PlayerEntity, ServiceError> {
    if let Some(id) = requested {
        if let Some(player) = store.find_player(id).await? {
            return Ok(player);
        }
    }

    let guest = PlayerEntity::guest(
        requested.unwrap_or_else(Uuid::new_v4),
        display_name.trim().to_string(),
    );

    match store.insert_player(guest.clone()).await {
        Ok(()) => {
            info!(player_id = %guest.id, "guest player created");
            Ok(guest)
        }
        Err(err) if err.is_duplicate() => {
            // Another request created the same id first.
            debug!(player_id = %guest.id, "guest player already created concurrently");
            store
                .find_player(guest.id)
                .await?
                .ok_or_else(|| ServiceError::Upstream(err))
        }
        Err(err) => Err(err.into()),
    }
}

/// Highest level `player` may be assigned to, read from their progress journal.
pub(crate) async fn unlocked_level_of(
    store: &Arc<dyn SessionStore>,
    player: &PlayerEntity,
) -> Result<u8, ServiceError> {
    if player.is_guest {
        return Ok(max_unlocked_level(true, []));
    }

    let journal = store.list_progress(player.id).await?;
    Ok(max_unlocked_level(
        false,
        journal.iter().map(|entry| entry.level),
    ))
}

/// Progress journal of a player with the level they have unlocked.
pub async fn player_progress(
    state: &SharedState,
    player_id: Uuid,
) -> Result<PlayerProgressResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let player = store
        .find_player(player_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}` not found")))?;

    let mut journal = store.list_progress(player.id).await?;
    journal.sort_by_key(|entry| entry.level);

    let max_unlocked_level = max_unlocked_level(
        player.is_guest,
        journal.iter().map(|entry| entry.level),
    );

    Ok(PlayerProgressResponse {
        player: PlayerSummary::from(&player),
        max_unlocked_level,
        entries: journal
            .into_iter()
            .map(|entry| ProgressEntryView {
                level: entry.level,
                best_nn: entry.best_score,
                achieved_at: format_system_time(entry.achieved_at),
                session_id: entry.session_id,
            })
            .collect(),
    })
}
