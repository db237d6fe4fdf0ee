//! Game box registration and overview.

use std::{sync::Arc, time::SystemTime};

use tracing::info;

use crate::{
    dao::{models::GameBoxEntity, session_store::SessionStore},
    dto::{boxes::BoxOverviewResponse, common::SessionSummary, format_system_time},
    error::ServiceError,
    state::SharedState,
};

/// Canonical form of a printed box code.
pub(crate) fn normalize_box_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Register `code` the first time it is seen.
pub(crate) async fn ensure_box(
    store: &Arc<dyn SessionStore>,
    code: &str,
) -> Result<GameBoxEntity, ServiceError> {
    if let Some(existing) = store.find_box(code.to_string()).await? {
        return Ok(existing);
    }

    let game_box = GameBoxEntity {
        code: code.to_string(),
        registered_at: SystemTime::now(),
        owner_player_id: None,
        registration_email: None,
    };

    match store.insert_box(game_box.clone()).await {
        Ok(()) => {
            info!(box_code = %code, "game box registered");
            Ok(game_box)
        }
        Err(err) if err.is_duplicate() => store
            .find_box(code.to_string())
            .await?
            .ok_or(ServiceError::Upstream(err)),
        Err(err) => Err(err.into()),
    }
}

/// Box details with its active session and full history.
pub async fn box_overview(
    state: &SharedState,
    code: &str,
) -> Result<BoxOverviewResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let code = normalize_box_code(code);
    let game_box = store
        .find_box(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("box `{code}` not found")))?;

    let sessions = store.list_sessions_for_box(code.clone()).await?;
    let active_session = store
        .find_active_session(code)
        .await?
        .as_ref()
        .map(SessionSummary::from);

    Ok(BoxOverviewResponse {
        code: game_box.code,
        registered_at: format_system_time(game_box.registered_at),
        owner_player_id: game_box.owner_player_id,
        active_session,
        sessions: sessions.iter().map(SessionSummary::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::memory_state;

    #[test]
    fn box_codes_are_uppercased() {
        assert_eq!(normalize_box_code(" ne-2026-00001 "), "NE-2026-00001");
    }

    #[tokio::test]
    async fn ensure_box_is_idempotent() {
        let (state, _) = memory_state().await;
        let store = state.require_session_store().await.unwrap();

        let first = ensure_box(&store, "NE-2026-00001").await.unwrap();
        let second = ensure_box(&store, "NE-2026-00001").await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_boxes_are_not_found() {
        let (state, _) = memory_state().await;
        assert!(matches!(
            box_overview(&state, "NE-2026-00404").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
