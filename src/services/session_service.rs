//! Session lifecycle: creation, joining, level recalculation, score submission, end votes and
//! the level chain that opens the next session once a level is completed.
//!
//! Every mutation first checks that the session is still active through the status transition
//! table. Completion is a conditional write in the store, so journal updates and the next-level
//! session only happen for the request that actually completed the session.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::RetryPolicy,
    dao::{
        models::{
            PlayerColorEntity, PlayerEntity, ProgressEntryEntity, SessionEntity,
            SessionPlayerEntity, SessionStatus,
        },
        session_store::SessionStore,
    },
    dto::{
        common::{NextSessionRef, PlayerSummary, SessionPlayerSummary, SessionSummary},
        format_system_time,
        session::{
            CreateSessionRequest, CreateSessionResponse, EndSessionResponse, JoinSessionRequest,
            JoinSessionResponse, RecalculateLevelResponse, ReferenceScores, SessionDetailsResponse,
            SessionMemberRequest, SessionMemberView, SessionQuery, SessionStats,
            SessionWithPlayers, SubmitScoreRequest, SubmitScoreResponse,
        },
    },
    error::ServiceError,
    services::{
        box_service::{ensure_box, normalize_box_code},
        player_service::{resolve_or_create_player, unlocked_level_of},
    },
    state::{
        SharedState,
        lifecycle::{CompletionReason, SessionEvent},
        progression::{LevelChange, MIN_LEVEL, next_level, required_session_level},
    },
};

/// Open a new session on a box, registering the box on first use.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<CreateSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let box_code = normalize_box_code(&request.box_id);
    ensure_box(&store, &box_code).await?;

    if let Some(active) = store.find_active_session(box_code.clone()).await? {
        return Err(active_session_conflict(&box_code, active.id));
    }

    let player = resolve_or_create_player(&store, request.player_id, &request.player_name).await?;

    let session = SessionEntity {
        id: Uuid::new_v4(),
        box_code: box_code.clone(),
        level: request.universe_level,
        status: SessionStatus::Active,
        host_player_id: player.id,
        started_at: SystemTime::now(),
        ended_at: None,
    };

    if let Err(err) = store.insert_session(session.clone()).await {
        if err.is_duplicate() {
            return Err(ServiceError::Conflict(format!(
                "box `{box_code}` already has an active session"
            )));
        }
        return Err(err.into());
    }

    let host = SessionPlayerEntity::new(
        session.id,
        player.id,
        request.player_color.map(PlayerColorEntity::from),
    );
    store.insert_session_player(host).await?;

    info!(
        session_id = %session.id,
        box_code = %session.box_code,
        level = session.level,
        host = %player.id,
        "session created"
    );

    Ok(CreateSessionResponse {
        session: SessionSummary::from(&session),
        player: PlayerSummary::from(&player),
    })
}

/// Join an active session, optionally replacing another member, and realign its level.
pub async fn join_session(
    state: &SharedState,
    request: JoinSessionRequest,
) -> Result<JoinSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let mut session = load_active_session(&store, request.session_id, SessionEvent::Update).await?;
    let player = resolve_or_create_player(&store, request.player_id, &request.player_name).await?;

    let replaced = request.replace_player_id.filter(|id| *id != player.id);
    let stale = match replaced {
        Some(replaced) => store.find_session_player(session.id, replaced).await?,
        None => None,
    };
    // The new identity keeps the seat's color unless it asked for another one.
    let requested_color = request
        .player_color
        .map(PlayerColorEntity::from)
        .or_else(|| stale.as_ref().and_then(|member| member.color));

    // Every check runs before the replaced seat is released so a rejected join changes nothing.
    let existing = store.find_session_player(session.id, player.id).await?;
    if existing.is_none() {
        let remaining: Vec<SessionPlayerEntity> = store
            .list_session_players(session.id)
            .await?
            .into_iter()
            .filter(|member| Some(member.player_id) != replaced)
            .collect();
        ensure_color_available(&remaining, player.id, requested_color)?;
    }

    if let Some(replaced) = replaced {
        if store.delete_session_player(session.id, replaced).await? {
            info!(
                session_id = %session.id,
                replaced = %replaced,
                player_id = %player.id,
                "membership replaced"
            );
        }
        if session.host_player_id == replaced {
            if store.update_session_host(session.id, player.id).await? {
                session.host_player_id = player.id;
            } else {
                return Err(session_not_found(session.id));
            }
        }
    }

    let (membership, rejoined) = match existing {
        Some(existing) => (existing, true),
        None => {
            let member = SessionPlayerEntity::new(session.id, player.id, requested_color);
            match store.insert_session_player(member.clone()).await {
                Ok(()) => (member, false),
                Err(err) if err.is_duplicate() => {
                    let existing = store
                        .find_session_player(session.id, player.id)
                        .await?
                        .ok_or(ServiceError::Upstream(err))?;
                    (existing, true)
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    let change = realign_level(&store, &mut session).await?;

    info!(
        session_id = %session.id,
        player_id = %player.id,
        rejoined,
        level = session.level,
        "player joined session"
    );

    Ok(JoinSessionResponse {
        session: SessionSummary::from(&session),
        player: PlayerSummary::from(&player),
        session_player: SessionPlayerSummary::from(&membership),
        rejoined,
        level_changed: change.is_some(),
        previous_level: change.map(|c| c.previous),
        new_level: change.map(|c| c.current),
    })
}

/// Re-run the level rule for a session on behalf of one of its members.
pub async fn recalculate_level(
    state: &SharedState,
    request: SessionMemberRequest,
) -> Result<RecalculateLevelResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let mut session =
        load_active_session(&store, request.session_id, SessionEvent::Recalculate).await?;
    require_member(&store, &session, request.player_id).await?;

    let change = realign_level(&store, &mut session).await?;

    Ok(RecalculateLevelResponse {
        session: SessionSummary::from(&session),
        level_changed: change.is_some(),
        previous_level: change.map(|c| c.previous),
        new_level: change.map(|c| c.current),
    })
}

/// Record a member's final score and complete the level once every member has submitted.
pub async fn submit_score(
    state: &SharedState,
    request: SubmitScoreRequest,
) -> Result<SubmitScoreResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_active_session(&store, request.session_id, SessionEvent::Update).await?;
    let mut member = require_member(&store, &session, request.player_id).await?;

    if let Some(color) = request.color.map(PlayerColorEntity::from) {
        let members = store.list_session_players(session.id).await?;
        ensure_color_available(&members, member.player_id, Some(color))?;
        member.color = Some(color);
    }
    if let Some(starting) = request.starting_nn {
        member.starting_score = starting;
    }
    member.final_score = Some(request.final_nn);

    if !store.update_session_player(member.clone()).await? {
        return Err(not_a_member(session.id, member.player_id));
    }

    let members = store.list_session_players(session.id).await?;
    let total_players = members.len();
    let submitted_count = members.iter().filter(|m| m.final_score.is_some()).count();
    let all_submitted = total_players > 0 && submitted_count == total_players;

    debug!(
        session_id = %session.id,
        player_id = %member.player_id,
        submitted_count,
        total_players,
        "score submitted"
    );

    let mut response = SubmitScoreResponse {
        session_player: SessionPlayerSummary::from(&member),
        all_submitted,
        submitted_count,
        total_players,
        session_completed: false,
        next_session: None,
    };

    if all_submitted {
        let outcome =
            complete_level(&store, state.config().next_session_retry, &session, &members).await?;
        if !outcome.completed_here {
            debug!(session_id = %session.id, "completion handled by a concurrent submission");
        }
        response.session_completed = true;
        response.next_session = outcome.next_session.as_ref().map(NextSessionRef::from);
    }

    Ok(response)
}

/// Register a member's vote to end; the session completes once everyone voted.
///
/// This exit does not touch the progress journal and does not open the next level.
pub async fn vote_end(
    state: &SharedState,
    request: SessionMemberRequest,
) -> Result<EndSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_active_session(&store, request.session_id, SessionEvent::Update).await?;
    let mut member = require_member(&store, &session, request.player_id).await?;

    if !member.voted_to_end {
        member.voted_to_end = true;
        if !store.update_session_player(member.clone()).await? {
            return Err(not_a_member(session.id, member.player_id));
        }
    }

    let members = store.list_session_players(session.id).await?;
    let total_players = members.len();
    let voted_count = members.iter().filter(|m| m.voted_to_end).count();
    let everyone_voted = total_players > 0 && voted_count == total_players;

    if everyone_voted {
        session
            .status
            .apply(SessionEvent::Complete(CompletionReason::AllVotedToEnd))
            .map_err(|_| ServiceError::NotActive(session.id))?;
        if store.complete_session(session.id, SystemTime::now()).await? {
            info!(session_id = %session.id, level = session.level, "session ended by vote");
        }
    }

    Ok(EndSessionResponse {
        session_completed: everyone_voted,
        voted_count,
        total_players,
    })
}

/// Session with its members, progress stats, continuation and reference scores.
pub async fn get_session(
    state: &SharedState,
    session_id: Uuid,
    query: SessionQuery,
) -> Result<SessionDetailsResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;

    let members = store.list_session_players(session.id).await?;
    let players = players_by_id(&store, &members).await?;

    let stats = SessionStats {
        total_players: members.len(),
        submitted_count: members.iter().filter(|m| m.final_score.is_some()).count(),
        voted_count: members.iter().filter(|m| m.voted_to_end).count(),
    };

    let next_session = if session.status == SessionStatus::Active {
        None
    } else {
        store
            .find_active_session(session.box_code.clone())
            .await?
            .filter(|next| next.id != session.id)
            .as_ref()
            .map(NextSessionRef::from)
    };

    let reference_scores = match query.player_id {
        Some(player_id) => Some(reference_scores(&store, player_id, session.level).await?),
        None => None,
    };

    let views = members
        .iter()
        .map(|member| member_view(member, players.get(&member.player_id)))
        .collect();

    Ok(SessionDetailsResponse {
        session: SessionWithPlayers {
            session: SessionSummary::from(&session),
            players: views,
        },
        stats,
        next_session,
        reference_scores,
    })
}

/// Result of the level-completion transition.
#[derive(Debug)]
pub(crate) struct LevelOutcome {
    /// Whether this call performed the completion (and therefore its side effects).
    pub completed_here: bool,
    /// Session continuing the campaign, if any.
    pub next_session: Option<SessionEntity>,
}

/// Complete a level whose members all submitted a score.
///
/// Only the caller winning the conditional completion records progress and opens the next
/// level; the others report the box's current active session.
pub(crate) async fn complete_level(
    store: &Arc<dyn SessionStore>,
    retry: RetryPolicy,
    session: &SessionEntity,
    members: &[SessionPlayerEntity],
) -> Result<LevelOutcome, ServiceError> {
    session
        .status
        .apply(SessionEvent::Complete(CompletionReason::AllScoresSubmitted))
        .map_err(|_| ServiceError::NotActive(session.id))?;

    let ended_at = SystemTime::now();
    if !store.complete_session(session.id, ended_at).await? {
        debug!(session_id = %session.id, "session already completed by another request");
        let next_session = store
            .find_active_session(session.box_code.clone())
            .await?
            .filter(|next| next.id != session.id);
        return Ok(LevelOutcome {
            completed_here: false,
            next_session,
        });
    }

    for member in members {
        let Some(score) = member.final_score else {
            continue;
        };
        let improved = store
            .record_progress(ProgressEntryEntity {
                player_id: member.player_id,
                level: session.level,
                best_score: score,
                achieved_at: ended_at,
                session_id: session.id,
            })
            .await?;
        if improved {
            debug!(player_id = %member.player_id, level = session.level, score, "personal best recorded");
        }
    }

    info!(session_id = %session.id, level = session.level, "level completed");

    let Some(level) = next_level(session.level) else {
        info!(box_code = %session.box_code, "campaign complete");
        return Ok(LevelOutcome {
            completed_here: true,
            next_session: None,
        });
    };

    let next_session = open_next_session(store, retry, session, level, members).await?;
    Ok(LevelOutcome {
        completed_here: true,
        next_session,
    })
}

/// Create the session for `level` and carry every member over with their color.
///
/// A collision with a session created concurrently on the same box is resolved by returning
/// that session. When the retry policy runs out the caller gets `None`.
async fn open_next_session(
    store: &Arc<dyn SessionStore>,
    retry: RetryPolicy,
    previous: &SessionEntity,
    level: u8,
    members: &[SessionPlayerEntity],
) -> Result<Option<SessionEntity>, ServiceError> {
    let attempts = retry.attempts.max(1);

    for attempt in 1..=attempts {
        let next = SessionEntity {
            id: Uuid::new_v4(),
            box_code: previous.box_code.clone(),
            level,
            status: SessionStatus::Active,
            host_player_id: previous.host_player_id,
            started_at: SystemTime::now(),
            ended_at: None,
        };

        match store.insert_session(next.clone()).await {
            Ok(()) => {
                // The previous level is already completed; a seat that cannot be carried is
                // restored when that player joins the new session.
                let mut carried_count = 0;
                for member in members {
                    let carried = SessionPlayerEntity::new(next.id, member.player_id, member.color);
                    match store.insert_session_player(carried).await {
                        Ok(()) => carried_count += 1,
                        Err(err) if err.is_duplicate() => carried_count += 1,
                        Err(err) => warn!(
                            session_id = %next.id,
                            player_id = %member.player_id,
                            error = %err,
                            "could not carry member into the next level session"
                        ),
                    }
                }
                info!(
                    session_id = %next.id,
                    previous_session_id = %previous.id,
                    level,
                    carried = carried_count,
                    members = members.len(),
                    "next level session opened"
                );
                return Ok(Some(next));
            }
            Err(err) if err.is_duplicate() => {
                if let Some(existing) = store.find_active_session(previous.box_code.clone()).await? {
                    debug!(
                        session_id = %existing.id,
                        attempt,
                        "next level session already opened concurrently"
                    );
                    return Ok(Some(existing));
                }
                if attempt < attempts {
                    sleep(retry.delay()).await;
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(
        box_code = %previous.box_code,
        attempts,
        "could not open or find the next level session"
    );
    Ok(None)
}

/// Align the session level with the least progressed member, persisting only actual changes.
async fn realign_level(
    store: &Arc<dyn SessionStore>,
    session: &mut SessionEntity,
) -> Result<Option<LevelChange>, ServiceError> {
    let members = store.list_session_players(session.id).await?;
    let players = players_by_id(store, &members).await?;

    let mut unlocked = Vec::with_capacity(members.len());
    for member in &members {
        match players.get(&member.player_id) {
            Some(player) => unlocked.push(unlocked_level_of(store, player).await?),
            None => {
                warn!(
                    session_id = %session.id,
                    player_id = %member.player_id,
                    "member without player record; treating as first level"
                );
                unlocked.push(MIN_LEVEL);
            }
        }
    }

    let Some(required) = required_session_level(unlocked) else {
        return Ok(None);
    };
    let Some(change) = LevelChange::between(session.level, required) else {
        return Ok(None);
    };

    if !store.update_session_level(session.id, required).await? {
        return Err(ServiceError::NotActive(session.id));
    }
    session.level = required;

    info!(
        session_id = %session.id,
        previous_level = change.previous,
        new_level = change.current,
        "session level recalculated"
    );
    Ok(Some(change))
}

async fn load_active_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    event: SessionEvent,
) -> Result<SessionEntity, ServiceError> {
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;
    session
        .status
        .apply(event)
        .map_err(|_| ServiceError::NotActive(session_id))?;
    Ok(session)
}

async fn require_member(
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
    player_id: Uuid,
) -> Result<SessionPlayerEntity, ServiceError> {
    store
        .find_session_player(session.id, player_id)
        .await?
        .ok_or_else(|| not_a_member(session.id, player_id))
}

async fn players_by_id(
    store: &Arc<dyn SessionStore>,
    members: &[SessionPlayerEntity],
) -> Result<HashMap<Uuid, PlayerEntity>, ServiceError> {
    let ids = members.iter().map(|member| member.player_id).collect();
    let players = store.find_players(ids).await?;
    Ok(players.into_iter().map(|p| (p.id, p)).collect())
}

async fn reference_scores(
    store: &Arc<dyn SessionStore>,
    player_id: Uuid,
    level: u8,
) -> Result<ReferenceScores, ServiceError> {
    let personal_best = store
        .list_progress(player_id)
        .await?
        .into_iter()
        .find(|entry| entry.level == level)
        .map(|entry| entry.best_score);
    let level_record = store
        .list_progress_for_level(level)
        .await?
        .into_iter()
        .map(|entry| entry.best_score)
        .max();

    Ok(ReferenceScores {
        personal_best,
        level_record,
    })
}

fn member_view(member: &SessionPlayerEntity, player: Option<&PlayerEntity>) -> SessionMemberView {
    SessionMemberView {
        player_id: member.player_id,
        display_name: player.map(|p| p.display_name.clone()).unwrap_or_default(),
        is_guest: player.is_none_or(|p| p.is_guest),
        color: member.color.map(Into::into),
        starting_nn: member.starting_score,
        final_nn: member.final_score,
        voted_to_end: member.voted_to_end,
        joined_at: format_system_time(member.joined_at),
    }
}

/// Reject `color` when another member of the session already plays it.
fn ensure_color_available(
    members: &[SessionPlayerEntity],
    player_id: Uuid,
    color: Option<PlayerColorEntity>,
) -> Result<(), ServiceError> {
    let Some(color) = color else {
        return Ok(());
    };
    if members
        .iter()
        .any(|m| m.player_id != player_id && m.color == Some(color))
    {
        return Err(ServiceError::Conflict(format!(
            "color `{color:?}` is already taken in this session"
        )));
    }
    Ok(())
}

fn active_session_conflict(box_code: &str, session_id: Uuid) -> ServiceError {
    ServiceError::Conflict(format!(
        "box `{box_code}` already has an active session `{session_id}`"
    ))
}

fn session_not_found(session_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("session `{session_id}` not found"))
}

fn not_a_member(session_id: Uuid, player_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!(
        "player `{player_id}` is not a member of session `{session_id}`"
    ))
}

#[cfg(test)]
mod tests {
    use futures::future::{BoxFuture, ready};

    use super::*;
    use crate::{
        dao::{
            models::{GameBoxEntity, MagicTokenEntity},
            storage::{StorageError, StorageResult},
        },
        dto::common::{PlayerColor, SessionStatusDto},
        state::{progression::MAX_LEVEL, test_support::memory_state},
    };

    const BOX: &str = "NE-2026-00001";

    fn create_request(level: u8, name: &str, player_id: Option<Uuid>) -> CreateSessionRequest {
        CreateSessionRequest {
            box_id: BOX.into(),
            universe_level: level,
            player_name: name.into(),
            player_color: None,
            player_id,
        }
    }

    fn join_request(session_id: Uuid, name: &str, player_id: Option<Uuid>) -> JoinSessionRequest {
        JoinSessionRequest {
            session_id,
            player_name: name.into(),
            player_color: None,
            player_id,
            replace_player_id: None,
        }
    }

    fn score(session_id: Uuid, player_id: Uuid, final_nn: i64) -> SubmitScoreRequest {
        SubmitScoreRequest {
            session_id,
            player_id,
            final_nn,
            color: None,
            starting_nn: None,
        }
    }

    fn member(session_id: Uuid, player_id: Uuid) -> SessionMemberRequest {
        SessionMemberRequest {
            session_id,
            player_id,
        }
    }

    /// Registered player whose journal covers levels `1..unlocked`.
    async fn registered_player(state: &SharedState, name: &str, unlocked: u8) -> Uuid {
        let store = state.require_session_store().await.unwrap();
        let player = PlayerEntity::registered(
            Uuid::new_v4(),
            name.into(),
            format!("{}@example.com", name.to_lowercase()),
        );
        store.insert_player(player.clone()).await.unwrap();
        for level in 1..unlocked {
            store
                .record_progress(ProgressEntryEntity {
                    player_id: player.id,
                    level,
                    best_score: 5,
                    achieved_at: SystemTime::now(),
                    session_id: Uuid::new_v4(),
                })
                .await
                .unwrap();
        }
        player.id
    }

    async fn best_score(state: &SharedState, player_id: Uuid, level: u8) -> Option<i64> {
        let store = state.require_session_store().await.unwrap();
        store
            .list_progress(player_id)
            .await
            .unwrap()
            .into_iter()
            .find(|entry| entry.level == level)
            .map(|entry| entry.best_score)
    }

    #[tokio::test]
    async fn creating_on_a_fresh_box_opens_an_active_session() {
        let (state, _) = memory_state().await;

        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();

        assert_eq!(created.session.universe_level, 1);
        assert_eq!(created.session.status, SessionStatusDto::Active);
        assert_eq!(created.session.host_player_id, created.player.id);
        assert!(created.player.is_guest);

        let details = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        assert_eq!(details.stats.total_players, 1);
        assert_eq!(details.session.players[0].player_id, created.player.id);
        assert_eq!(details.session.players[0].display_name, "Ava");
    }

    #[tokio::test]
    async fn a_box_holds_one_active_session() {
        let (state, _) = memory_state().await;
        create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();

        let mut second = create_request(1, "Ben", None);
        second.box_id = BOX.to_lowercase();
        let err = create_session(&state, second).await.unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn a_guest_joining_pulls_the_level_down() {
        let (state, _) = memory_state().await;
        let ava = registered_player(&state, "Ava", 5).await;
        let created = create_session(&state, create_request(5, "Ava", Some(ava)))
            .await
            .unwrap();

        let joined = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap();

        assert!(!joined.rejoined);
        assert!(joined.level_changed);
        assert_eq!(joined.previous_level, Some(5));
        assert_eq!(joined.new_level, Some(1));
        assert_eq!(joined.session.universe_level, 1);
    }

    #[tokio::test]
    async fn rejoining_does_not_duplicate_the_membership() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let first = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap();

        let again = join_session(
            &state,
            join_request(created.session.id, "Ben", Some(first.player.id)),
        )
        .await
        .unwrap();

        assert!(again.rejoined);
        assert!(!again.level_changed);
        let details = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        assert_eq!(details.stats.total_players, 2);
    }

    #[tokio::test]
    async fn taken_colors_are_rejected() {
        let (state, _) = memory_state().await;
        let mut request = create_request(1, "Ava", None);
        request.player_color = Some(PlayerColor::Red);
        let created = create_session(&state, request).await.unwrap();

        let mut join = join_request(created.session.id, "Ben", None);
        join.player_color = Some(PlayerColor::Red);
        let err = join_session(&state, join).await.unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn a_signed_in_player_replacing_a_guest_lifts_the_level() {
        let (state, _) = memory_state().await;
        let ava = registered_player(&state, "Ava", 7).await;
        let created = create_session(&state, create_request(7, "Ava", Some(ava)))
            .await
            .unwrap();
        let mut ben_join = join_request(created.session.id, "Ben", None);
        ben_join.player_color = Some(PlayerColor::Green);
        let ben = join_session(&state, ben_join).await.unwrap();
        assert_eq!(ben.session.universe_level, 1);

        let auth = registered_player(&state, "Auth", 7).await;
        let mut takeover = join_request(created.session.id, "Ben", Some(auth));
        takeover.replace_player_id = Some(ben.player.id);
        let replaced = join_session(&state, takeover).await.unwrap();

        assert_eq!(replaced.player.id, auth);
        assert!(replaced.level_changed);
        assert_eq!(replaced.previous_level, Some(1));
        assert_eq!(replaced.new_level, Some(7));
        assert_eq!(replaced.session_player.color, Some(PlayerColor::Green));

        let details = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        let ids: Vec<Uuid> = details.session.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&ava));
        assert!(ids.contains(&auth));
        assert!(!ids.contains(&ben.player.id));
    }

    #[tokio::test]
    async fn replacing_the_host_hands_over_hosting() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Guest", None))
            .await
            .unwrap();
        let auth = registered_player(&state, "Auth", 1).await;

        let mut takeover = join_request(created.session.id, "Auth", Some(auth));
        takeover.replace_player_id = Some(created.player.id);
        let joined = join_session(&state, takeover).await.unwrap();

        assert_eq!(joined.session.host_player_id, auth);
    }

    #[tokio::test]
    async fn recalculation_is_idempotent() {
        let (state, _) = memory_state().await;
        let ava = registered_player(&state, "Ava", 4).await;
        let created = create_session(&state, create_request(9, "Ava", Some(ava)))
            .await
            .unwrap();

        let first = recalculate_level(&state, member(created.session.id, ava))
            .await
            .unwrap();
        let second = recalculate_level(&state, member(created.session.id, ava))
            .await
            .unwrap();

        assert!(first.level_changed);
        assert_eq!(first.new_level, Some(4));
        assert!(!second.level_changed);
        assert_eq!(second.session.universe_level, 4);
    }

    #[tokio::test]
    async fn recalculation_requires_membership() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();

        let err = recalculate_level(&state, member(created.session.id, Uuid::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn all_scores_complete_the_level_and_open_the_next_one() {
        let (state, _) = memory_state().await;
        let mut request = create_request(1, "Ava", None);
        request.player_color = Some(PlayerColor::Blue);
        let created = create_session(&state, request).await.unwrap();
        let ava = created.player.id;
        let mut join = join_request(created.session.id, "Ben", None);
        join.player_color = Some(PlayerColor::Yellow);
        let ben = join_session(&state, join).await.unwrap().player.id;

        let first = submit_score(&state, score(created.session.id, ava, 10))
            .await
            .unwrap();
        assert!(!first.all_submitted);
        assert_eq!(first.submitted_count, 1);
        assert_eq!(first.total_players, 2);
        assert!(first.next_session.is_none());

        let last = submit_score(&state, score(created.session.id, ben, 20))
            .await
            .unwrap();
        assert!(last.all_submitted);
        assert!(last.session_completed);
        let next = last.next_session.expect("next level session");
        assert_eq!(next.universe_level, 2);

        assert_eq!(best_score(&state, ava, 1).await, Some(10));
        assert_eq!(best_score(&state, ben, 1).await, Some(20));

        let previous = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        assert_eq!(previous.session.session.status, SessionStatusDto::Completed);
        assert!(previous.session.session.ended_at.is_some());
        assert_eq!(previous.next_session, Some(next));

        let carried = get_session(&state, next.id, SessionQuery::default())
            .await
            .unwrap();
        assert_eq!(carried.session.session.host_player_id, ava);
        assert_eq!(carried.stats.total_players, 2);
        assert_eq!(carried.stats.submitted_count, 0);
        let colors: HashMap<Uuid, Option<PlayerColor>> = carried
            .session
            .players
            .iter()
            .map(|p| (p.player_id, p.color))
            .collect();
        assert_eq!(colors[&ava], Some(PlayerColor::Blue));
        assert_eq!(colors[&ben], Some(PlayerColor::Yellow));
        assert!(carried.session.players.iter().all(|p| p.final_nn.is_none()));
    }

    #[tokio::test]
    async fn completing_the_last_level_ends_the_campaign() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(MAX_LEVEL, "Ava", None))
            .await
            .unwrap();

        let last = submit_score(&state, score(created.session.id, created.player.id, 42))
            .await
            .unwrap();

        assert!(last.session_completed);
        assert!(last.next_session.is_none());
        assert_eq!(best_score(&state, created.player.id, MAX_LEVEL).await, Some(42));
        let store = state.require_session_store().await.unwrap();
        assert!(store.find_active_session(BOX.into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ending_by_vote_skips_the_journal() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let ben = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap()
            .player
            .id;

        let first = vote_end(&state, member(created.session.id, created.player.id))
            .await
            .unwrap();
        assert!(!first.session_completed);
        assert_eq!(first.voted_count, 1);

        let last = vote_end(&state, member(created.session.id, ben)).await.unwrap();
        assert!(last.session_completed);
        assert_eq!(last.voted_count, 2);
        assert_eq!(last.total_players, 2);

        assert_eq!(best_score(&state, created.player.id, 1).await, None);
        assert_eq!(best_score(&state, ben, 1).await, None);
        let store = state.require_session_store().await.unwrap();
        assert!(store.find_active_session(BOX.into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_sessions_reject_mutations() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(MAX_LEVEL, "Ava", None))
            .await
            .unwrap();
        let id = created.session.id;
        let ava = created.player.id;
        submit_score(&state, score(id, ava, 1)).await.unwrap();

        assert!(matches!(
            submit_score(&state, score(id, ava, 2)).await,
            Err(ServiceError::NotActive(_))
        ));
        assert!(matches!(
            vote_end(&state, member(id, ava)).await,
            Err(ServiceError::NotActive(_))
        ));
        assert!(matches!(
            join_session(&state, join_request(id, "Ben", None)).await,
            Err(ServiceError::NotActive(_))
        ));
        assert!(matches!(
            recalculate_level(&state, member(id, ava)).await,
            Err(ServiceError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let (state, _) = memory_state().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            get_session(&state, id, SessionQuery::default()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            join_session(&state, join_request(id, "Ben", None)).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn personal_bests_never_decrease() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(MAX_LEVEL, "Ava", None))
            .await
            .unwrap();
        let ava = created.player.id;
        submit_score(&state, score(created.session.id, ava, 30))
            .await
            .unwrap();

        let replay = create_session(&state, create_request(MAX_LEVEL, "Ava", Some(ava)))
            .await
            .unwrap();
        submit_score(&state, score(replay.session.id, ava, 12))
            .await
            .unwrap();

        assert_eq!(best_score(&state, ava, MAX_LEVEL).await, Some(30));
    }

    #[tokio::test]
    async fn reference_scores_compare_with_the_level_record() {
        let (state, _) = memory_state().await;
        let ava = registered_player(&state, "Ava", 3).await;
        let ben = registered_player(&state, "Ben", 1).await;
        let store = state.require_session_store().await.unwrap();
        store
            .record_progress(ProgressEntryEntity {
                player_id: ben,
                level: 1,
                best_score: 99,
                achieved_at: SystemTime::now(),
                session_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        let created = create_session(&state, create_request(1, "Ava", Some(ava)))
            .await
            .unwrap();

        let details = get_session(
            &state,
            created.session.id,
            SessionQuery {
                player_id: Some(ava),
            },
        )
        .await
        .unwrap();

        let scores = details.reference_scores.expect("reference scores");
        assert_eq!(scores.personal_best, Some(5));
        assert_eq!(scores.level_record, Some(99));
    }

    #[tokio::test]
    async fn only_the_first_completion_runs_side_effects() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let store = state.require_session_store().await.unwrap();
        let session = store
            .find_session(created.session.id)
            .await
            .unwrap()
            .unwrap();
        let mut ava = store
            .find_session_player(session.id, created.player.id)
            .await
            .unwrap()
            .unwrap();
        ava.final_score = Some(8);
        let members = vec![ava];

        let winner = complete_level(&store, RetryPolicy::default(), &session, &members)
            .await
            .unwrap();
        let loser = complete_level(&store, RetryPolicy::default(), &session, &members)
            .await
            .unwrap();

        assert!(winner.completed_here);
        assert!(!loser.completed_here);
        let next = winner.next_session.expect("next session");
        assert_eq!(loser.next_session.map(|s| s.id), Some(next.id));
        assert_eq!(store.list_sessions_for_box(BOX.into()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_concurrently_opened_session_is_reused() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let store = state.require_session_store().await.unwrap();
        let previous = store
            .find_session(created.session.id)
            .await
            .unwrap()
            .unwrap();

        // The box's session is still active, so inserting another one collides.
        let next = open_next_session(&store, RetryPolicy::default(), &previous, 2, &[])
            .await
            .unwrap();

        assert_eq!(next.map(|s| s.id), Some(previous.id));
    }

    #[tokio::test]
    async fn a_rejected_join_keeps_the_replaced_seat_and_host() {
        let (state, _) = memory_state().await;
        let mut request = create_request(1, "Ava", None);
        request.player_color = Some(PlayerColor::Red);
        let created = create_session(&state, request).await.unwrap();
        let mut ben_join = join_request(created.session.id, "Ben", None);
        ben_join.player_color = Some(PlayerColor::Green);
        let ben = join_session(&state, ben_join).await.unwrap();

        let mut steal_red = join_request(created.session.id, "Cleo", None);
        steal_red.player_color = Some(PlayerColor::Red);
        steal_red.replace_player_id = Some(ben.player.id);
        let err = join_session(&state, steal_red).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let mut steal_green = join_request(created.session.id, "Dan", None);
        steal_green.player_color = Some(PlayerColor::Green);
        steal_green.replace_player_id = Some(created.player.id);
        let err = join_session(&state, steal_green).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let details = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        let ids: Vec<Uuid> = details.session.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&created.player.id));
        assert!(ids.contains(&ben.player.id));
        assert_eq!(details.session.session.host_player_id, created.player.id);
    }

    #[tokio::test]
    async fn a_replacement_may_take_the_replaced_seat_color() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let mut ben_join = join_request(created.session.id, "Ben", None);
        ben_join.player_color = Some(PlayerColor::Blue);
        let ben = join_session(&state, ben_join).await.unwrap();

        let mut takeover = join_request(created.session.id, "Cleo", None);
        takeover.player_color = Some(PlayerColor::Blue);
        takeover.replace_player_id = Some(ben.player.id);
        let joined = join_session(&state, takeover).await.unwrap();

        assert_eq!(joined.session_player.color, Some(PlayerColor::Blue));
    }

    #[tokio::test]
    async fn submitting_a_taken_color_is_rejected() {
        let (state, _) = memory_state().await;
        let mut request = create_request(1, "Ava", None);
        request.player_color = Some(PlayerColor::Yellow);
        let created = create_session(&state, request).await.unwrap();
        let ben = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap();

        let mut clash = score(created.session.id, ben.player.id, 10);
        clash.color = Some(PlayerColor::Yellow);
        let err = submit_score(&state, clash).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let details = get_session(&state, created.session.id, SessionQuery::default())
            .await
            .unwrap();
        assert_eq!(details.stats.submitted_count, 0);

        let mut own = score(created.session.id, ben.player.id, 10);
        own.color = Some(PlayerColor::Blue);
        let accepted = submit_score(&state, own).await.unwrap();
        assert_eq!(accepted.session_player.color, Some(PlayerColor::Blue));
    }

    #[tokio::test]
    async fn submitted_starting_score_is_recorded() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let ben = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap();

        let mut request = score(created.session.id, ben.player.id, 14);
        request.starting_nn = Some(3);
        let submitted = submit_score(&state, request).await.unwrap();
        assert_eq!(submitted.session_player.starting_nn, 3);
        assert_eq!(submitted.session_player.final_nn, Some(14));

        let untouched = submit_score(&state, score(created.session.id, created.player.id, 9))
            .await
            .unwrap();
        assert_eq!(untouched.session_player.starting_nn, 0);
    }

    /// Delegates to another store but refuses memberships of one player.
    struct RefusingMembershipStore {
        inner: Arc<dyn SessionStore>,
        refused: Uuid,
    }

    impl SessionStore for RefusingMembershipStore {
        fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
            self.inner.find_player(id)
        }
        fn find_players(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
            self.inner.find_players(ids)
        }
        fn find_player_by_email(
            &self,
            email: String,
        ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
            self.inner.find_player_by_email(email)
        }
        fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_player(player)
        }
        fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_player(player)
        }
        fn find_box(&self, code: String) -> BoxFuture<'static, StorageResult<Option<GameBoxEntity>>> {
            self.inner.find_box(code)
        }
        fn insert_box(&self, game_box: GameBoxEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_box(game_box)
        }
        fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
            self.inner.find_session(id)
        }
        fn find_active_session(
            &self,
            box_code: String,
        ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
            self.inner.find_active_session(box_code)
        }
        fn list_sessions_for_box(
            &self,
            box_code: String,
        ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
            self.inner.list_sessions_for_box(box_code)
        }
        fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_session(session)
        }
        fn update_session_level(
            &self,
            id: Uuid,
            level: u8,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_session_level(id, level)
        }
        fn update_session_host(
            &self,
            id: Uuid,
            host_player_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_session_host(id, host_player_id)
        }
        fn complete_session(
            &self,
            id: Uuid,
            ended_at: SystemTime,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.complete_session(id, ended_at)
        }
        fn list_session_players(
            &self,
            session_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Vec<SessionPlayerEntity>>> {
            self.inner.list_session_players(session_id)
        }
        fn find_session_player(
            &self,
            session_id: Uuid,
            player_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>> {
            self.inner.find_session_player(session_id, player_id)
        }
        fn insert_session_player(
            &self,
            member: SessionPlayerEntity,
        ) -> BoxFuture<'static, StorageResult<()>> {
            if member.player_id == self.refused {
                return Box::pin(ready(Err(StorageError::unavailable(
                    "membership write refused".into(),
                    std::io::Error::other("connection reset"),
                ))));
            }
            self.inner.insert_session_player(member)
        }
        fn update_session_player(
            &self,
            member: SessionPlayerEntity,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_session_player(member)
        }
        fn delete_session_player(
            &self,
            session_id: Uuid,
            player_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.delete_session_player(session_id, player_id)
        }
        fn list_progress(
            &self,
            player_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
            self.inner.list_progress(player_id)
        }
        fn list_progress_for_level(
            &self,
            level: u8,
        ) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
            self.inner.list_progress_for_level(level)
        }
        fn list_all_progress(&self) -> BoxFuture<'static, StorageResult<Vec<ProgressEntryEntity>>> {
            self.inner.list_all_progress()
        }
        fn record_progress(
            &self,
            entry: ProgressEntryEntity,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.record_progress(entry)
        }
        fn insert_magic_token(
            &self,
            token: MagicTokenEntity,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_magic_token(token)
        }
        fn find_magic_token(
            &self,
            token: String,
        ) -> BoxFuture<'static, StorageResult<Option<MagicTokenEntity>>> {
            self.inner.find_magic_token(token)
        }
        fn consume_magic_token(
            &self,
            token: String,
            used_at: SystemTime,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.consume_magic_token(token, used_at)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[tokio::test]
    async fn an_uncarried_member_does_not_abort_the_next_level() {
        let (state, _) = memory_state().await;
        let created = create_session(&state, create_request(1, "Ava", None))
            .await
            .unwrap();
        let ben = join_session(&state, join_request(created.session.id, "Ben", None))
            .await
            .unwrap();
        let memory = state.require_session_store().await.unwrap();
        let session = memory
            .find_session(created.session.id)
            .await
            .unwrap()
            .unwrap();
        let mut members = memory.list_session_players(session.id).await.unwrap();
        for member in &mut members {
            member.final_score = Some(6);
        }

        let store: Arc<dyn SessionStore> = Arc::new(RefusingMembershipStore {
            inner: memory.clone(),
            refused: ben.player.id,
        });
        let outcome = complete_level(&store, RetryPolicy::default(), &session, &members)
            .await
            .unwrap();

        let next = outcome.next_session.expect("next session");
        assert_eq!(next.level, 2);
        let carried = memory.list_session_players(next.id).await.unwrap();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].player_id, created.player.id);
        assert_eq!(best_score(&state, ben.player.id, 1).await, Some(6));

        // The missing seat is restored by joining the new session.
        let rejoined = join_session(&state, join_request(next.id, "Ben", Some(ben.player.id)))
            .await
            .unwrap();
        assert!(!rejoined.rejoined);
        assert_eq!(memory.list_session_players(next.id).await.unwrap().len(), 2);
    }
}
