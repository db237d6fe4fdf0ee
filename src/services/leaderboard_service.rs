//! Read-only rankings computed from the progress journal.

use std::{cmp::Ordering, collections::HashMap};

use uuid::Uuid;

use crate::{
    dao::models::ProgressEntryEntity,
    dto::{
        format_system_time,
        leaderboard::{LeaderboardEntry, LevelLeaderboardEntry},
    },
    error::ServiceError,
    state::{SharedState, progression::is_valid_level},
};

#[derive(Debug, Default)]
struct Totals {
    total: i64,
    levels: usize,
    highest: u8,
}

/// Players ranked by the sum of their best scores; ties go to more completed levels, then name.
pub async fn overall(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    let store = state.require_session_store().await?;
    let limit = state.config().leaderboard.clamp(limit);

    let journal = store.list_all_progress().await?;
    let totals = totals_by_player(&journal);
    let names = display_names(state, totals.keys().copied().collect()).await?;

    let mut rows: Vec<(Uuid, Totals, String)> = totals
        .into_iter()
        .map(|(id, totals)| {
            let name = names.get(&id).cloned().unwrap_or_default();
            (id, totals, name)
        })
        .collect();
    rows.sort_by(|(_, a, a_name), (_, b, b_name)| {
        b.total
            .cmp(&a.total)
            .then_with(|| b.levels.cmp(&a.levels))
            .then_with(|| a_name.cmp(b_name))
    });

    Ok(rows
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, (player_id, totals, display_name))| LeaderboardEntry {
            rank: index + 1,
            player_id,
            display_name,
            total_nn: totals.total,
            levels_completed: totals.levels,
            highest_level: totals.highest,
        })
        .collect())
}

/// Best scores recorded on one level, highest first; ties go to the earliest achievement.
pub async fn for_level(
    state: &SharedState,
    level: u8,
    limit: Option<usize>,
) -> Result<Vec<LevelLeaderboardEntry>, ServiceError> {
    if !is_valid_level(level) {
        return Err(ServiceError::InvalidInput(format!(
            "level {level} is outside the campaign"
        )));
    }
    let store = state.require_session_store().await?;
    let limit = state.config().leaderboard.clamp(limit);

    let mut entries = store.list_progress_for_level(level).await?;
    entries.sort_by(|a, b| match b.best_score.cmp(&a.best_score) {
        Ordering::Equal => a.achieved_at.cmp(&b.achieved_at),
        other => other,
    });
    entries.truncate(limit);

    let names = display_names(state, entries.iter().map(|e| e.player_id).collect()).await?;

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| LevelLeaderboardEntry {
            rank: index + 1,
            display_name: names.get(&entry.player_id).cloned().unwrap_or_default(),
            player_id: entry.player_id,
            best_nn: entry.best_score,
            achieved_at: format_system_time(entry.achieved_at),
            session_id: entry.session_id,
        })
        .collect())
}

fn totals_by_player(journal: &[ProgressEntryEntity]) -> HashMap<Uuid, Totals> {
    let mut totals: HashMap<Uuid, Totals> = HashMap::new();
    for entry in journal {
        let row = totals.entry(entry.player_id).or_default();
        row.total = row.total.saturating_add(entry.best_score);
        row.levels += 1;
        row.highest = row.highest.max(entry.level);
    }
    totals
}

async fn display_names(
    state: &SharedState,
    ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, String>, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store
        .find_players(ids)
        .await?
        .into_iter()
        .map(|player| (player.id, player.display_name))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::{dao::models::PlayerEntity, state::test_support::memory_state};

    async fn seed(state: &SharedState, name: &str, scores: &[(u8, i64)]) -> Uuid {
        let store = state.require_session_store().await.unwrap();
        let player = PlayerEntity::guest(Uuid::new_v4(), name.into());
        store.insert_player(player.clone()).await.unwrap();
        for (offset, (level, score)) in scores.iter().enumerate() {
            store
                .record_progress(ProgressEntryEntity {
                    player_id: player.id,
                    level: *level,
                    best_score: *score,
                    achieved_at: SystemTime::UNIX_EPOCH + Duration::from_secs(offset as u64),
                    session_id: Uuid::new_v4(),
                })
                .await
                .unwrap();
        }
        player.id
    }

    #[tokio::test]
    async fn overall_ranking_sums_best_scores() {
        let (state, _) = memory_state().await;
        let ava = seed(&state, "Ava", &[(1, 10), (2, 20)]).await;
        let ben = seed(&state, "Ben", &[(1, 30)]).await;
        let cid = seed(&state, "Cid", &[(1, 5)]).await;

        let ranking = overall(&state, None).await.unwrap();

        let order: Vec<Uuid> = ranking.iter().map(|row| row.player_id).collect();
        // Ava and Ben tie on 30; Ava completed more levels.
        assert_eq!(order, vec![ava, ben, cid]);
        assert_eq!(ranking[0].total_nn, 30);
        assert_eq!(ranking[0].levels_completed, 2);
        assert_eq!(ranking[0].highest_level, 2);
        assert_eq!(ranking[2].rank, 3);

        assert_eq!(overall(&state, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn level_ranking_orders_best_scores() {
        let (state, _) = memory_state().await;
        seed(&state, "Ava", &[(1, 10)]).await;
        let ben = seed(&state, "Ben", &[(1, 30)]).await;

        let ranking = for_level(&state, 1, None).await.unwrap();

        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].player_id, ben);
        assert_eq!(ranking[0].display_name, "Ben");
        assert!(matches!(
            for_level(&state, 14, None).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn huge_totals_saturate_instead_of_wrapping() {
        let (state, _) = memory_state().await;
        let whale = seed(&state, "Whale", &[(1, i64::MAX), (2, i64::MAX)]).await;
        seed(&state, "Ava", &[(1, 10)]).await;

        let ranking = overall(&state, None).await.unwrap();

        assert_eq!(ranking[0].player_id, whale);
        assert_eq!(ranking[0].total_nn, i64::MAX);
        assert_eq!(ranking[1].total_nn, 10);
    }
}
