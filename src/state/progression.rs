//! Universe level progression rules.
//!
//! A player unlocks the level right after the highest level recorded in their progress
//! journal; guests never get past the first level. A session is always played at the
//! highest level every current member has unlocked.

/// First universe level.
pub const MIN_LEVEL: u8 = 1;
/// Last universe level; completing it ends the campaign.
pub const MAX_LEVEL: u8 = 13;

/// Whether `level` is a playable universe level.
pub fn is_valid_level(level: u8) -> bool {
    (MIN_LEVEL..=MAX_LEVEL).contains(&level)
}

/// Highest level a player may be assigned to.
///
/// `journal_levels` lists the levels present in the player's progress journal, in any order.
pub fn max_unlocked_level(is_guest: bool, journal_levels: impl IntoIterator<Item = u8>) -> u8 {
    if is_guest {
        return MIN_LEVEL;
    }

    match journal_levels.into_iter().max() {
        Some(highest) => highest.saturating_add(1).min(MAX_LEVEL),
        None => MIN_LEVEL,
    }
}

/// Level a session must be played at given the unlocked levels of its members, or `None` when
/// the session has no members.
pub fn required_session_level(member_unlocked: impl IntoIterator<Item = u8>) -> Option<u8> {
    member_unlocked.into_iter().min()
}

/// Level movement produced by a recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub previous: u8,
    pub current: u8,
}

impl LevelChange {
    /// Compare the stored level with the required one, returning a change only when they differ.
    pub fn between(previous: u8, required: u8) -> Option<Self> {
        (previous != required).then_some(Self {
            previous,
            current: required,
        })
    }
}

/// Level of the session created when `level` is completed, or `None` at the end of the campaign.
pub fn next_level(level: u8) -> Option<u8> {
    (level < MAX_LEVEL).then(|| level + 1)
}
