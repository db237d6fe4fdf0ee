//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted for a player, in characters.
pub const MAX_PLAYER_NAME_CHARS: usize = 40;

/// Validates a printed box code of the form `NE-YYYY-NNNNN` (letters are case-insensitive).
///
/// # Examples
///
/// ```ignore
/// validate_box_code("NE-2026-00001") // Ok
/// validate_box_code("ne-2026-00001") // Ok
/// validate_box_code("NE-26-00001")   // Err - short year
/// ```
pub fn validate_box_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    let mut parts = code.split('-');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(prefix), Some(year), Some(serial), None)
            if prefix.eq_ignore_ascii_case("NE")
                && is_digits(year, 4)
                && is_digits(serial, 5)
    );

    if !well_formed {
        let mut err = ValidationError::new("box_code_format");
        err.message = Some(format!("Box code must look like NE-YYYY-NNNNN (got `{code}`)").into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name is non-empty once trimmed and not longer than
/// [`MAX_PLAYER_NAME_CHARS`].
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("player_name_empty");
        err.message = Some("Player name must not be empty".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_PLAYER_NAME_CHARS {
        let mut err = ValidationError::new("player_name_length");
        err.message = Some(
            format!("Player name must be at most {MAX_PLAYER_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit())
}
