//! Client-side validation rules.
//!
//! Everything here is synchronous and rejects before any backend call.

use rand::Rng;

use crate::constants::{
    MAX_MESSAGE_LEN, MAX_REACTION_CHARS, NICKNAME_MAX_LEN, NICKNAME_MIN_LEN, RESERVED_NICKNAMES,
};
use crate::error::ValidationError;

/// Check a nickname against the registration rules and return it trimmed.
pub fn validate_nickname(raw: &str) -> Result<String, ValidationError> {
    let nickname = raw.trim();
    let len = nickname.chars().count();
    if !(NICKNAME_MIN_LEN..=NICKNAME_MAX_LEN).contains(&len) {
        return Err(ValidationError::NicknameLength {
            min: NICKNAME_MIN_LEN,
            max: NICKNAME_MAX_LEN,
        });
    }
    if !nickname.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::NicknameStart);
    }
    if !nickname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::NicknameCharacters);
    }
    let lower = nickname.to_ascii_lowercase();
    if RESERVED_NICKNAMES.iter().any(|r| lower == *r) {
        return Err(ValidationError::NicknameReserved);
    }
    Ok(nickname.to_string())
}

/// Trim a message body and check its length.
///
/// An empty body is accepted when the message carries an attachment; the
/// result is then `None`.
pub fn validate_message_text(
    raw: Option<&str>,
    has_media: bool,
) -> Result<Option<String>, ValidationError> {
    let text = raw.map(str::trim).filter(|t| !t.is_empty());
    match text {
        None if has_media => Ok(None),
        None => Err(ValidationError::EmptyMessage),
        Some(t) if t.chars().count() > MAX_MESSAGE_LEN => Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_LEN,
        }),
        Some(t) => Ok(Some(t.to_string())),
    }
}

/// A reaction is one emoji: non-empty, no whitespace, short.
pub fn validate_reaction(raw: &str) -> Result<String, ValidationError> {
    let emoji = raw.trim();
    if emoji.is_empty()
        || emoji.chars().count() > MAX_REACTION_CHARS
        || emoji.chars().any(|c| c.is_whitespace() || c.is_ascii_alphanumeric())
    {
        return Err(ValidationError::InvalidReaction);
    }
    Ok(emoji.to_string())
}

pub fn validate_age(age: u8) -> Result<u8, ValidationError> {
    if (18..=99).contains(&age) {
        Ok(age)
    } else {
        Err(ValidationError::AgeOutOfRange)
    }
}

/// Propose alternatives for a nickname that is already taken.
///
/// May return fewer than `count` names when the stem leaves little room for
/// distinct suffixes.
pub fn suggest_nicknames<R: Rng>(base: &str, count: usize, rng: &mut R) -> Vec<String> {
    let stem: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let stem = if stem.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        stem
    } else {
        format!("user{stem}")
    };
    // room for a three-digit suffix
    let stem: String = stem.chars().take(NICKNAME_MAX_LEN - 3).collect();

    let mut out = Vec::with_capacity(count);
    for _ in 0..count.saturating_mul(20) {
        if out.len() == count {
            break;
        }
        let candidate = format!("{}{}", stem, rng.gen_range(10..1000));
        if validate_nickname(&candidate).is_ok() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
