use thiserror::Error;

/// A realtime or relational payload did not have the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Expected {expected}, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },
}

/// Client-side validation failures. These never reach a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Nickname must be between {min} and {max} characters")]
    NicknameLength { min: usize, max: usize },

    #[error("Nickname must start with a letter")]
    NicknameStart,

    #[error("Nickname may only contain letters, digits, '_' and '-'")]
    NicknameCharacters,

    #[error("This nickname is reserved")]
    NicknameReserved,

    #[error("This nickname is already taken")]
    NicknameTaken,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message exceeds {max} characters")]
    MessageTooLong { max: usize },

    #[error("Reaction must be a single emoji")]
    InvalidReaction,

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Age must be between 18 and 99")]
    AgeOutOfRange,

    #[error("A reason is required")]
    MissingReason,
}
