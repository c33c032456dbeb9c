//! # chatwii-shared
//!
//! Identifiers, path builders, domain models, payload decoders and the
//! client-side rules shared by every Chatwii crate.

pub mod constants;
pub mod decode;
pub mod error;
pub mod merge;
pub mod models;
pub mod types;
pub mod validation;
pub mod vip;

pub use decode::{Batch, Decode, SnapshotDecode};
pub use error::{DecodeError, ValidationError};
pub use models::*;
pub use types::{conversation_key, ConversationKey, MediaType, Role, UserId};
