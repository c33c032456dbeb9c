//! # chatwii-store
//!
//! The relational side of Chatwii: profiles, messages, reactions,
//! moderation records and site settings.
//!
//! The client talks to the provider only through the async traits in
//! [`backend`]. [`SqliteStore`] implements them over a synchronous
//! [`Database`] handle that wraps a `rusqlite::Connection` and provides typed
//! CRUD helpers per table.

pub mod backend;
pub mod database;
pub mod fixtures;
pub mod messages;
pub mod migrations;
pub mod moderation;
pub mod profiles;
pub mod reactions;
pub mod settings;
pub mod sqlite;

mod error;

pub use backend::{
    AuthProvider, ChatStore, MessageStore, ModerationStore, ProfileStore, ReactionStore,
    SettingsStore,
};
pub use database::Database;
pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
