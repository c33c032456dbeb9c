//! The relational provider seam.
//!
//! One trait per table family, plus [`ChatStore`] for code that needs all
//! of them. The hosted provider and [`crate::SqliteStore`] both implement
//! these; the client only ever sees the traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use chatwii_shared::vip::VipSubscription;
use chatwii_shared::{
    Ban, BlockedPair, ConversationKey, Message, Profile, Reaction, Report, UserId,
};

use crate::error::Result;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Create an anonymous session and return its user id.
    async fn sign_in_anonymously(&self) -> Result<UserId>;

    async fn current_user(&self) -> Result<Option<UserId>>;

    async fn sign_out(&self) -> Result<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn is_nickname_available(&self, nickname: &str) -> Result<bool>;

    async fn upsert_profile(&self, profile: &Profile) -> Result<()>;

    async fn get_profile(&self, id: &UserId) -> Result<Option<Profile>>;

    async fn vip_subscription(&self, user: &UserId) -> Result<Option<VipSubscription>>;

    async fn upsert_vip_subscription(&self, subscription: &VipSubscription) -> Result<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// `None` when no message has this id.
    async fn get_message(&self, id: &Uuid) -> Result<Option<Message>>;

    /// Latest `limit` messages, oldest first, with media and reactions.
    async fn conversation_messages(
        &self,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>>;

    async fn tombstone_message(&self, id: &Uuid, at: DateTime<Utc>) -> Result<Message>;

    async fn mark_conversation_read(
        &self,
        reader: &UserId,
        other: &UserId,
        at: DateTime<Utc>,
    ) -> Result<usize>;

    async fn set_translation(&self, id: &Uuid, text: &str, language_code: &str) -> Result<()>;

    async fn daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32>;

    async fn increment_daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32>;
}

#[async_trait]
pub trait ReactionStore: Send + Sync {
    async fn find_reaction(
        &self,
        message_id: &Uuid,
        user: &UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>>;

    async fn insert_reaction(&self, reaction: &Reaction) -> Result<()>;

    async fn delete_reaction(&self, id: &Uuid) -> Result<bool>;

    async fn reactions_for_message(&self, message_id: &Uuid) -> Result<Vec<Reaction>>;
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn block(&self, pair: &BlockedPair) -> Result<()>;

    async fn unblock(&self, blocker: &UserId, blocked: &UserId) -> Result<bool>;

    /// Blocks involving `user` in either direction.
    async fn blocked_pairs(&self, user: &UserId) -> Result<Vec<BlockedPair>>;

    async fn insert_report(&self, report: &Report) -> Result<()>;

    async fn reports(&self) -> Result<Vec<Report>>;

    async fn insert_ban(&self, ban: &Ban) -> Result<()>;

    async fn active_ban(&self, user: &UserId, now: DateTime<Utc>) -> Result<Option<Ban>>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn site_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_site_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Everything the client needs from the relational provider.
pub trait ChatStore:
    AuthProvider + ProfileStore + MessageStore + ReactionStore + ModerationStore + SettingsStore
{
}

impl<T> ChatStore for T where
    T: AuthProvider + ProfileStore + MessageStore + ReactionStore + ModerationStore + SettingsStore
{
}
