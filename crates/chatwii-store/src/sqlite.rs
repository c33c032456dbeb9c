//! [`SqliteStore`]: the relational traits over a local [`Database`].
//!
//! Backs mock mode and tests. Calls lock the connection for the duration of
//! one statement (or one transaction); nothing is held across an await.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use chatwii_shared::vip::VipSubscription;
use chatwii_shared::{
    Ban, BlockedPair, ConversationKey, Message, Profile, Reaction, Report, UserId,
};

use crate::backend::{
    AuthProvider, MessageStore, ModerationStore, ProfileStore, ReactionStore, SettingsStore,
};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::fixtures;

pub struct SqliteStore {
    db: Mutex<Database>,
    session: Mutex<Option<UserId>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            session: Mutex::new(None),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// In-memory store seeded with fixture profiles and site settings.
    pub fn mock() -> Result<Self> {
        let db = Database::open_in_memory()?;
        fixtures::seed(&db, Utc::now())?;
        info!("Opened mock relational store");
        Ok(Self::new(db))
    }

    /// Resume as an existing user, the way the hosted provider restores a
    /// persisted session. Mock mode uses it to log in as a fixture profile.
    pub fn sign_in_as(&self, user: UserId) {
        debug!(user = %user, "Session restored");
        *self.session() = Some(user);
    }

    /// Run raw SQL against the backing database. Mock-mode tooling uses it
    /// to reshape fixtures.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.db().conn().execute_batch(sql)?;
        Ok(())
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> MutexGuard<'_, Option<UserId>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuthProvider for SqliteStore {
    async fn sign_in_anonymously(&self) -> Result<UserId> {
        let id = UserId::from(Uuid::new_v4());
        *self.session() = Some(id.clone());
        debug!(user = %id, "Anonymous session created");
        Ok(id)
    }

    async fn current_user(&self) -> Result<Option<UserId>> {
        Ok(self.session().clone())
    }

    async fn sign_out(&self) -> Result<()> {
        if self.session().take().is_none() {
            return Err(StoreError::NotSignedIn);
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn is_nickname_available(&self, nickname: &str) -> Result<bool> {
        self.db().is_nickname_available(nickname)
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.db().upsert_profile(profile)
    }

    async fn get_profile(&self, id: &UserId) -> Result<Option<Profile>> {
        self.db().get_profile(id)
    }

    async fn vip_subscription(&self, user: &UserId) -> Result<Option<VipSubscription>> {
        self.db().get_vip_subscription(user)
    }

    async fn upsert_vip_subscription(&self, subscription: &VipSubscription) -> Result<()> {
        self.db().upsert_vip_subscription(subscription)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.db().insert_message(message)
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<Message>> {
        match self.db().get_message_by_id(*id) {
            Ok(message) => Ok(Some(message)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn conversation_messages(
        &self,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.db().get_conversation_messages(key, limit)
    }

    async fn tombstone_message(&self, id: &Uuid, at: DateTime<Utc>) -> Result<Message> {
        self.db().tombstone_message(*id, at)
    }

    async fn mark_conversation_read(
        &self,
        reader: &UserId,
        other: &UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        self.db().mark_conversation_read(reader, other, at)
    }

    async fn set_translation(&self, id: &Uuid, text: &str, language_code: &str) -> Result<()> {
        self.db().set_translation(*id, text, language_code)
    }

    async fn daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32> {
        self.db().get_daily_photo_count(user, date)
    }

    async fn increment_daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32> {
        self.db().increment_daily_photo_count(user, date)
    }
}

#[async_trait]
impl ReactionStore for SqliteStore {
    async fn find_reaction(
        &self,
        message_id: &Uuid,
        user: &UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        self.db().find_reaction(*message_id, user, emoji)
    }

    async fn insert_reaction(&self, reaction: &Reaction) -> Result<()> {
        self.db().add_reaction(reaction).map(|_| ())
    }

    async fn delete_reaction(&self, id: &Uuid) -> Result<bool> {
        self.db().remove_reaction(*id)
    }

    async fn reactions_for_message(&self, message_id: &Uuid) -> Result<Vec<Reaction>> {
        self.db().get_reactions_for_message(*message_id)
    }
}

#[async_trait]
impl ModerationStore for SqliteStore {
    async fn block(&self, pair: &BlockedPair) -> Result<()> {
        self.db().block_user(pair)
    }

    async fn unblock(&self, blocker: &UserId, blocked: &UserId) -> Result<bool> {
        self.db().unblock_user(blocker, blocked)
    }

    async fn blocked_pairs(&self, user: &UserId) -> Result<Vec<BlockedPair>> {
        self.db().get_blocked_pairs(user)
    }

    async fn insert_report(&self, report: &Report) -> Result<()> {
        self.db().insert_report(report)
    }

    async fn reports(&self) -> Result<Vec<Report>> {
        self.db().get_reports()
    }

    async fn insert_ban(&self, ban: &Ban) -> Result<()> {
        self.db().insert_ban(ban)
    }

    async fn active_ban(&self, user: &UserId, now: DateTime<Utc>) -> Result<Option<Ban>> {
        self.db().get_active_ban(user, now)
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn site_setting(&self, key: &str) -> Result<Option<String>> {
        self.db().get_site_setting(key)
    }

    async fn set_site_setting(&self, key: &str, value: &str) -> Result<()> {
        self.db().set_site_setting(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_usable_as_chat_store() {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        assert!(store.current_user().await.unwrap().is_none());

        let me = store.sign_in_anonymously().await.unwrap();
        assert!(me.is_path_safe());
        assert_eq!(store.current_user().await.unwrap(), Some(me));

        store.sign_out().await.unwrap();
        assert!(matches!(store.sign_out().await, Err(StoreError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_missing_message_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_message(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_is_seeded() {
        let store = SqliteStore::mock().unwrap();
        assert!(!store.is_nickname_available("Nova").await.unwrap());
        assert_eq!(
            store
                .site_setting(chatwii_shared::constants::MAINTENANCE_MODE_SETTING)
                .await
                .unwrap()
                .as_deref(),
            Some("false")
        );
    }
}
