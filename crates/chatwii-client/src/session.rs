//! Sign-in, sign-out and the per-session wiring.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chatwii_realtime::{ReconnectOutcome, RetryPolicy, TypingBroadcaster};
use chatwii_shared::constants::{
    CONVERSATION_PAGE_SIZE, LIMITER_MAX_IDLE_MS, LIMITER_PURGE_INTERVAL_MS, MAINTENANCE_MODE_SETTING,
};
use chatwii_shared::validation::{suggest_nicknames, validate_age, validate_nickname};
use chatwii_shared::vip::{effective_vip, Capabilities};
use chatwii_shared::{PresenceRecord, Profile, Role, UserId, ValidationError};
use chatwii_store::{ModerationStore, SettingsStore};

use crate::error::{ClientError, Result};
use crate::state::{lock, read, write, ChatClient, Session};
use crate::sync::{ConversationSync, SyncOptions};

/// What the sign-in form collects.
#[derive(Debug, Clone, Default)]
pub struct SignInRequest {
    pub nickname: String,
    pub gender: Option<String>,
    pub age: Option<u8>,
    pub country: Option<String>,
    pub interests: Vec<String>,
}

impl SignInRequest {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Self::default()
        }
    }
}

impl ChatClient {
    /// Anonymous sign-in with a fresh nickname.
    pub async fn sign_in(&self, request: SignInRequest) -> Result<Arc<Session>> {
        if self.current_user().is_some() {
            return Err(ClientError::NotAllowed("already signed in".into()));
        }
        let nickname = validate_nickname(&request.nickname)?;
        let age = request.age.map(validate_age).transpose()?;
        self.ensure_nickname_available(&nickname).await?;

        let user = self.store.sign_in_anonymously().await?;
        let now = Utc::now();
        let profile = Profile {
            id: user,
            nickname,
            role: Role::Standard,
            vip: false,
            gender: request.gender,
            age,
            country: request.country,
            interests: request.interests,
            created_at: now,
        };
        self.open_session(profile, now).await
    }

    /// Resume the provider's persisted session, if there is one.
    pub async fn restore_session(&self) -> Result<Option<Arc<Session>>> {
        if let Some(session) = read(&self.session).clone() {
            return Ok(Some(session));
        }
        let Some(user) = self.store.current_user().await? else {
            return Ok(None);
        };
        let profile = self
            .store
            .get_profile(&user)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("profile {user}")))?;
        self.open_session(profile, Utc::now()).await.map(Some)
    }

    /// Graceful logout: release every listener, stop the monitor, drop
    /// presence, then end the provider session.
    pub async fn sign_out(&self) -> Result<()> {
        let session = write(&self.session).take().ok_or(ClientError::NotSignedIn)?;

        if let Some((_, typing)) = session.typing.lock().await.take() {
            if let Err(e) = typing.close().await {
                warn!(error = %e, "Failed to clear typing state");
            }
        }
        session.sync.deselect();
        let released = self.registry.clear();
        self.monitor.stop();
        for slot in [&session.resync_task, &session.purge_task] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
        if let Err(e) = self.presence.go_offline(&session.user).await {
            warn!(user = %session.user, error = %e, "Failed to remove presence");
        }
        write(&self.blocked).clear();
        self.limiter.clear().await;

        self.store.sign_out().await?;
        info!(user = %session.user, listeners = released, "Signed out");
        Ok(())
    }

    /// Available variations of `base`, for a nickname that was taken.
    pub async fn nickname_suggestions(&self, base: &str, count: usize) -> Vec<String> {
        let candidates = suggest_nicknames(base, count * 2, &mut rand::thread_rng());
        let mut available = Vec::with_capacity(count);
        for candidate in candidates {
            if available.len() == count {
                break;
            }
            if matches!(self.store.is_nickname_available(&candidate).await, Ok(true)) {
                available.push(candidate);
            }
        }
        available
    }

    /// Manual reconnect; a successful one re-fetches the open conversation.
    pub async fn reconnect(&self) -> ReconnectOutcome {
        let outcome = self
            .monitor
            .reconnect_with_backoff(&RetryPolicy::default())
            .await;
        if outcome == ReconnectOutcome::Connected {
            if let Ok(session) = self.session() {
                session.sync.refresh();
            }
        }
        outcome
    }

    /// Select the conversation with `other` and get ready to broadcast
    /// typing in it.
    pub async fn open_conversation(&self, other: &UserId) -> Result<()> {
        let session = self.session()?;
        if !self.can_interact_with_user(other) {
            return Err(ClientError::Blocked);
        }
        if !session.sync.select(other) {
            return Err(ValidationError::InvalidUserId(other.to_string()).into());
        }

        let mut typing = session.typing.lock().await;
        if typing.as_ref().map(|(peer, _)| peer) == Some(other) {
            return Ok(());
        }
        if let Some((_, previous)) = typing.take() {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "Failed to clear typing state");
            }
        }
        *typing = TypingBroadcaster::with_debounce(
            self.realtime.clone(),
            &session.user,
            other,
            self.config.typing_debounce,
        )
        .await?
        .map(|broadcaster| (other.clone(), broadcaster));
        Ok(())
    }

    pub async fn close_conversation(&self) -> Result<()> {
        let session = self.session()?;
        session.sync.deselect();
        if let Some((_, typing)) = session.typing.lock().await.take() {
            typing.close().await?;
        }
        Ok(())
    }

    /// The user typed in the open conversation's input.
    pub async fn typing_keystroke(&self) -> Result<()> {
        let session = self.session()?;
        if let Some((_, typing)) = session.typing.lock().await.as_ref() {
            typing.keystroke();
        }
        Ok(())
    }

    /// Input cleared without sending.
    pub async fn typing_stopped(&self) -> Result<()> {
        let session = self.session()?;
        if let Some((_, typing)) = session.typing.lock().await.as_ref() {
            typing.stop().await?;
        }
        Ok(())
    }

    pub async fn maintenance_mode(&self) -> Result<bool> {
        let value = self.store.site_setting(MAINTENANCE_MODE_SETTING).await?;
        Ok(value.is_some_and(|v| matches!(v.trim(), "true" | "1")))
    }

    /// Fails closed: a slow or failing check rejects the nickname.
    async fn ensure_nickname_available(&self, nickname: &str) -> Result<()> {
        let check = self.store.is_nickname_available(nickname);
        match tokio::time::timeout(self.config.nickname_check_timeout, check).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ValidationError::NicknameTaken.into()),
            Ok(Err(e)) => {
                warn!(error = %e, "Nickname check failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.nickname_check_timeout.as_millis() as u64,
                    "Nickname check timed out"
                );
                Err(ClientError::Timeout("nickname check"))
            }
        }
    }

    /// Admission checks and session wiring. On failure the provider session
    /// is ended again.
    async fn open_session(&self, profile: Profile, now: DateTime<Utc>) -> Result<Arc<Session>> {
        let user = profile.id.clone();
        match self.admit(profile, now).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(sign_out) = self.store.sign_out().await {
                    debug!(user = %user, error = %sign_out, "Sign-out after rejected sign-in failed");
                }
                Err(e)
            }
        }
    }

    async fn admit(&self, mut profile: Profile, now: DateTime<Utc>) -> Result<Arc<Session>> {
        if let Some(ban) = self.store.active_ban(&profile.id, now).await? {
            warn!(user = %profile.id, until = ?ban.expires_at, "Banned user tried to sign in");
            return Err(ClientError::Banned {
                reason: ban.reason,
                until: ban.expires_at,
            });
        }
        if !profile.is_admin() && self.maintenance_mode().await? {
            info!(user = %profile.id, "Sign-in refused during maintenance");
            return Err(ClientError::Maintenance);
        }

        let subscription = self.store.vip_subscription(&profile.id).await?;
        profile.vip = effective_vip(&profile, subscription.as_ref(), now);
        self.store.upsert_profile(&profile).await?;
        let capabilities = Capabilities::for_profile(&profile);

        let pairs = self.store.blocked_pairs(&profile.id).await?;

        // last fallible step; nothing below may fail once presence is up
        if let Err(e) = self
            .presence
            .go_online(&PresenceRecord::from_profile(&profile, now))
            .await
        {
            if let Err(rollback) = self.presence.go_offline(&profile.id).await {
                debug!(user = %profile.id, error = %rollback, "Presence rollback failed");
            }
            return Err(e.into());
        }
        *write(&self.blocked) = pairs.into_iter().collect();

        let network = lock(&self.network_events).take();
        self.monitor.start(network);

        let sync = ConversationSync::with_options(
            profile.id.clone(),
            self.store.clone(),
            self.realtime.clone(),
            self.registry.clone(),
            SyncOptions {
                setup_timeout: self.config.sync_timeout,
                page_size: CONVERSATION_PAGE_SIZE,
                typing_stale: self.config.typing_stale,
            },
        );

        let session = Arc::new(Session {
            user: profile.id.clone(),
            capabilities,
            sync,
            typing: tokio::sync::Mutex::new(None),
            resync_task: Mutex::new(None),
            purge_task: Mutex::new(None),
            profile,
        });
        *lock(&session.resync_task) = Some(self.spawn_resync_on_reconnect(Arc::downgrade(&session)));
        *lock(&session.purge_task) = Some(self.spawn_limiter_purge());
        *write(&self.session) = Some(session.clone());

        info!(
            user = %session.user,
            nickname = %session.profile.nickname,
            role = session.profile.role.as_str(),
            vip = session.profile.vip,
            "Signed in"
        );
        Ok(session)
    }

    fn spawn_limiter_purge(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(LIMITER_PURGE_INTERVAL_MS));
            loop {
                interval.tick().await;
                limiter
                    .purge_stale(Duration::from_millis(LIMITER_MAX_IDLE_MS))
                    .await;
            }
        })
    }

    fn spawn_resync_on_reconnect(&self, session: Weak<Session>) -> tokio::task::JoinHandle<()> {
        let mut states = self.monitor.watch();
        tokio::spawn(async move {
            let mut was_connected = states.borrow_and_update().connected;
            while states.changed().await.is_ok() {
                let connected = states.borrow_and_update().connected;
                if connected && !was_connected {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    debug!(user = %session.user, "Connection restored, re-fetching conversation");
                    session.sync.refresh();
                }
                was_connected = connected;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::state::MockBackends;
    use chatwii_shared::types::presence_path;
    use chatwii_shared::Ban;
    use uuid::Uuid;

    fn mock() -> (ChatClient, MockBackends) {
        ChatClient::mock(ClientConfig::default()).unwrap()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_publishes_presence() {
        let (client, backends) = mock();
        let session = client.sign_in(SignInRequest::new("  Alice ")).await.unwrap();
        assert_eq!(session.profile.nickname, "Alice");
        assert!(!session.profile.vip);
        assert_eq!(session.capabilities.daily_photo_limit, Some(10));

        let path = presence_path(&session.user).unwrap();
        let record = backends.realtime.value_at(&path).unwrap();
        assert_eq!(record["nickname"], "Alice");
        assert!(backends.realtime.on_disconnect_paths().contains(&path));

        settle().await;
        assert!(client.connection().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_rejects_bad_or_taken_nicknames() {
        let (client, _) = mock();
        assert!(matches!(
            client.sign_in(SignInRequest::new("x")).await,
            Err(ClientError::Validation(ValidationError::NicknameLength { .. }))
        ));
        // fixture profile
        assert!(matches!(
            client.sign_in(SignInRequest::new("nova")).await,
            Err(ClientError::Validation(ValidationError::NicknameTaken))
        ));
        let mut request = SignInRequest::new("Youngster");
        request.age = Some(15);
        assert!(matches!(
            client.sign_in(request).await,
            Err(ClientError::Validation(ValidationError::AgeOutOfRange))
        ));
        assert!(client.current_user().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_blocks_non_admins() {
        let (client, backends) = mock();
        backends
            .store
            .set_site_setting(MAINTENANCE_MODE_SETTING, "true")
            .await
            .unwrap();

        let err = client.sign_in(SignInRequest::new("Alice")).await.err().unwrap();
        assert!(matches!(err, ClientError::Maintenance));
        assert!(client.current_user().is_none());
        assert!(backends.realtime.value_at("presence").is_none());

        backends.store.sign_in_as(UserId::from("mock-sentinel"));
        let session = client.restore_session().await.unwrap().unwrap();
        assert!(session.is_admin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_user_cannot_sign_in() {
        let (client, backends) = mock();
        let now = Utc::now();
        backends
            .store
            .insert_ban(&Ban {
                id: Uuid::new_v4(),
                user_id: UserId::from("mock-orion"),
                reason: "spam".into(),
                expires_at: Some(now + chrono::Duration::days(1)),
                created_at: now,
            })
            .await
            .unwrap();

        backends.store.sign_in_as(UserId::from("mock-orion"));
        match client.restore_session().await {
            Err(ClientError::Banned { reason, until }) => {
                assert_eq!(reason, "spam");
                assert!(until.is_some());
            }
            other => panic!("expected ban, got {:?}", other.map(|s| s.map(|s| s.user.clone()))),
        }
        assert!(client.current_user().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vip_fixture_gets_vip_capabilities() {
        let (client, backends) = mock();
        backends.store.sign_in_as(UserId::from("mock-nova"));
        let session = client.restore_session().await.unwrap().unwrap();
        assert!(session.profile.vip);
        assert_eq!(session.capabilities.daily_photo_limit, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_releases_everything() {
        let (client, backends) = mock();
        let session = client.sign_in(SignInRequest::new("Alice")).await.unwrap();
        client
            .open_conversation(&UserId::from("mock-orion"))
            .await
            .unwrap();
        settle().await;
        assert!(!client.registry().is_empty());

        client.sign_out().await.unwrap();

        assert!(client.registry().is_empty());
        assert_eq!(backends.realtime.listener_count(), 0);
        let path = presence_path(&session.user).unwrap();
        assert!(backends.realtime.value_at(&path).is_none());
        assert!(backends.realtime.on_disconnect_paths().is_empty());
        assert!(client.current_user().is_none());
        assert!(matches!(client.sign_out().await, Err(ClientError::NotSignedIn)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_sweeps_idle_send_buckets() {
        let (client, _) = mock();
        let session = client.sign_in(SignInRequest::new("Alice")).await.unwrap();
        let orion = UserId::from("mock-orion");
        client.limiter.check(&orion, Some("hi")).await.unwrap();
        assert_eq!(client.limiter.tracked_receivers().await, 1);

        tokio::time::advance(Duration::from_millis(LIMITER_MAX_IDLE_MS / 2)).await;
        settle().await;
        assert_eq!(client.limiter.tracked_receivers().await, 1);

        tokio::time::advance(Duration::from_millis(LIMITER_MAX_IDLE_MS)).await;
        settle().await;
        assert_eq!(client.limiter.tracked_receivers().await, 0);

        client.sign_out().await.unwrap();
        assert!(lock(&session.purge_task).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_admission_leaves_no_presence() {
        let (client, backends) = mock();
        backends.store.execute_batch("DROP TABLE blocked_users").unwrap();

        assert!(client.sign_in(SignInRequest::new("Ghost")).await.is_err());
        assert!(client.current_user().is_none());
        assert!(backends.realtime.value_at("presence").is_none());
        assert!(!backends
            .realtime
            .on_disconnect_paths()
            .iter()
            .any(|p| p.starts_with("presence")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abrupt_disconnect_removes_presence() {
        let (client, backends) = mock();
        let session = client.sign_in(SignInRequest::new("Alice")).await.unwrap();
        let path = presence_path(&session.user).unwrap();
        assert!(backends.realtime.value_at(&path).is_some());

        backends.realtime.simulate_disconnect();
        settle().await;

        assert!(backends.realtime.value_at(&path).is_none());
        assert!(!client.connection().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_is_debounced_and_cleared_on_close() {
        let (client, backends) = mock();
        let session = client.sign_in(SignInRequest::new("Alice")).await.unwrap();
        let orion = UserId::from("mock-orion");
        client.open_conversation(&orion).await.unwrap();

        let key = chatwii_shared::conversation_key(&session.user, &orion).unwrap();
        let path = chatwii_shared::types::typing_user_path(&key, &session.user);
        for _ in 0..4 {
            client.typing_keystroke().await.unwrap();
            tokio::time::advance(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(backends.realtime.write_count(&path), 0);

        tokio::time::advance(std::time::Duration::from_millis(400)).await;
        settle().await;
        assert_eq!(backends.realtime.write_count(&path), 1);
        assert_eq!(backends.realtime.value_at(&path).unwrap()["isTyping"], true);

        client.close_conversation().await.unwrap();
        assert!(backends.realtime.value_at(&path).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggestions_skip_taken_names() {
        let (client, _) = mock();
        let suggestions = client.nickname_suggestions("Nova", 3).await;
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions.iter().all(|s| !s.eq_ignore_ascii_case("nova")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_pairs_loaded_at_sign_in() {
        let (client, backends) = mock();
        backends
            .store
            .block(&chatwii_shared::BlockedPair {
                blocker_id: UserId::from("mock-atlas"),
                blocked_id: UserId::from("mock-luna"),
            })
            .await
            .unwrap();
        backends.store.sign_in_as(UserId::from("mock-luna"));
        client.restore_session().await.unwrap();

        assert!(!client.can_interact_with_user(&UserId::from("mock-atlas")));
        assert!(client.can_interact_with_user(&UserId::from("mock-orion")));
        assert!(matches!(
            client.open_conversation(&UserId::from("mock-atlas")).await,
            Err(ClientError::Blocked)
        ));
    }
}
