//! Blocking, reports and the admin tools.
//!
//! Blocks are kept in a local cache loaded at sign-in so that
//! [`ChatClient::can_interact_with_user`] never waits on the network. Every
//! change goes to the store first and updates the cache after.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use chatwii_shared::constants::MAINTENANCE_MODE_SETTING;
use chatwii_shared::{Ban, BlockedPair, Report, UserId, ValidationError};
use chatwii_store::ModerationStore;

use crate::error::{ClientError, Result};
use crate::state::{read, write, ChatClient, Session};

impl ChatClient {
    /// False when signed out or when a block exists in either direction.
    pub fn can_interact_with_user(&self, other: &UserId) -> bool {
        let Some(me) = self.current_user() else {
            return false;
        };
        !read(&self.blocked)
            .iter()
            .any(|pair| involves_both(pair, &me, other))
    }

    pub async fn block_user(&self, other: &UserId) -> Result<()> {
        let session = self.session()?;
        if &session.user == other {
            return Err(ClientError::NotAllowed("cannot block yourself".into()));
        }
        if !other.is_path_safe() {
            return Err(ValidationError::InvalidUserId(other.to_string()).into());
        }

        let pair = BlockedPair {
            blocker_id: session.user.clone(),
            blocked_id: other.clone(),
        };
        self.store.block(&pair).await?;
        write(&self.blocked).insert(pair);

        if session.sync.peer().as_ref() == Some(other) {
            self.close_conversation().await?;
        }
        info!(blocked = %other, "User blocked");
        Ok(())
    }

    /// Lift a block the user placed. Returns false if there was none.
    pub async fn unblock_user(&self, other: &UserId) -> Result<bool> {
        let session = self.session()?;
        let removed = self.store.unblock(&session.user, other).await?;
        write(&self.blocked).remove(&BlockedPair {
            blocker_id: session.user.clone(),
            blocked_id: other.clone(),
        });
        if removed {
            info!(unblocked = %other, "User unblocked");
        }
        Ok(removed)
    }

    /// Reload the block cache, picking up blocks other users placed since
    /// sign-in.
    pub async fn refresh_blocks(&self) -> Result<()> {
        let session = self.session()?;
        let pairs = self.store.blocked_pairs(&session.user).await?;
        *write(&self.blocked) = pairs.into_iter().collect();
        Ok(())
    }

    /// Users the signed-in user has blocked.
    pub fn blocked_users(&self) -> Vec<UserId> {
        let Some(me) = self.current_user() else {
            return Vec::new();
        };
        let mut users: Vec<UserId> = read(&self.blocked)
            .iter()
            .filter(|pair| pair.blocker_id == me)
            .map(|pair| pair.blocked_id.clone())
            .collect();
        users.sort();
        users
    }

    pub async fn report_user(
        &self,
        reported: &UserId,
        message_id: Option<Uuid>,
        reason: &str,
    ) -> Result<Report> {
        let session = self.session()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }
        if &session.user == reported {
            return Err(ClientError::NotAllowed("cannot report yourself".into()));
        }

        let report = Report {
            id: Uuid::new_v4(),
            reporter_id: session.user.clone(),
            reported_id: reported.clone(),
            message_id,
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_report(&report).await?;
        info!(reported = %reported, report = %report.id, "User reported");
        Ok(report)
    }

    /// Admin only. Returns newest first.
    pub async fn reports(&self) -> Result<Vec<Report>> {
        let session = self.session()?;
        require_admin(&session)?;
        Ok(self.store.reports().await?)
    }

    /// Ban `target`. Admin only. Without a duration the ban is permanent.
    pub async fn ban_user(
        &self,
        target: &UserId,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<Ban> {
        let session = self.session()?;
        require_admin(&session)?;
        if &session.user == target {
            return Err(ClientError::NotAllowed("cannot ban yourself".into()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }

        let now = Utc::now();
        let ban = Ban {
            id: Uuid::new_v4(),
            user_id: target.clone(),
            reason: reason.to_string(),
            expires_at: duration.map(|d| now + d),
            created_at: now,
        };
        self.store.insert_ban(&ban).await?;
        warn!(
            target = %target,
            admin = %session.user,
            until = ?ban.expires_at,
            "User banned"
        );
        Ok(ban)
    }

    pub async fn active_ban(&self, user: &UserId) -> Result<Option<Ban>> {
        Ok(self.store.active_ban(user, Utc::now()).await?)
    }

    /// Admin only. While on, non-admins cannot sign in.
    pub async fn set_maintenance_mode(&self, enabled: bool) -> Result<()> {
        let session = self.session()?;
        require_admin(&session)?;
        let value = if enabled { "true" } else { "false" };
        self.store
            .set_site_setting(MAINTENANCE_MODE_SETTING, value)
            .await?;
        warn!(admin = %session.user, enabled, "Maintenance mode changed");
        Ok(())
    }
}

fn involves_both(pair: &BlockedPair, a: &UserId, b: &UserId) -> bool {
    (&pair.blocker_id == a && &pair.blocked_id == b)
        || (&pair.blocker_id == b && &pair.blocked_id == a)
}

fn require_admin(session: &Session) -> Result<()> {
    if session.is_admin() {
        Ok(())
    } else {
        Err(ClientError::NotAllowed("admin only".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::session::SignInRequest;
    use crate::state::MockBackends;
    use crate::sync::SyncState;

    fn orion() -> UserId {
        UserId::from("mock-orion")
    }

    async fn signed_in() -> (ChatClient, MockBackends) {
        let (client, backends) = ChatClient::mock(ClientConfig::default()).unwrap();
        client.sign_in(SignInRequest::new("Alice")).await.unwrap();
        (client, backends)
    }

    async fn as_admin() -> (ChatClient, MockBackends) {
        let (client, backends) = ChatClient::mock(ClientConfig::default()).unwrap();
        backends.store.sign_in_as(UserId::from("mock-sentinel"));
        client.restore_session().await.unwrap();
        (client, backends)
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_and_unblock() {
        let (client, _) = signed_in().await;
        assert!(client.can_interact_with_user(&orion()));

        client.block_user(&orion()).await.unwrap();
        assert!(!client.can_interact_with_user(&orion()));
        assert_eq!(client.blocked_users(), vec![orion()]);
        assert!(matches!(
            client.open_conversation(&orion()).await,
            Err(ClientError::Blocked)
        ));

        assert!(client.unblock_user(&orion()).await.unwrap());
        assert!(client.can_interact_with_user(&orion()));
        assert!(!client.unblock_user(&orion()).await.unwrap());
        client.open_conversation(&orion()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_open_peer_closes_conversation() {
        let (client, _) = signed_in().await;
        client.open_conversation(&orion()).await.unwrap();
        client.block_user(&orion()).await.unwrap();
        let session = client.session().unwrap();
        assert_eq!(session.sync.state(), SyncState::Idle);
        assert!(session.typing.lock().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_placed_by_other_side_after_refresh() {
        let (client, backends) = signed_in().await;
        let me = client.current_user().unwrap();
        backends
            .store
            .block(&BlockedPair {
                blocker_id: orion(),
                blocked_id: me,
            })
            .await
            .unwrap();
        assert!(client.can_interact_with_user(&orion()));

        client.refresh_blocks().await.unwrap();
        assert!(!client.can_interact_with_user(&orion()));
        // their block, not ours
        assert!(client.blocked_users().is_empty());
    }

    #[tokio::test]
    async fn test_signed_out_cannot_interact() {
        let (client, _) = ChatClient::mock(ClientConfig::default()).unwrap();
        assert!(!client.can_interact_with_user(&orion()));
        assert!(client.blocked_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_requires_reason() {
        let (client, _) = signed_in().await;
        assert!(matches!(
            client.report_user(&orion(), None, "  ").await,
            Err(ClientError::Validation(ValidationError::MissingReason))
        ));
        let report = client.report_user(&orion(), None, " spam ").await.unwrap();
        assert_eq!(report.reason, "spam");
        assert!(matches!(client.reports().await, Err(ClientError::NotAllowed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_is_admin_only() {
        let (client, _) = signed_in().await;
        assert!(matches!(
            client.ban_user(&orion(), "abuse", None).await,
            Err(ClientError::NotAllowed(_))
        ));
        assert!(client.active_ban(&orion()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_tools() {
        let (client, _) = as_admin().await;

        let ban = client
            .ban_user(&orion(), "abuse", Some(Duration::days(1)))
            .await
            .unwrap();
        assert!(ban.expires_at.is_some());
        assert_eq!(client.active_ban(&orion()).await.unwrap().unwrap().id, ban.id);

        client.set_maintenance_mode(true).await.unwrap();
        assert!(client.maintenance_mode().await.unwrap());
        client.set_maintenance_mode(false).await.unwrap();
        assert!(!client.maintenance_mode().await.unwrap());

        client.report_user(&orion(), None, "spam").await.unwrap();
        assert_eq!(client.reports().await.unwrap().len(), 1);
    }
}
