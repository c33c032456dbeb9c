//! Client state shared by every operation.
//!
//! [`ChatClient`] owns the two provider handles and the realtime plumbing
//! that outlives any single conversation. Everything tied to a signed-in
//! user lives in a [`Session`], created at sign-in and dropped at sign-out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chatwii_realtime::{
    ConnectionMonitor, ListenerRegistry, MemoryBackend, NetworkEvent, PresenceDirectory,
    PresenceWriter, RealtimeBackend, TypingBroadcaster,
};
use chatwii_shared::vip::Capabilities;
use chatwii_shared::{BlockedPair, Profile, UserId};
use chatwii_store::{ChatStore, SqliteStore};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rate_limit::SendLimiter;
use crate::settings::ClientSettings;
use crate::sync::ConversationSync;
use crate::translate::{StubTranslator, Translator};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A signed-in user.
pub struct Session {
    /// The auth provider's id for this session.
    pub user: UserId,

    /// Profile as stored at sign-in, with the VIP flag resolved.
    pub profile: Profile,

    /// Media types and daily quota derived from role and VIP state.
    pub capabilities: Capabilities,

    /// Messages of the selected conversation.
    pub sync: ConversationSync<dyn ChatStore>,

    /// Typing broadcaster for the selected conversation, with its peer.
    pub(crate) typing: tokio::sync::Mutex<Option<(UserId, TypingBroadcaster)>>,

    /// Re-fetches the open conversation whenever the connection comes back.
    pub(crate) resync_task: Mutex<Option<JoinHandle<()>>>,

    /// Sweeps idle receivers out of the send limiter.
    pub(crate) purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.profile.is_admin()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for slot in [&self.resync_task, &self.purge_task] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
    }
}

/// The in-process backends behind a mock-mode client.
#[derive(Clone)]
pub struct MockBackends {
    pub realtime: MemoryBackend,
    pub store: Arc<SqliteStore>,
}

/// Central client state.
///
/// Holds the provider handles, the listener registry shared by every
/// channel, the connection monitor and the current session, if any.
pub struct ChatClient {
    /// Effective configuration.
    pub(crate) config: ClientConfig,

    /// Realtime JSON-tree provider (hosted adapter or [`MemoryBackend`]).
    pub(crate) realtime: Arc<dyn RealtimeBackend>,

    /// Relational provider (hosted adapter or [`SqliteStore`]).
    pub(crate) store: Arc<dyn ChatStore>,

    pub(crate) translator: Arc<dyn Translator>,

    /// Every live realtime listener, so sign-out can release them at once.
    pub(crate) registry: Arc<ListenerRegistry>,

    pub(crate) monitor: ConnectionMonitor,

    pub(crate) presence: PresenceWriter,

    pub(crate) limiter: SendLimiter,

    /// Host online/offline events, handed to the monitor at sign-in.
    pub(crate) network_events: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,

    pub(crate) session: RwLock<Option<Arc<Session>>>,

    /// Blocks involving the signed-in user, in either direction.
    pub(crate) blocked: RwLock<HashSet<BlockedPair>>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        realtime: Arc<dyn RealtimeBackend>,
        store: Arc<dyn ChatStore>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        let monitor = ConnectionMonitor::with_throttle(realtime.clone(), config.reconnect_throttle);
        Self {
            presence: PresenceWriter::new(realtime.clone()),
            registry: Arc::new(ListenerRegistry::new()),
            limiter: SendLimiter::default(),
            network_events: Mutex::new(None),
            session: RwLock::new(None),
            blocked: RwLock::new(HashSet::new()),
            config,
            realtime,
            store,
            translator,
            monitor,
        }
    }

    /// A client over in-process backends seeded with demo profiles.
    pub fn mock(config: ClientConfig) -> Result<(Self, MockBackends)> {
        let backends = MockBackends {
            realtime: MemoryBackend::new(),
            store: Arc::new(SqliteStore::mock()?),
        };
        let client = Self::new(
            config,
            Arc::new(backends.realtime.clone()),
            backends.store.clone(),
            Arc::new(StubTranslator),
        );
        tracing::info!("Mock mode enabled");
        Ok((client, backends))
    }

    /// Build the client the configuration asks for. Hosted providers need
    /// vendor adapters passed to [`ChatClient::new`]; only mock mode can be
    /// bootstrapped from configuration alone.
    pub fn bootstrap(config: ClientConfig, settings: &ClientSettings) -> Result<Self> {
        if config.mock_mode(settings) {
            return Self::mock(config).map(|(client, _)| client);
        }
        Err(ClientError::Settings(format!(
            "no provider adapter for realtime={:?} relational={:?}",
            config.realtime_url, config.relational_url
        )))
    }

    /// Feed the host's online/offline notifications to the connection
    /// monitor. Takes effect at the next sign-in.
    pub fn with_network_events(self, events: mpsc::Receiver<NetworkEvent>) -> Self {
        *lock(&self.network_events) = Some(events);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn connection(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn current_user(&self) -> Option<UserId> {
        read(&self.session).as_ref().map(|s| s.user.clone())
    }

    /// The active session, or [`ClientError::NotSignedIn`].
    pub fn session(&self) -> Result<Arc<Session>> {
        read(&self.session).clone().ok_or(ClientError::NotSignedIn)
    }

    /// Live online-users list for the signed-in user.
    pub fn presence_directory(&self) -> Result<PresenceDirectory> {
        let session = self.session()?;
        Ok(PresenceDirectory::new(
            self.realtime.clone(),
            self.registry.clone(),
            session.user.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_starts_signed_out() {
        let (client, backends) = ChatClient::mock(ClientConfig::default()).unwrap();
        assert!(client.current_user().is_none());
        assert!(matches!(client.session(), Err(ClientError::NotSignedIn)));
        assert!(client.registry().is_empty());
        assert!(backends.realtime.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_one_presence_directory_keeps_the_other() {
        use chatwii_realtime::ChannelStatus;
        use chatwii_shared::constants::PRESENCE_ROOT;

        let (client, backends) = ChatClient::mock(ClientConfig::default()).unwrap();
        client
            .sign_in(crate::session::SignInRequest::new("Alice"))
            .await
            .unwrap();

        let first = client.presence_directory().unwrap();
        let second = client.presence_directory().unwrap();
        first.attach(|_| {});
        second.attach(|_| {});
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let attached = backends.realtime.listeners_at(PRESENCE_ROOT);
        assert!(attached >= 2);

        drop(first);
        assert_eq!(backends.realtime.listeners_at(PRESENCE_ROOT), attached - 1);
        assert_eq!(second.status(), ChannelStatus::Connected);
    }

    #[test]
    fn test_bootstrap_without_adapters_fails_outside_mock_mode() {
        let settings = ClientSettings::default();
        assert!(ChatClient::bootstrap(ClientConfig::default(), &settings).is_err());

        let settings = ClientSettings {
            mock_mode: true,
            ..ClientSettings::default()
        };
        assert!(ChatClient::bootstrap(ClientConfig::default(), &settings).is_ok());
    }
}
