//! Connection monitor.
//!
//! Combines two signals into one observable [`ConnectionState`]: the
//! backend's `.info/connected` flag and, optionally, host network
//! online/offline events (the vendor flag can lag behind the OS). Manual
//! reconnects are throttled so a UI button cannot hammer the backend.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chatwii_shared::constants::{CONNECTED_PATH, RECONNECT_THROTTLE_MS};
use chatwii_shared::SnapshotDecode;

use crate::backend::{ChannelEvent, RealtimeBackend, Subscription};
use crate::error::RealtimeError;
use crate::retry::{retry, RetryError, RetryPolicy};

/// Where the latest connectivity change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Backend,
    Network,
    ReachabilityCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_event: Option<DateTime<Utc>>,
    pub source: Option<SignalSource>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            last_event: None,
            source: None,
        }
    }
}

/// Host network events, as forwarded by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// A reconnect ran less than the throttle window ago; nothing was done.
    Throttled,
    Connected,
    StillDisconnected,
    /// Backoff ran out of retries without reaching the backend.
    Exhausted,
}

struct MonitorInner {
    backend: Arc<dyn RealtimeBackend>,
    state_tx: watch::Sender<ConnectionState>,
    throttle: Duration,
    last_reconnect: Mutex<Option<Instant>>,
    subscription: Mutex<Option<Subscription>>,
    network_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorInner {
    fn update(&self, connected: bool, source: SignalSource) {
        let changed = self.state_tx.borrow().connected != connected;
        self.state_tx.send_replace(ConnectionState {
            connected,
            last_event: Some(Utc::now()),
            source: Some(source),
        });
        if changed {
            info!(connected, source = ?source, "Connection state changed");
        }
    }

    /// Lightweight read of the connected flag. Not throttled.
    async fn check_reachable(&self) -> bool {
        let connected = match self.backend.get(CONNECTED_PATH).await {
            Ok(value) => bool::from_snapshot(value.as_ref()).unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "Connectivity check failed");
                false
            }
        };
        self.update(connected, SignalSource::ReachabilityCheck);
        connected
    }

    /// Claim the throttle window. `false` if a reconnect ran too recently.
    fn claim_reconnect(&self) -> bool {
        let mut last = lock(&self.last_reconnect);
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.throttle {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

/// Cloneable handle; all clones observe and drive the same state.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectionMonitor {
    pub fn new(backend: Arc<dyn RealtimeBackend>) -> Self {
        Self::with_throttle(backend, Duration::from_millis(RECONNECT_THROTTLE_MS))
    }

    pub fn with_throttle(backend: Arc<dyn RealtimeBackend>, throttle: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(MonitorInner {
                backend,
                state_tx,
                throttle,
                last_reconnect: Mutex::new(None),
                subscription: Mutex::new(None),
                network_task: Mutex::new(None),
            }),
        }
    }

    /// Start observing. Safe to call again; the previous listener and
    /// network task are replaced. A backend that refuses the listen leaves
    /// the monitor reporting "disconnected" rather than failing.
    pub fn start(&self, network: Option<mpsc::Receiver<NetworkEvent>>) {
        self.stop();

        let weak = Arc::downgrade(&self.inner);
        let callback = Arc::new(move |event: ChannelEvent| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                ChannelEvent::Subscribed => {}
                ChannelEvent::Snapshot(value) => match bool::from_snapshot(value.as_ref()) {
                    Ok(connected) => inner.update(connected, SignalSource::Backend),
                    Err(e) => warn!(error = %e, "Malformed connected flag"),
                },
                ChannelEvent::Error(e) => {
                    warn!(error = %e, "Connected-flag listener cancelled");
                    inner.update(false, SignalSource::Backend);
                }
            }
        });

        match self.inner.backend.subscribe(CONNECTED_PATH, callback) {
            Ok(sub) => *lock(&self.inner.subscription) = Some(sub),
            Err(e) => {
                warn!(error = %e, "Could not observe connection state");
                self.inner.update(false, SignalSource::Backend);
            }
        }

        if let Some(mut rx) = network {
            let weak = Arc::downgrade(&self.inner);
            let task = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    match event {
                        NetworkEvent::Offline => inner.update(false, SignalSource::Network),
                        NetworkEvent::Online => {
                            if inner.claim_reconnect() {
                                inner.check_reachable().await;
                            }
                        }
                    }
                }
                debug!("Network event stream closed");
            });
            *lock(&self.inner.network_task) = Some(task);
        }
    }

    /// Detach the listener and stop the network task.
    pub fn stop(&self) {
        if let Some(sub) = lock(&self.inner.subscription).take() {
            if let Err(e) = sub.unsubscribe() {
                warn!(error = %e, "Failed to detach connection listener");
            }
        }
        if let Some(task) = lock(&self.inner.network_task).take() {
            task.abort();
        }
    }

    /// Manual reconnect. At most once per throttle window.
    pub async fn reconnect(&self) -> ReconnectOutcome {
        if !self.inner.claim_reconnect() {
            debug!("Reconnect throttled");
            return ReconnectOutcome::Throttled;
        }
        if self.inner.check_reachable().await {
            ReconnectOutcome::Connected
        } else {
            ReconnectOutcome::StillDisconnected
        }
    }

    /// Reconnect with exponential backoff. The throttle gates entry only;
    /// retries inside one call are spaced by `policy`.
    pub async fn reconnect_with_backoff(&self, policy: &RetryPolicy) -> ReconnectOutcome {
        if !self.inner.claim_reconnect() {
            return ReconnectOutcome::Throttled;
        }
        let inner = &self.inner;
        let result = retry(
            policy,
            |_: &RealtimeError| true,
            || async move {
                if inner.check_reachable().await {
                    Ok(())
                } else {
                    Err(RealtimeError::Disconnected)
                }
            },
        )
        .await;
        match result {
            Ok(()) => ReconnectOutcome::Connected,
            Err(RetryError::Exhausted { attempts, .. }) => {
                warn!(attempts, "Reconnect gave up");
                ReconnectOutcome::Exhausted
            }
            Err(RetryError::Fatal(_)) => ReconnectOutcome::StillDisconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().connected
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.network_task).take() {
            task.abort();
        }
        if let Some(sub) = lock(&self.subscription).take() {
            let _ = sub.unsubscribe();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn monitor() -> (MemoryBackend, ConnectionMonitor) {
        let backend = MemoryBackend::new();
        let monitor = ConnectionMonitor::new(Arc::new(backend.clone()));
        (backend, monitor)
    }

    #[tokio::test]
    async fn test_follows_backend_flag() {
        let (backend, monitor) = monitor();
        let mut rx = monitor.watch();
        monitor.start(None);
        settle().await;
        assert!(monitor.is_connected());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        backend.set_connected(false);
        assert!(!monitor.is_connected());
        assert_eq!(monitor.state().source, Some(SignalSource::Backend));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_listen_failure_reports_disconnected() {
        let (backend, monitor) = monitor();
        backend.fail_subscriptions(true);
        monitor.start(None);
        assert!(!monitor.is_connected());
        assert!(monitor.state().last_event.is_some());
    }

    #[tokio::test]
    async fn test_network_offline_overrides() {
        let (_backend, monitor) = monitor();
        let (tx, rx) = mpsc::channel(4);
        monitor.start(Some(rx));
        settle().await;
        assert!(monitor.is_connected());

        tx.send(NetworkEvent::Offline).await.unwrap();
        settle().await;
        assert!(!monitor.is_connected());
        assert_eq!(monitor.state().source, Some(SignalSource::Network));

        tx.send(NetworkEvent::Online).await.unwrap();
        settle().await;
        assert!(monitor.is_connected());
        assert_eq!(monitor.state().source, Some(SignalSource::ReachabilityCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_throttled() {
        let (backend, monitor) = monitor();
        backend.set_connected(false);

        assert_eq!(monitor.reconnect().await, ReconnectOutcome::StillDisconnected);
        assert_eq!(monitor.reconnect().await, ReconnectOutcome::Throttled);

        backend.set_connected(true);
        tokio::time::advance(Duration::from_millis(RECONNECT_THROTTLE_MS)).await;
        assert_eq!(monitor.reconnect().await, ReconnectOutcome::Connected);
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhausts_while_offline() {
        let (backend, monitor) = monitor();
        backend.set_connected(false);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert_eq!(
            monitor.reconnect_with_backoff(&policy).await,
            ReconnectOutcome::Exhausted
        );
    }

    #[tokio::test]
    async fn test_stop_detaches_listener() {
        let (backend, monitor) = monitor();
        monitor.start(None);
        assert_eq!(backend.listeners_at(CONNECTED_PATH), 1);
        monitor.start(None);
        assert_eq!(backend.listeners_at(CONNECTED_PATH), 1);
        monitor.stop();
        assert_eq!(backend.listener_count(), 0);
    }
}
