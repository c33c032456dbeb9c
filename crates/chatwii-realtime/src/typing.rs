//! Typing indicators.
//!
//! Sending side: [`TypingBroadcaster`] debounces keystrokes (trailing edge)
//! into a single `isTyping = true` write, and registers a server-side
//! removal of the user's typing node so a dropped connection never leaves a
//! stuck indicator.
//!
//! Receiving side: [`TypingTracker`] turns the peer's typing node into a
//! boolean that clears itself after a quiet period, and [`PeerTyping`] wires
//! a typing channel into a tracker for one conversation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chatwii_shared::constants::{TYPING_DEBOUNCE_MS, TYPING_STALE_MS};
use chatwii_shared::types::typing_user_path;
use chatwii_shared::{conversation_key, TypingState, UserId};

use crate::backend::RealtimeBackend;
use crate::channels::TypingChannel;
use crate::error::Result;
use crate::registry::ListenerRegistry;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Sending side
// ---------------------------------------------------------------------------

struct BroadcastInner {
    backend: Arc<dyn RealtimeBackend>,
    path: String,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastInner {
    async fn write(&self, is_typing: bool) -> Result<()> {
        let state = TypingState {
            is_typing,
            timestamp: Utc::now().timestamp_millis(),
        };
        self.backend
            .set(&self.path, serde_json::to_value(state)?)
            .await
    }

    fn cancel_pending(&self) {
        if let Some(task) = lock(&self.pending).take() {
            task.abort();
        }
    }
}

pub struct TypingBroadcaster {
    inner: Arc<BroadcastInner>,
}

impl TypingBroadcaster {
    /// Prepare broadcasting for `me` in the conversation with `other`.
    ///
    /// Returns `Ok(None)` when the pair has no valid conversation key.
    pub async fn new(
        backend: Arc<dyn RealtimeBackend>,
        me: &UserId,
        other: &UserId,
    ) -> Result<Option<Self>> {
        Self::with_debounce(backend, me, other, Duration::from_millis(TYPING_DEBOUNCE_MS)).await
    }

    pub async fn with_debounce(
        backend: Arc<dyn RealtimeBackend>,
        me: &UserId,
        other: &UserId,
        debounce: Duration,
    ) -> Result<Option<Self>> {
        let Some(key) = conversation_key(me, other) else {
            return Ok(None);
        };
        let path = typing_user_path(&key, me);
        backend.remove_on_disconnect(&path).await?;
        debug!(path = %path, "Typing broadcaster ready");
        Ok(Some(Self {
            inner: Arc::new(BroadcastInner {
                backend,
                path,
                debounce,
                pending: Mutex::new(None),
            }),
        }))
    }

    /// Record a keystroke. Only the last keystroke of a burst produces a
    /// write, `debounce` after it.
    pub fn keystroke(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if let Err(e) = inner.write(true).await {
                warn!(path = %inner.path, error = %e, "Failed to publish typing state");
            }
        });
        if let Some(previous) = lock(&self.inner.pending).replace(task) {
            previous.abort();
        }
    }

    /// Message sent or input cleared: cancel any pending write and publish
    /// `isTyping = false` right away.
    pub async fn stop(&self) -> Result<()> {
        self.inner.cancel_pending();
        self.inner.write(false).await
    }

    /// Leaving the conversation: drop the node and the disconnect handler.
    pub async fn close(self) -> Result<()> {
        self.inner.cancel_pending();
        let removed = self.inner.backend.remove(&self.inner.path).await;
        let cancelled = self.inner.backend.cancel_on_disconnect(&self.inner.path).await;
        removed.and(cancelled)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }
}

impl Drop for TypingBroadcaster {
    fn drop(&mut self) {
        self.inner.cancel_pending();
    }
}

// ---------------------------------------------------------------------------
// Receiving side
// ---------------------------------------------------------------------------

struct TrackerState {
    generation: u64,
    expiry: Option<JoinHandle<()>>,
}

struct TrackerInner {
    stale_after: Duration,
    state: Mutex<TrackerState>,
    typing_tx: watch::Sender<bool>,
}

impl TrackerInner {
    fn set(&self, typing: bool) {
        self.typing_tx.send_if_modified(|current| {
            let changed = *current != typing;
            *current = typing;
            changed
        });
    }
}

/// "Is the peer typing?" with automatic expiry.
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TrackerInner>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(TYPING_STALE_MS))
    }
}

impl TypingTracker {
    pub fn new(stale_after: Duration) -> Self {
        let (typing_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                stale_after,
                state: Mutex::new(TrackerState {
                    generation: 0,
                    expiry: None,
                }),
                typing_tx,
            }),
        }
    }

    /// Feed the latest state of the peer's typing node (`None` if absent).
    /// `now_ms` is the local clock in epoch milliseconds.
    pub fn apply(&self, update: Option<TypingState>, now_ms: i64) {
        let stale_ms = self.inner.stale_after.as_millis() as i64;
        let typing = match update {
            Some(state) if state.is_typing => {
                state.timestamp <= 0 || now_ms.saturating_sub(state.timestamp) < stale_ms
            }
            _ => false,
        };

        let mut state = lock(&self.inner.state);
        state.generation += 1;
        if let Some(task) = state.expiry.take() {
            task.abort();
        }

        if typing {
            let generation = state.generation;
            let weak = Arc::downgrade(&self.inner);
            let delay = self.inner.stale_after;
            state.expiry = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    let current = lock(&inner.state).generation;
                    if current == generation {
                        inner.set(false);
                    }
                }
            }));
        }
        drop(state);
        self.inner.set(typing);
    }

    /// Forget everything and report "not typing".
    pub fn reset(&self) {
        self.apply(None, 0);
    }

    pub fn is_typing(&self) -> bool {
        *self.inner.typing_tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.typing_tx.subscribe()
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.state).expiry.take() {
            task.abort();
        }
    }
}

/// The other participant's typing indicator for one conversation.
pub struct PeerTyping {
    channel: TypingChannel,
    tracker: TypingTracker,
}

impl PeerTyping {
    pub fn new(backend: Arc<dyn RealtimeBackend>, registry: Arc<ListenerRegistry>) -> Self {
        Self::with_tracker(backend, registry, TypingTracker::default())
    }

    pub fn with_tracker(
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
        tracker: TypingTracker,
    ) -> Self {
        Self {
            channel: TypingChannel::typing(backend, registry),
            tracker,
        }
    }

    /// Follow `other`'s typing node in the conversation with `me`.
    pub fn attach(&self, me: &UserId, other: &UserId) -> bool {
        self.tracker.reset();
        let tracker = self.tracker.clone();
        let peer = other.as_str().to_string();
        self.channel.attach(Some((me, other)), move |batch| {
            let state = batch.and_then(|b| b.get(&peer).copied());
            tracker.apply(state, Utc::now().timestamp_millis());
        })
    }

    pub fn detach(&self) {
        self.channel.detach();
        self.tracker.reset();
    }

    pub fn is_typing(&self) -> bool {
        self.tracker.is_typing()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tracker.watch()
    }

    pub fn channel(&self) -> &TypingChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn broadcaster(backend: &MemoryBackend) -> TypingBroadcaster {
        TypingBroadcaster::new(
            Arc::new(backend.clone()),
            &UserId::from("alice"),
            &UserId::from("bob"),
        )
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_produces_one_trailing_write() {
        let backend = MemoryBackend::new();
        let typing = broadcaster(&backend).await;
        assert_eq!(typing.path(), "typing/alice_bob/alice");

        for _ in 0..5 {
            typing.keystroke();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(backend.write_count(typing.path()), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        settle().await;
        assert_eq!(backend.write_count(typing.path()), 1);
        let value = backend.value_at(typing.path()).unwrap();
        assert_eq!(value["isTyping"], serde_json::json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_and_writes_false() {
        let backend = MemoryBackend::new();
        let typing = broadcaster(&backend).await;

        typing.keystroke();
        typing.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        assert_eq!(backend.write_count(typing.path()), 1);
        let value = backend.value_at(typing.path()).unwrap();
        assert_eq!(value["isTyping"], serde_json::json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_typing_node() {
        let backend = MemoryBackend::new();
        let typing = broadcaster(&backend).await;
        typing.keystroke();
        tokio::time::sleep(Duration::from_millis(400)).await;
        settle().await;
        assert!(backend.value_at(typing.path()).is_some());

        backend.simulate_disconnect();
        assert_eq!(backend.value_at(typing.path()), None);
    }

    #[tokio::test]
    async fn test_close_removes_node_and_handler() {
        let backend = MemoryBackend::new();
        let typing = broadcaster(&backend).await;
        typing.stop().await.unwrap();
        let path = typing.path().to_string();

        typing.close().await.unwrap();
        assert_eq!(backend.value_at(&path), None);
        assert!(backend.on_disconnect_paths().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pair_has_no_broadcaster() {
        let backend = MemoryBackend::new();
        let me = UserId::from("alice");
        let result = TypingBroadcaster::new(Arc::new(backend.clone()), &me, &me).await;
        assert!(result.unwrap().is_none());
        assert!(backend.on_disconnect_paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_auto_clears() {
        let tracker = TypingTracker::default();
        let now = 1_700_000_000_000;
        tracker.apply(Some(TypingState { is_typing: true, timestamp: now }), now);
        assert!(tracker.is_typing());

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(tracker.is_typing());

        // A refresh pushes the expiry out again.
        tracker.apply(Some(TypingState { is_typing: true, timestamp: now + 4_000 }), now + 4_000);
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(tracker.is_typing());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert!(!tracker.is_typing());
    }

    #[tokio::test]
    async fn test_tracker_ignores_stale_and_false() {
        let tracker = TypingTracker::default();
        let now = 1_700_000_000_000;

        tracker.apply(Some(TypingState { is_typing: true, timestamp: now - 6_000 }), now);
        assert!(!tracker.is_typing());

        tracker.apply(Some(TypingState { is_typing: true, timestamp: now }), now);
        assert!(tracker.is_typing());
        tracker.apply(Some(TypingState { is_typing: false, timestamp: now }), now);
        assert!(!tracker.is_typing());

        tracker.apply(Some(TypingState { is_typing: true, timestamp: 0 }), now);
        assert!(tracker.is_typing());
        tracker.apply(None, now);
        assert!(!tracker.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_typing_end_to_end() {
        let backend = MemoryBackend::new();
        let registry = Arc::new(ListenerRegistry::new());
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        let peer = PeerTyping::new(Arc::new(backend.clone()), registry.clone());
        assert!(peer.attach(&alice, &bob));
        settle().await;
        assert!(!peer.is_typing());

        let bob_typing = TypingBroadcaster::new(Arc::new(backend.clone()), &bob, &alice)
            .await
            .unwrap()
            .unwrap();
        bob_typing.keystroke();
        tokio::time::sleep(Duration::from_millis(350)).await;
        settle().await;
        assert!(peer.is_typing());

        // Bob's own keystrokes never show up as "peer typing" for Bob.
        let own = PeerTyping::new(Arc::new(backend.clone()), Arc::new(ListenerRegistry::new()));
        own.attach(&bob, &alice);
        settle().await;
        assert!(!own.is_typing());

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        settle().await;
        assert!(!peer.is_typing());

        peer.detach();
        assert!(registry.is_empty());
    }
}
