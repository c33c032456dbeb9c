//! Typed realtime channel hooks.
//!
//! A [`ChannelHook`] owns at most one listener at a time. Attaching to a new
//! conversation releases the previous listener first; detaching (or dropping
//! the hook) releases it too. Every listener goes through the shared
//! [`ListenerRegistry`], so sign-out can tear everything down in one call.
//!
//! Error handling:
//! - permission and malformed-path errors are terminal: the listener is
//!   released, status becomes [`ChannelStatus::Failed`] and the callback
//!   receives `None` once;
//! - connectivity errors resubscribe with exponential backoff until the
//!   [`RetryPolicy`] runs out, then fail the same way;
//! - a snapshot that fails to decode is logged and dropped.
//!
//! Registry keys are `<path>#<hook id>`, so two hooks on the same path never
//! release each other's listener.
//!
//! Each attach bumps a generation counter. Events from a listener that
//! belongs to an older generation are ignored, so a slow backend can never
//! deliver stale data into a newer conversation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatwii_shared::constants::PRESENCE_ROOT;
use chatwii_shared::types::{messages_path, reactions_path, typing_path};
use chatwii_shared::{
    conversation_key, Batch, ConversationKey, Message, PresenceRecord, Reaction, SnapshotDecode,
    TypingState, UserId,
};

use crate::backend::{ChannelEvent, EventCallback, RealtimeBackend};
use crate::error::RealtimeError;
use crate::registry::ListenerRegistry;
use crate::retry::RetryPolicy;

pub type UpdateCallback<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    Connecting,
    Connected,
    /// Waiting to resubscribe after a connectivity error.
    Retrying { attempt: u32 },
    Failed,
}

struct Target<T> {
    path: String,
    callback: UpdateCallback<T>,
    retries: u32,
}

struct HookState<T> {
    generation: u64,
    target: Option<Target<T>>,
    retry_task: Option<JoinHandle<()>>,
}

struct HookInner<T> {
    id: u64,
    name: &'static str,
    backend: Arc<dyn RealtimeBackend>,
    registry: Arc<ListenerRegistry>,
    policy: RetryPolicy,
    path_for: fn(&ConversationKey) -> String,
    state: Mutex<HookState<T>>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl<T: SnapshotDecode> HookInner<T> {
    fn lock(&self) -> MutexGuard<'_, HookState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(&self, path: &str) -> String {
        format!("{path}#{}", self.id)
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status_tx.send_replace(status);
    }

    fn subscribe(self: &Arc<Self>, generation: u64) {
        let path = {
            let state = self.lock();
            if state.generation != generation {
                return;
            }
            match &state.target {
                Some(target) => target.path.clone(),
                None => return,
            }
        };

        let weak = Arc::downgrade(self);
        let callback: EventCallback = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(generation, event);
            }
        });

        match self.backend.subscribe(&path, callback) {
            Ok(subscription) => {
                if self.lock().generation == generation {
                    self.registry.register(self.key(&path), subscription);
                } else if let Err(e) = subscription.unsubscribe() {
                    warn!(channel = self.name, error = %e, "Failed to release superseded listener");
                }
            }
            Err(e) => self.on_error(generation, e),
        }
    }

    fn on_event(self: &Arc<Self>, generation: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Subscribed => {
                {
                    let mut state = self.lock();
                    if state.generation != generation {
                        return;
                    }
                    match state.target.as_mut() {
                        Some(target) => target.retries = 0,
                        None => return,
                    }
                }
                debug!(channel = self.name, "Channel subscribed");
                self.set_status(ChannelStatus::Connected);
            }
            ChannelEvent::Snapshot(value) => {
                let callback = {
                    let state = self.lock();
                    if state.generation != generation {
                        return;
                    }
                    match &state.target {
                        Some(target) => target.callback.clone(),
                        None => return,
                    }
                };
                match T::from_snapshot(value.as_ref()) {
                    Ok(decoded) => callback(Some(decoded)),
                    Err(e) => warn!(channel = self.name, error = %e, "Dropping malformed snapshot"),
                }
            }
            ChannelEvent::Error(e) => self.on_error(generation, e),
        }
    }

    fn on_error(self: &Arc<Self>, generation: u64, error: RealtimeError) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let Some(target) = state.target.as_mut() else {
            return;
        };
        let path = target.path.clone();
        let delay = if error.is_retryable() {
            self.policy.delay_for(target.retries)
        } else {
            None
        };
        let runtime = tokio::runtime::Handle::try_current().ok();

        match (delay, runtime) {
            (Some(delay), Some(runtime)) => {
                target.retries += 1;
                let attempt = target.retries;
                let weak = Arc::downgrade(self);
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.subscribe(generation);
                    }
                });
                if let Some(previous) = state.retry_task.replace(task) {
                    previous.abort();
                }
                drop(state);

                self.registry.remove(&self.key(&path));
                warn!(
                    channel = self.name,
                    path = %path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Channel error, resubscribing"
                );
                self.set_status(ChannelStatus::Retrying { attempt });
            }
            _ => {
                let target = state.target.take();
                if let Some(task) = state.retry_task.take() {
                    task.abort();
                }
                drop(state);

                self.registry.remove(&self.key(&path));
                warn!(channel = self.name, path = %path, error = %error, "Channel failed");
                self.set_status(ChannelStatus::Failed);
                if let Some(target) = target {
                    (target.callback)(None);
                }
            }
        }
    }
}

/// One realtime listener bound to a conversation (or a fixed path), decoded
/// into `T` before it reaches the callback.
pub struct ChannelHook<T: SnapshotDecode> {
    inner: Arc<HookInner<T>>,
}

impl<T: SnapshotDecode> ChannelHook<T> {
    pub fn new(
        name: &'static str,
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
        path_for: fn(&ConversationKey) -> String,
    ) -> Self {
        Self::with_policy(name, backend, registry, path_for, RetryPolicy::default())
    }

    pub fn with_policy(
        name: &'static str,
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
        path_for: fn(&ConversationKey) -> String,
        policy: RetryPolicy,
    ) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            inner: Arc::new(HookInner {
                id: NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                backend,
                registry,
                policy,
                path_for,
                state: Mutex::new(HookState {
                    generation: 0,
                    target: None,
                    retry_task: None,
                }),
                status_tx,
            }),
        }
    }

    /// Listen to the conversation between `pair`. Returns `false` (and
    /// releases any previous listener) when there is no valid pair.
    pub fn attach(
        &self,
        pair: Option<(&UserId, &UserId)>,
        callback: impl Fn(Option<T>) + Send + Sync + 'static,
    ) -> bool {
        match pair.and_then(|(a, b)| conversation_key(a, b)) {
            Some(key) => {
                self.attach_path((self.inner.path_for)(&key), callback);
                true
            }
            None => {
                debug!(channel = self.inner.name, "No valid conversation, channel stays idle");
                self.detach();
                false
            }
        }
    }

    /// Listen to an explicit path.
    pub fn attach_path(
        &self,
        path: String,
        callback: impl Fn(Option<T>) + Send + Sync + 'static,
    ) {
        let callback: UpdateCallback<T> = Arc::new(callback);
        let (generation, previous) = {
            let mut state = self.inner.lock();
            state.generation += 1;
            if let Some(task) = state.retry_task.take() {
                task.abort();
            }
            let previous = state
                .target
                .replace(Target {
                    path: path.clone(),
                    callback,
                    retries: 0,
                })
                .map(|t| t.path);
            (state.generation, previous)
        };

        if let Some(previous) = previous.filter(|p| p != &path) {
            self.inner.registry.remove(&self.inner.key(&previous));
        }
        info!(channel = self.inner.name, path = %path, "Attaching channel");
        self.inner.set_status(ChannelStatus::Connecting);
        self.inner.subscribe(generation);
    }

    /// Release the listener. The callback is never invoked again.
    pub fn detach(&self) {
        let previous = {
            let mut state = self.inner.lock();
            state.generation += 1;
            if let Some(task) = state.retry_task.take() {
                task.abort();
            }
            state.target.take().map(|t| t.path)
        };
        if let Some(path) = previous {
            self.inner.registry.remove(&self.inner.key(&path));
            debug!(channel = self.inner.name, path = %path, "Detached channel");
        }
        self.inner.set_status(ChannelStatus::Idle);
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Key this hook's listener is registered under, if attached.
    pub fn registry_key(&self) -> Option<String> {
        self.path().map(|path| self.inner.key(&path))
    }

    /// Path currently listened to, if any.
    pub fn path(&self) -> Option<String> {
        self.inner.lock().target.as_ref().map(|t| t.path.clone())
    }
}

impl<T: SnapshotDecode> Drop for ChannelHook<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

pub type MessageChannel = ChannelHook<Batch<Message>>;
pub type ReactionChannel = ChannelHook<Batch<Reaction>>;
pub type TypingChannel = ChannelHook<Batch<TypingState>>;
pub type PresenceChannel = ChannelHook<Batch<PresenceRecord>>;

impl ChannelHook<Batch<Message>> {
    pub fn messages(backend: Arc<dyn RealtimeBackend>, registry: Arc<ListenerRegistry>) -> Self {
        Self::new("messages", backend, registry, messages_path)
    }
}

impl ChannelHook<Batch<Reaction>> {
    pub fn reactions(backend: Arc<dyn RealtimeBackend>, registry: Arc<ListenerRegistry>) -> Self {
        Self::new("reactions", backend, registry, reactions_path)
    }
}

impl ChannelHook<Batch<TypingState>> {
    pub fn typing(backend: Arc<dyn RealtimeBackend>, registry: Arc<ListenerRegistry>) -> Self {
        Self::new("typing", backend, registry, typing_path)
    }
}

impl ChannelHook<Batch<PresenceRecord>> {
    pub fn presence(backend: Arc<dyn RealtimeBackend>, registry: Arc<ListenerRegistry>) -> Self {
        Self::new("presence", backend, registry, |_| PRESENCE_ROOT.to_string())
    }

    pub fn attach_directory(
        &self,
        callback: impl Fn(Option<Batch<PresenceRecord>>) + Send + Sync + 'static,
    ) {
        self.attach_path(PRESENCE_ROOT.to_string(), callback);
    }
}
