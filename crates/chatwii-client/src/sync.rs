//! Conversation sync coordinator.
//!
//! Selecting a conversation fetches its recent history from the relational
//! store and attaches the realtime message, reaction and typing channels.
//! If the message channel has not delivered within the setup timeout the
//! coordinator degrades: it runs one direct re-fetch and keeps waiting for
//! the channel, which moves it to `Ready` whenever it finally connects.
//!
//! [`SyncState::transition`] is the whole policy. [`ConversationSync`] only
//! executes the actions it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatwii_realtime::{
    ListenerRegistry, MessageChannel, PeerTyping, ReactionChannel, RealtimeBackend, TypingTracker,
};
use chatwii_shared::constants::{CONVERSATION_PAGE_SIZE, SYNC_SETUP_TIMEOUT_MS, TYPING_STALE_MS};
use chatwii_shared::merge::{merge_messages, upsert_message};
use chatwii_shared::{conversation_key, ConversationKey, Message, UserId};
use chatwii_store::MessageStore;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    SettingUp(ConversationKey),
    Ready(ConversationKey),
    /// Setup timed out; history came from a direct fetch and the realtime
    /// channel is still pending.
    Degraded(ConversationKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Select(ConversationKey),
    ChannelConnected(ConversationKey),
    TimeoutElapsed(ConversationKey),
    Deselect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    TeardownChannels(ConversationKey),
    FetchMessages(ConversationKey),
    AttachChannels(ConversationKey),
    ArmTimeout(ConversationKey),
    CancelTimeout,
    FallbackResync(ConversationKey),
}

impl SyncState {
    pub fn key(&self) -> Option<&ConversationKey> {
        match self {
            SyncState::Idle => None,
            SyncState::SettingUp(key) | SyncState::Ready(key) | SyncState::Degraded(key) => {
                Some(key)
            }
        }
    }

    /// Next state and the side effects to run, in order. Events about a
    /// conversation other than the current one change nothing.
    pub fn transition(&self, event: SyncEvent) -> (SyncState, Vec<SyncAction>) {
        match (self, event) {
            (_, SyncEvent::Select(key)) => {
                if self.key() == Some(&key) {
                    return (self.clone(), Vec::new());
                }
                let mut actions = Vec::with_capacity(5);
                if let Some(old) = self.key() {
                    actions.push(SyncAction::CancelTimeout);
                    actions.push(SyncAction::TeardownChannels(old.clone()));
                }
                actions.push(SyncAction::FetchMessages(key.clone()));
                actions.push(SyncAction::AttachChannels(key.clone()));
                actions.push(SyncAction::ArmTimeout(key.clone()));
                (SyncState::SettingUp(key), actions)
            }

            (SyncState::SettingUp(current), SyncEvent::ChannelConnected(key)) if *current == key => {
                (SyncState::Ready(key), vec![SyncAction::CancelTimeout])
            }

            (SyncState::Degraded(current), SyncEvent::ChannelConnected(key)) if *current == key => {
                (SyncState::Ready(key), Vec::new())
            }

            (SyncState::SettingUp(current), SyncEvent::TimeoutElapsed(key)) if *current == key => {
                let resync = SyncAction::FallbackResync(key.clone());
                (SyncState::Degraded(key), vec![resync])
            }

            (_, SyncEvent::Deselect) => match self.key() {
                Some(key) => (
                    SyncState::Idle,
                    vec![
                        SyncAction::CancelTimeout,
                        SyncAction::TeardownChannels(key.clone()),
                    ],
                ),
                None => (SyncState::Idle, Vec::new()),
            },

            (state, _) => (state.clone(), Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub setup_timeout: Duration,
    pub page_size: u32,
    pub typing_stale: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            setup_timeout: Duration::from_millis(SYNC_SETUP_TIMEOUT_MS),
            page_size: CONVERSATION_PAGE_SIZE,
            typing_stale: Duration::from_millis(TYPING_STALE_MS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FetchReason {
    Initial,
    Fallback,
    Reactions,
    Manual,
}

struct Machine {
    state: SyncState,
    /// Bumped whenever the selected conversation changes. Fetch results and
    /// pushes carry the generation they were started under.
    generation: u64,
    timeout: Option<JoinHandle<()>>,
}

struct SyncInner<S: ?Sized> {
    me: UserId,
    store: Arc<S>,
    options: SyncOptions,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<SyncState>,
    messages_tx: watch::Sender<Vec<Message>>,
    messages: MessageChannel,
    reactions: ReactionChannel,
    typing: PeerTyping,
}

impl<S: MessageStore + ?Sized + 'static> SyncInner<S> {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(self: &Arc<Self>, event: SyncEvent) {
        let (state, actions, generation) = {
            let mut machine = self.lock();
            let (next, actions) = machine.state.transition(event);
            if next.key() != machine.state.key() {
                machine.generation += 1;
            }
            machine.state = next.clone();
            (next, actions, machine.generation)
        };

        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(state = ?state, "Sync state changed");
            *current = state;
            true
        });

        for action in actions {
            self.execute(action, generation);
        }
    }

    fn execute(self: &Arc<Self>, action: SyncAction, generation: u64) {
        match action {
            SyncAction::FetchMessages(key) => self.spawn_fetch(key, generation, FetchReason::Initial),
            SyncAction::AttachChannels(key) => self.attach_channels(&key, generation),
            SyncAction::ArmTimeout(key) => self.arm_timeout(key),
            SyncAction::CancelTimeout => {
                if let Some(task) = self.lock().timeout.take() {
                    task.abort();
                }
            }
            SyncAction::TeardownChannels(key) => {
                self.messages.detach();
                self.reactions.detach();
                self.typing.detach();
                self.messages_tx.send_replace(Vec::new());
                debug!(conversation = %key, "Conversation channels torn down");
            }
            SyncAction::FallbackResync(key) => {
                warn!(
                    conversation = %key,
                    timeout_ms = self.options.setup_timeout.as_millis() as u64,
                    "Realtime setup timed out, fetching directly"
                );
                self.spawn_fetch(key, generation, FetchReason::Fallback);
            }
        }
    }

    fn attach_channels(self: &Arc<Self>, key: &ConversationKey, generation: u64) {
        let Some(other) = key.other(&self.me) else {
            warn!(conversation = %key, "Conversation does not involve the signed-in user");
            return;
        };
        let pair = Some((&self.me, &other));

        let weak = Arc::downgrade(self);
        let connected = key.clone();
        self.messages.attach(pair, move |batch| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match batch {
                Some(batch) => {
                    for (id, error) in &batch.rejected {
                        warn!(message = %id, error = %error, "Skipping malformed message");
                    }
                    inner.merge_pushed(generation, batch.into_values());
                    inner.dispatch(SyncEvent::ChannelConnected(connected.clone()));
                }
                None => warn!(conversation = %connected, "Message channel failed"),
            }
        });

        // the first snapshot duplicates the initial fetch
        let weak = Arc::downgrade(self);
        let refetch = key.clone();
        let primed = AtomicBool::new(false);
        self.reactions.attach(pair, move |batch| {
            if batch.is_none() || !primed.swap(true, Ordering::Relaxed) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.spawn_fetch(refetch.clone(), generation, FetchReason::Reactions);
            }
        });

        self.typing.attach(&self.me, &other);
        info!(conversation = %key, "Conversation channels attached");
    }

    fn arm_timeout(self: &Arc<Self>, key: ConversationKey) {
        let weak = Arc::downgrade(self);
        let timeout = self.options.setup_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(SyncEvent::TimeoutElapsed(key));
            }
        });
        if let Some(previous) = self.lock().timeout.replace(task) {
            previous.abort();
        }
    }

    fn spawn_fetch(self: &Arc<Self>, key: ConversationKey, generation: u64, reason: FetchReason) {
        let store = self.store.clone();
        let weak = Arc::downgrade(self);
        let limit = self.options.page_size;
        tokio::spawn(async move {
            let result = store.conversation_messages(&key, limit).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(fetched) => {
                    let count = fetched.len();
                    if inner.merge(generation, &fetched) {
                        debug!(conversation = %key, reason = ?reason, count, "Fetched messages");
                    } else {
                        debug!(conversation = %key, reason = ?reason, "Discarding superseded fetch");
                    }
                }
                Err(e) => {
                    warn!(conversation = %key, reason = ?reason, error = %e, "Message fetch failed")
                }
            }
        });
    }

    /// Merge into the visible list unless the selection moved on.
    fn merge(&self, generation: u64, incoming: &[Message]) -> bool {
        let machine = self.lock();
        if machine.generation != generation {
            return false;
        }
        self.messages_tx
            .send_modify(|current| *current = merge_messages(current, incoming));
        true
    }

    /// Realtime copies carry no reactions; keep the ones the last fetch
    /// attached.
    fn merge_pushed(&self, generation: u64, mut incoming: Vec<Message>) -> bool {
        {
            let current = self.messages_tx.borrow();
            for message in incoming.iter_mut().filter(|m| m.reactions.is_empty()) {
                if let Some(known) = current.iter().find(|c| c.id == message.id) {
                    message.reactions = known.reactions.clone();
                }
            }
        }
        self.merge(generation, &incoming)
    }
}

impl<S: ?Sized> Drop for SyncInner<S> {
    fn drop(&mut self) {
        let machine = self
            .machine
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = machine.timeout.take() {
            task.abort();
        }
    }
}

/// Keeps the selected conversation's messages in sync for one signed-in
/// user.
pub struct ConversationSync<S: ?Sized> {
    inner: Arc<SyncInner<S>>,
}

impl<S: MessageStore + ?Sized + 'static> ConversationSync<S> {
    pub fn new(
        me: UserId,
        store: Arc<S>,
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
    ) -> Self {
        Self::with_options(me, store, backend, registry, SyncOptions::default())
    }

    pub fn with_options(
        me: UserId,
        store: Arc<S>,
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
        options: SyncOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        let (messages_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(SyncInner {
                me,
                store,
                options,
                machine: Mutex::new(Machine {
                    state: SyncState::Idle,
                    generation: 0,
                    timeout: None,
                }),
                state_tx,
                messages_tx,
                messages: MessageChannel::messages(backend.clone(), registry.clone()),
                reactions: ReactionChannel::reactions(backend.clone(), registry.clone()),
                typing: PeerTyping::with_tracker(
                    backend,
                    registry,
                    TypingTracker::new(options.typing_stale),
                ),
            }),
        }
    }

    /// Open the conversation with `other`. An invalid pair deselects and
    /// returns `false`.
    pub fn select(&self, other: &UserId) -> bool {
        match conversation_key(&self.inner.me, other) {
            Some(key) => {
                self.inner.dispatch(SyncEvent::Select(key));
                true
            }
            None => {
                warn!(other = %other, "Cannot open conversation with invalid user id");
                self.deselect();
                false
            }
        }
    }

    pub fn deselect(&self) {
        self.inner.dispatch(SyncEvent::Deselect);
    }

    /// Re-fetch the current conversation, e.g. after a reconnect.
    pub fn refresh(&self) {
        let (key, generation) = {
            let machine = self.inner.lock();
            (machine.state.key().cloned(), machine.generation)
        };
        if let Some(key) = key {
            self.inner.spawn_fetch(key, generation, FetchReason::Manual);
        }
    }

    /// Show a message the user just wrote without waiting for the echo.
    pub fn apply_local(&self, message: Message) {
        let current = self.inner.lock().state.key().cloned();
        if current.is_some() && current == message.conversation_key() {
            self.inner
                .messages_tx
                .send_modify(|list| *list = upsert_message(list, message));
        }
    }

    pub fn state(&self) -> SyncState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages_tx.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages_tx.subscribe()
    }

    /// The other participant of the selected conversation.
    pub fn peer(&self) -> Option<UserId> {
        self.inner.lock().state.key().and_then(|k| k.other(&self.inner.me))
    }

    pub fn peer_is_typing(&self) -> bool {
        self.inner.typing.is_typing()
    }

    pub fn watch_peer_typing(&self) -> watch::Receiver<bool> {
        self.inner.typing.watch()
    }
}
