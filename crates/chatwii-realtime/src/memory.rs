//! In-process realtime backend.
//!
//! Holds the whole tree in memory and fans changes out to listeners. Used in
//! mock mode and by every test in the workspace; the knobs at the bottom of
//! the impl (`simulate_disconnect`, `deny`, `hold_subscriptions`, ...) let
//! tests drive the failure paths the vendor would produce.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use chatwii_shared::constants::CONNECTED_PATH;

use crate::backend::{validate_path, ChannelEvent, EventCallback, RealtimeBackend, Subscription};
use crate::error::{RealtimeError, Result};

struct Listener {
    path: String,
    callback: EventCallback,
    /// Set once `Subscribed` and the first snapshot went out.
    live: bool,
}

struct State {
    root: Value,
    listeners: BTreeMap<u64, Listener>,
    next_id: u64,
    connected: bool,
    hold: bool,
    fail_subscribe: bool,
    denied: Vec<String>,
    on_disconnect: Vec<String>,
    writes: HashMap<String, usize>,
    reads: HashMap<String, usize>,
}

impl State {
    fn is_denied(&self, path: &str) -> bool {
        self.denied.iter().any(|prefix| is_within(path, prefix))
    }

    fn snapshot_for(&self, path: &str) -> Option<Value> {
        if path == CONNECTED_PATH {
            return Some(Value::Bool(self.connected));
        }
        let segments: Vec<&str> = path.split('/').collect();
        get_at(&self.root, &segments).cloned()
    }

    /// Callbacks and fresh snapshots for every live listener touched by a
    /// change at `changed`.
    fn affected(&self, changed: &str) -> Vec<(EventCallback, ChannelEvent)> {
        self.listeners
            .values()
            .filter(|l| l.live && (is_within(&l.path, changed) || is_within(changed, &l.path)))
            .map(|l| {
                (
                    l.callback.clone(),
                    ChannelEvent::Snapshot(self.snapshot_for(&l.path)),
                )
            })
            .collect()
    }
}

/// Shared, cloneable handle to an in-memory tree.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// An empty, connected backend.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                root: Value::Object(Map::new()),
                listeners: BTreeMap::new(),
                next_id: 1,
                connected: true,
                hold: false,
                fail_subscribe: false,
                denied: Vec::new(),
                on_disconnect: Vec::new(),
                writes: HashMap::new(),
                reads: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    fn schedule_initial(&self, id: u64) {
        let state = Arc::downgrade(&self.state);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { deliver_initial(&state, id) });
            }
            Err(_) => deliver_initial(&state, id),
        }
    }

    fn write(&self, path: &str, mutate: impl FnOnce(&mut Value, &[&str])) -> Result<()> {
        let segments = validate_path(path)?;
        let notifications = {
            let mut state = self.lock();
            if state.is_denied(path) {
                return Err(RealtimeError::PermissionDenied(path.to_string()));
            }
            mutate(&mut state.root, &segments);
            *state.writes.entry(path.to_string()).or_insert(0) += 1;
            state.affected(path)
        };
        trace!(path = %path, listeners = notifications.len(), "Applied write");
        dispatch(notifications);
        Ok(())
    }

    // --- Test and mock-mode controls -------------------------------------

    /// Flip the `.info/connected` flag without running disconnect handlers.
    pub fn set_connected(&self, connected: bool) {
        let notifications = {
            let mut state = self.lock();
            state.connected = connected;
            state.affected(CONNECTED_PATH)
        };
        debug!(connected, "Memory backend connectivity changed");
        dispatch(notifications);
    }

    /// Drop the connection the way the vendor would: run every registered
    /// on-disconnect removal, then report `connected = false`.
    pub fn simulate_disconnect(&self) {
        let notifications = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.on_disconnect);
            let mut out = Vec::new();
            for path in &pending {
                let segments: Vec<&str> = path.split('/').collect();
                remove_at(&mut state.root, &segments);
                out.extend(state.affected(path));
            }
            state.connected = false;
            out.extend(state.affected(CONNECTED_PATH));
            debug!(removed = pending.len(), "Simulated disconnect");
            out
        };
        dispatch(notifications);
    }

    /// Keep new listeners pending (no `Subscribed`, no snapshot) until
    /// released. Releasing flushes every pending listener.
    pub fn hold_subscriptions(&self, hold: bool) {
        let pending: Vec<u64> = {
            let mut state = self.lock();
            state.hold = hold;
            if hold {
                return;
            }
            state
                .listeners
                .iter()
                .filter(|(_, l)| !l.live)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in pending {
            self.schedule_initial(id);
        }
    }

    /// Make `subscribe` itself fail with a backend error.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Reject reads, writes and listens at or below `prefix`.
    pub fn deny(&self, prefix: impl Into<String>) {
        self.lock().denied.push(prefix.into());
    }

    pub fn allow_all(&self) {
        self.lock().denied.clear();
    }

    /// Cancel every live listener at or below `prefix` with `error`.
    pub fn fail_listeners(&self, prefix: &str, error: RealtimeError) {
        let cancelled: Vec<EventCallback> = {
            let mut state = self.lock();
            let ids: Vec<u64> = state
                .listeners
                .iter()
                .filter(|(_, l)| l.live && is_within(&l.path, prefix))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| state.listeners.remove(id))
                .map(|l| l.callback)
                .collect()
        };
        for callback in cancelled {
            callback(ChannelEvent::Error(error.clone()));
        }
    }

    /// Synchronous peek at the tree.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        self.lock().snapshot_for(path)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Writes (`set`, `update`, `remove`) issued exactly at `path`.
    pub fn write_count(&self, path: &str) -> usize {
        self.lock().writes.get(path).copied().unwrap_or(0)
    }

    pub fn read_count(&self, path: &str) -> usize {
        self.lock().reads.get(path).copied().unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn listeners_at(&self, path: &str) -> usize {
        self.lock().listeners.values().filter(|l| l.path == path).count()
    }

    pub fn on_disconnect_paths(&self) -> Vec<String> {
        self.lock().on_disconnect.clone()
    }
}

#[async_trait]
impl RealtimeBackend for MemoryBackend {
    fn subscribe(&self, path: &str, callback: EventCallback) -> Result<Subscription> {
        if path != CONNECTED_PATH {
            validate_path(path)?;
        }

        let (id, deliver_now) = {
            let mut state = self.lock();
            if state.fail_subscribe {
                return Err(RealtimeError::Backend(format!("listen rejected at {path}")));
            }
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.insert(
                id,
                Listener {
                    path: path.to_string(),
                    callback,
                    live: false,
                },
            );
            (id, !state.hold)
        };
        debug!(path = %path, id, "Listener attached");

        if deliver_now {
            self.schedule_initial(id);
        }

        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(path, move || {
            if let Some(state) = state.upgrade() {
                if lock_state(&state).listeners.remove(&id).is_some() {
                    debug!(id, "Listener detached");
                }
            }
            Ok(())
        }))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let mut state = self.lock();
        if path == CONNECTED_PATH {
            return Ok(Some(Value::Bool(state.connected)));
        }
        validate_path(path)?;
        if !state.connected {
            return Err(RealtimeError::Disconnected);
        }
        if state.is_denied(path) {
            return Err(RealtimeError::PermissionDenied(path.to_string()));
        }
        *state.reads.entry(path.to_string()).or_insert(0) += 1;
        Ok(state.snapshot_for(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.write(path, |root, segments| set_at(root, segments, value))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        for key in fields.keys() {
            validate_path(key)?;
        }
        self.write(path, |root, segments| {
            for (key, value) in fields {
                let mut full: Vec<&str> = segments.to_vec();
                full.extend(key.split('/'));
                set_at(root, &full, value);
            }
        })
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.write(path, |root, segments| remove_at(root, segments))
    }

    async fn remove_on_disconnect(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut state = self.lock();
        if state.is_denied(path) {
            return Err(RealtimeError::PermissionDenied(path.to_string()));
        }
        if !state.on_disconnect.iter().any(|p| p == path) {
            state.on_disconnect.push(path.to_string());
        }
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.lock().on_disconnect.retain(|p| p != path);
        Ok(())
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deliver_initial(state: &Weak<Mutex<State>>, id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (callback, events) = {
        let mut guard = lock_state(&state);
        let Some(path) = guard.listeners.get(&id).map(|l| l.path.clone()) else {
            return;
        };
        if guard.is_denied(&path) {
            let Some(listener) = guard.listeners.remove(&id) else {
                return;
            };
            (
                listener.callback,
                vec![ChannelEvent::Error(RealtimeError::PermissionDenied(path))],
            )
        } else {
            let snapshot = guard.snapshot_for(&path);
            let Some(listener) = guard.listeners.get_mut(&id) else {
                return;
            };
            listener.live = true;
            (
                listener.callback.clone(),
                vec![ChannelEvent::Subscribed, ChannelEvent::Snapshot(snapshot)],
            )
        }
    };
    for event in events {
        callback(event);
    }
}

fn dispatch(notifications: Vec<(EventCallback, ChannelEvent)>) {
    for (callback, event) in notifications {
        callback(event);
    }
}

/// Whether `path` equals `prefix` or lies below it, segment-wise.
fn is_within(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

fn get_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, seg| node.get(*seg))
}

fn set_at(root: &mut Value, segments: &[&str], value: Value) {
    if value.is_null() {
        remove_at(root, segments);
        return;
    }
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

/// Remove the node and prune parents left empty.
fn remove_at(root: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Value::Object(map) = root else {
        return;
    };
    if rest.is_empty() {
        map.remove(*first);
        return;
    }
    let now_empty = match map.get_mut(*first) {
        Some(child) => {
            remove_at(child, rest);
            matches!(child, Value::Object(m) if m.is_empty())
        }
        None => false,
    };
    if now_empty {
        map.remove(*first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<ChannelEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: EventCallback = Arc::new(move |e| sink.lock().unwrap().push(e));
        (callback, events)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let backend = MemoryBackend::new();
        backend.set("presence/u1", json!({"nickname": "Nova"})).await.unwrap();
        assert_eq!(
            backend.get("presence/u1/nickname").await.unwrap(),
            Some(json!("Nova"))
        );
        backend.remove("presence/u1").await.unwrap();
        assert_eq!(backend.get("presence").await.unwrap(), None);
        assert_eq!(backend.write_count("presence/u1"), 2);
    }

    #[tokio::test]
    async fn test_update_merges_children() {
        let backend = MemoryBackend::new();
        backend.set("messages/a_b/m1", json!({"content": "hi", "isRead": false})).await.unwrap();
        let mut patch = Map::new();
        patch.insert("isRead".into(), json!(true));
        backend.update("messages/a_b/m1", patch).await.unwrap();
        assert_eq!(
            backend.value_at("messages/a_b/m1"),
            Some(json!({"content": "hi", "isRead": true}))
        );
    }

    #[tokio::test]
    async fn test_listener_gets_subscribed_then_snapshots() {
        let backend = MemoryBackend::new();
        backend.set("typing/a_b/a", json!({"isTyping": true, "timestamp": 1})).await.unwrap();

        let (callback, events) = recorder();
        let sub = backend.subscribe("typing/a_b", callback).unwrap();
        assert!(events.lock().unwrap().is_empty());
        settle().await;

        backend.remove("typing/a_b/a").await.unwrap();
        backend.set("typing/c_d/c", json!(true)).await.unwrap();

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ChannelEvent::Subscribed);
        assert_eq!(
            seen[1],
            ChannelEvent::Snapshot(Some(json!({"a": {"isTyping": true, "timestamp": 1}})))
        );
        assert_eq!(seen[2], ChannelEvent::Snapshot(None));

        sub.unsubscribe().unwrap();
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_listen_errors() {
        let backend = MemoryBackend::new();
        backend.deny("messages");
        let (callback, events) = recorder();
        let _sub = backend.subscribe("messages/a_b", callback).unwrap();
        settle().await;

        assert_eq!(
            events.lock().unwrap().clone(),
            vec![ChannelEvent::Error(RealtimeError::PermissionDenied(
                "messages/a_b".into()
            ))]
        );
        assert_eq!(backend.listener_count(), 0);
        assert!(matches!(
            backend.set("messages/a_b/x", json!(1)).await,
            Err(RealtimeError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_held_subscriptions_release() {
        let backend = MemoryBackend::new();
        backend.hold_subscriptions(true);
        let (callback, events) = recorder();
        let _sub = backend.subscribe("messages/a_b", callback).unwrap();
        settle().await;
        assert!(events.lock().unwrap().is_empty());

        backend.hold_subscriptions(false);
        settle().await;
        assert_eq!(events.lock().unwrap()[0], ChannelEvent::Subscribed);
    }

    #[tokio::test]
    async fn test_simulate_disconnect_runs_handlers() {
        let backend = MemoryBackend::new();
        backend.set("presence/u1", json!({"nickname": "Nova"})).await.unwrap();
        backend.set("presence/u2", json!({"nickname": "Orion"})).await.unwrap();
        backend.remove_on_disconnect("presence/u1").await.unwrap();

        let (callback, events) = recorder();
        let _sub = backend.subscribe(CONNECTED_PATH, callback).unwrap();
        settle().await;

        backend.simulate_disconnect();

        assert_eq!(backend.value_at("presence/u1"), None);
        assert!(backend.value_at("presence/u2").is_some());
        assert!(!backend.is_connected());
        assert!(backend.on_disconnect_paths().is_empty());
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&ChannelEvent::Snapshot(Some(json!(false))))
        );
        assert_eq!(backend.get("presence").await, Err(RealtimeError::Disconnected));
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let backend = MemoryBackend::new();
        let (callback, _) = recorder();
        assert!(backend.subscribe("messages/", callback).is_err());
        assert!(backend.set("a.b", json!(1)).await.is_err());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("messages/a_b", "messages"));
        assert!(is_within("messages", "messages"));
        assert!(!is_within("messagesX", "messages"));
        assert!(!is_within("messages", "messages/a_b"));
    }
}
