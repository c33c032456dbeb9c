//! The seam between the client and the realtime database vendor.
//!
//! A backend exposes a JSON tree addressed by slash-separated paths. Readers
//! attach listeners to a path and receive the full value under it on every
//! change; writers replace, patch or remove subtrees. The vendor SDK is one
//! implementation, [`crate::memory::MemoryBackend`] is the other.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RealtimeError, Result};

/// What a listener sees on its path.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The listener is attached and the backend acknowledged it.
    Subscribed,
    /// Full value under the listened path, `None` when the node is empty.
    Snapshot(Option<Value>),
    /// The listener was cancelled by the backend. No further events follow.
    Error(RealtimeError),
}

/// Listener callback. Backends must deliver events asynchronously, never
/// from inside [`RealtimeBackend::subscribe`] itself.
pub type EventCallback = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

type CancelFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Handle returned by [`RealtimeBackend::subscribe`].
///
/// Dropping the handle does not detach the listener; call
/// [`Subscription::unsubscribe`] (or hand it to a
/// [`crate::registry::ListenerRegistry`]) to release it.
pub struct Subscription {
    path: String,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, cancel: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            path: path.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn detached(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cancel: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn unsubscribe(mut self) -> Result<()> {
        match self.cancel.take() {
            Some(cancel) => cancel(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Attach a listener. The first events are `Subscribed` followed by the
    /// current snapshot, or a single `Error` if the listen is rejected.
    fn subscribe(&self, path: &str, callback: EventCallback) -> Result<Subscription>;

    /// One-shot read of the value under `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`. Writing `Value::Null` removes the node.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Patch children of `path`. Keys may themselves be relative paths.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Ask the backend to remove `path` server-side when this client's
    /// connection drops.
    async fn remove_on_disconnect(&self, path: &str) -> Result<()>;

    /// Cancel a previous [`RealtimeBackend::remove_on_disconnect`].
    async fn cancel_on_disconnect(&self, path: &str) -> Result<()>;
}

/// Reject paths the vendor would refuse: empty, empty segments, or any of
/// `. # $ [ ]`.
pub fn validate_path(path: &str) -> Result<Vec<&str>> {
    const ILLEGAL: &[char] = &['.', '#', '$', '[', ']'];
    if path.is_empty() {
        return Err(RealtimeError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || s.contains(ILLEGAL)) {
        return Err(RealtimeError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_validate_path() {
        assert_eq!(validate_path("messages/a_b").unwrap(), vec!["messages", "a_b"]);
        assert!(validate_path("").is_err());
        assert!(validate_path("messages//x").is_err());
        assert!(validate_path("messages/").is_err());
        assert!(validate_path("presence/a.b").is_err());
        assert!(validate_path("typing/$x").is_err());
    }

    #[test]
    fn test_unsubscribe_runs_cancel_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let sub = Subscription::new("messages/a_b", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(sub.path(), "messages/a_b");
        sub.unsubscribe().unwrap();
        assert!(fired.load(Ordering::SeqCst));

        assert!(Subscription::detached("x").unsubscribe().is_ok());
    }
}
