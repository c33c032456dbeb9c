//! Online presence.
//!
//! Presence is one node per signed-in user under `presence/`. The writer
//! registers a server-side removal before writing, so the node disappears
//! when the connection drops even if the app never gets to say goodbye.

use std::sync::Arc;

use tracing::{debug, info, warn};

use chatwii_shared::types::presence_path;
use chatwii_shared::{Batch, PresenceRecord, UserId};

use crate::backend::RealtimeBackend;
use crate::channels::{ChannelStatus, PresenceChannel};
use crate::error::{RealtimeError, Result};
use crate::registry::ListenerRegistry;

pub struct PresenceWriter {
    backend: Arc<dyn RealtimeBackend>,
}

impl PresenceWriter {
    pub fn new(backend: Arc<dyn RealtimeBackend>) -> Self {
        Self { backend }
    }

    /// Publish `record` and arrange for its removal on disconnect.
    pub async fn go_online(&self, record: &PresenceRecord) -> Result<()> {
        let path = presence_path(&record.user_id)
            .ok_or_else(|| RealtimeError::InvalidPath(record.user_id.to_string()))?;
        self.backend.remove_on_disconnect(&path).await?;
        self.backend
            .set(&path, serde_json::to_value(record)?)
            .await?;
        info!(user = %record.user_id, "Presence published");
        Ok(())
    }

    /// Remove the node now and drop the disconnect handler.
    pub async fn go_offline(&self, user: &UserId) -> Result<()> {
        let path =
            presence_path(user).ok_or_else(|| RealtimeError::InvalidPath(user.to_string()))?;
        self.backend.remove(&path).await?;
        self.backend.cancel_on_disconnect(&path).await?;
        info!(user = %user, "Presence removed");
        Ok(())
    }
}

/// Live list of online users as seen by `viewer`.
pub struct PresenceDirectory {
    channel: PresenceChannel,
    viewer: UserId,
}

impl PresenceDirectory {
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        registry: Arc<ListenerRegistry>,
        viewer: UserId,
    ) -> Self {
        Self {
            channel: PresenceChannel::presence(backend, registry),
            viewer,
        }
    }

    /// `None` reaches the callback once if the listener fails for good.
    pub fn attach(&self, callback: impl Fn(Option<Vec<PresenceRecord>>) + Send + Sync + 'static) {
        let viewer = self.viewer.clone();
        self.channel
            .attach_directory(move |batch| callback(batch.map(|b| online_users(b, &viewer))));
    }

    pub fn detach(&self) {
        self.channel.detach();
    }

    pub fn status(&self) -> ChannelStatus {
        self.channel.status()
    }
}

/// Flatten a presence snapshot: the viewer's own record is marked and
/// listed first, everyone else follows by nickname.
pub fn online_users(batch: Batch<PresenceRecord>, viewer: &UserId) -> Vec<PresenceRecord> {
    for (key, error) in &batch.rejected {
        warn!(key = %key, error = %error, "Skipping malformed presence record");
    }
    let mut users: Vec<PresenceRecord> = batch
        .into_values()
        .into_iter()
        .map(|mut record| {
            record.is_current_user = &record.user_id == viewer;
            record
        })
        .collect();
    users.sort_by(|a, b| {
        b.is_current_user
            .cmp(&a.is_current_user)
            .then_with(|| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()))
    });
    debug!(count = users.len(), "Presence snapshot");
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use chatwii_shared::Role;
    use std::sync::Mutex;

    fn record(id: &str, nickname: &str) -> PresenceRecord {
        PresenceRecord {
            user_id: UserId::from(id),
            nickname: nickname.into(),
            role: Role::Standard,
            vip: false,
            gender: None,
            age: Some(25),
            country: None,
            interests: vec![],
            last_seen: 1_700_000_000_000,
            is_current_user: false,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_presence_removed_on_disconnect() {
        let backend = MemoryBackend::new();
        let writer = PresenceWriter::new(Arc::new(backend.clone()));
        writer.go_online(&record("u1", "Nova")).await.unwrap();

        assert!(backend.value_at("presence/u1").is_some());
        assert_eq!(backend.on_disconnect_paths(), vec!["presence/u1"]);

        backend.simulate_disconnect();
        assert_eq!(backend.value_at("presence/u1"), None);
    }

    #[tokio::test]
    async fn test_go_offline() {
        let backend = MemoryBackend::new();
        let writer = PresenceWriter::new(Arc::new(backend.clone()));
        writer.go_online(&record("u1", "Nova")).await.unwrap();
        writer.go_offline(&UserId::from("u1")).await.unwrap();

        assert_eq!(backend.value_at("presence/u1"), None);
        assert!(backend.on_disconnect_paths().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_user_rejected() {
        let backend = MemoryBackend::new();
        let writer = PresenceWriter::new(Arc::new(backend.clone()));
        let result = writer.go_online(&record("bad_id", "Nova")).await;
        assert!(matches!(result, Err(RealtimeError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_directory_marks_viewer() {
        let backend = MemoryBackend::new();
        let registry = Arc::new(ListenerRegistry::new());
        let writer = PresenceWriter::new(Arc::new(backend.clone()));
        writer.go_online(&record("u2", "orion")).await.unwrap();
        writer.go_online(&record("u1", "Nova")).await.unwrap();
        writer.go_online(&record("u3", "Atlas")).await.unwrap();

        let directory =
            PresenceDirectory::new(Arc::new(backend.clone()), registry, UserId::from("u1"));
        let latest: Arc<Mutex<Vec<PresenceRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = latest.clone();
        directory.attach(move |users| *sink.lock().unwrap() = users.unwrap_or_default());
        settle().await;

        let users = latest.lock().unwrap().clone();
        let names: Vec<&str> = users.iter().map(|u| u.nickname.as_str()).collect();
        assert_eq!(names, vec!["Nova", "Atlas", "orion"]);
        assert!(users[0].is_current_user);
        assert!(!users[1].is_current_user);
        assert_eq!(directory.status(), ChannelStatus::Connected);

        backend.remove("presence/u3").await.unwrap();
        assert_eq!(latest.lock().unwrap().len(), 2);
    }
}
