//! Message actions of the signed-in user.
//!
//! The relational store is the record of truth. Every write lands there
//! first and is then mirrored into the realtime tree, where the peer's
//! channels pick it up. A failed mirror is logged and left to the next
//! fetch.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatwii_shared::types::{message_path, reaction_path};
use chatwii_shared::validation::{validate_message_text, validate_reaction};
use chatwii_shared::{
    conversation_key, ConversationKey, MediaAttachment, MediaType, Message, Reaction, UserId,
    ValidationError,
};
use chatwii_store::{MessageStore, ReactionStore};

use crate::error::{ClientError, Result};
use crate::state::ChatClient;
use crate::translate::Translation;

/// An uploaded file to attach to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub url: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub media: Option<OutgoingMedia>,
    pub reply_to: Option<Uuid>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn media(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            media: Some(OutgoingMedia {
                url: url.into(),
                media_type,
            }),
            ..Self::default()
        }
    }

    pub fn replying_to(mut self, id: Uuid) -> Self {
        self.reply_to = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionToggle {
    Added(Reaction),
    Removed(Reaction),
}

impl ChatClient {
    pub async fn send_message(&self, to: &UserId, outgoing: OutgoingMessage) -> Result<Message> {
        let session = self.session()?;
        let me = &session.user;

        let text = validate_message_text(outgoing.text.as_deref(), outgoing.media.is_some())?;
        let key = conversation_key(me, to)
            .ok_or_else(|| ValidationError::InvalidUserId(to.to_string()))?;
        if !self.can_interact_with_user(to) {
            return Err(ClientError::Blocked);
        }

        let now = Utc::now();
        let today = now.date_naive();
        let is_image = outgoing
            .media
            .as_ref()
            .is_some_and(|m| m.media_type == MediaType::Image);

        if let Some(media) = &outgoing.media {
            if !session.capabilities.can_send(media.media_type) {
                return Err(ClientError::MediaNotAllowed(media.media_type));
            }
        }
        if is_image {
            if let Some(limit) = session.capabilities.daily_photo_limit {
                let uploaded = self.store.daily_photo_count(me, today).await?;
                if !session.capabilities.photo_allowed(uploaded) {
                    info!(user = %me, uploaded, limit, "Daily photo limit reached");
                    return Err(ClientError::QuotaExceeded { limit });
                }
            }
        }

        self.limiter.check(to, text.as_deref()).await?;

        let mut message = Message::new(me.clone(), to.clone(), text, now);
        message.reply_to = outgoing.reply_to;
        message.media = outgoing.media.map(|media| MediaAttachment {
            id: Uuid::new_v4(),
            message_id: message.id,
            user_id: me.clone(),
            url: media.url,
            media_type: media.media_type,
            created_at: now,
        });

        self.store.insert_message(&message).await?;
        if is_image {
            self.store.increment_daily_photo_count(me, today).await?;
        }
        self.mirror(&message_path(&key, &message.id), &message).await;
        session.sync.apply_local(message.clone());

        if let Some((peer, typing)) = session.typing.lock().await.as_ref() {
            if peer == to {
                if let Err(e) = typing.stop().await {
                    debug!(error = %e, "Failed to clear typing state after send");
                }
            }
        }

        info!(
            message = %message.id,
            to = %to,
            media = message.media.as_ref().map(|m| m.media_type.as_str()),
            "Message sent"
        );
        Ok(message)
    }

    /// Tombstone one of the user's own messages. Deleting twice is a no-op.
    pub async fn delete_message(&self, id: &Uuid) -> Result<Message> {
        let session = self.session()?;
        let message = self.load_message(id).await?;
        if message.sender_id != session.user {
            return Err(ClientError::NotAllowed(
                "only the sender can delete a message".into(),
            ));
        }
        if message.is_deleted() {
            return Ok(message);
        }

        let tombstone = self.store.tombstone_message(id, Utc::now()).await?;
        if let Some(key) = tombstone.conversation_key() {
            self.mirror(&message_path(&key, &tombstone.id), &tombstone).await;
        }
        session.sync.apply_local(tombstone.clone());
        info!(message = %id, "Message deleted");
        Ok(tombstone)
    }

    /// Add the reaction, or remove it if the user already left the same one.
    pub async fn toggle_reaction(&self, message_id: &Uuid, emoji: &str) -> Result<ReactionToggle> {
        let session = self.session()?;
        let me = &session.user;
        let emoji = validate_reaction(emoji)?;

        let message = self.load_message(message_id).await?;
        let key = self.conversation_of(&message, me)?;
        if message.is_deleted() {
            return Err(ClientError::NotAllowed("message was deleted".into()));
        }
        if let Some(other) = key.other(me) {
            if !self.can_interact_with_user(&other) {
                return Err(ClientError::Blocked);
            }
        }

        match self.store.find_reaction(message_id, me, &emoji).await? {
            Some(existing) => {
                self.store.delete_reaction(&existing.id).await?;
                let path = reaction_path(&key, &existing.id);
                if let Err(e) = self.realtime.remove(&path).await {
                    warn!(path = %path, error = %e, "Failed to mirror reaction removal");
                }
                debug!(message = %message_id, emoji = %emoji, "Reaction removed");
                Ok(ReactionToggle::Removed(existing))
            }
            None => {
                let reaction = Reaction {
                    id: Uuid::new_v4(),
                    message_id: *message_id,
                    user_id: me.clone(),
                    emoji,
                    created_at: Utc::now(),
                };
                self.store.insert_reaction(&reaction).await?;
                self.mirror(&reaction_path(&key, &reaction.id), &reaction).await;
                debug!(message = %message_id, emoji = %reaction.emoji, "Reaction added");
                Ok(ReactionToggle::Added(reaction))
            }
        }
    }

    /// Mark everything `other` sent to the user as read. Returns how many
    /// messages changed.
    pub async fn mark_conversation_read(&self, other: &UserId) -> Result<usize> {
        let session = self.session()?;
        let updated = self
            .store
            .mark_conversation_read(&session.user, other, Utc::now())
            .await?;
        if updated > 0 {
            debug!(other = %other, updated, "Conversation marked read");
            session.sync.refresh();
        }
        Ok(updated)
    }

    /// Load the message a reply points at. Gives up after the reply
    /// deadline; any failure renders as "original unavailable".
    pub async fn fetch_reply_target(&self, id: &Uuid) -> Option<Message> {
        let me = self.current_user()?;
        let lookup = self.store.get_message(id);
        match tokio::time::timeout(self.config.reply_timeout, lookup).await {
            Ok(Ok(Some(message))) if message.involves(&me) => Some(message),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(message = %id, error = %e, "Reply target lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    message = %id,
                    timeout_ms = self.config.reply_timeout.as_millis() as u64,
                    "Reply target lookup timed out"
                );
                None
            }
        }
    }

    /// Translate a received message and store the result on it.
    pub async fn translate_message(&self, id: &Uuid, target_language: &str) -> Result<Translation> {
        let session = self.session()?;
        let message = self.load_message(id).await?;
        self.conversation_of(&message, &session.user)?;
        let text = match (&message.content, message.is_deleted()) {
            (Some(text), false) => text,
            _ => return Err(ClientError::NotAllowed("nothing to translate".into())),
        };

        let translation = self.translator.translate(text, target_language).await?;
        self.store
            .set_translation(id, &translation.text, &translation.detected_language)
            .await?;
        debug!(message = %id, target = target_language, "Message translated");
        Ok(translation)
    }

    async fn load_message(&self, id: &Uuid) -> Result<Message> {
        self.store
            .get_message(id)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("message {id}")))
    }

    /// The message's conversation, if `me` takes part in it.
    fn conversation_of(&self, message: &Message, me: &UserId) -> Result<ConversationKey> {
        match message.conversation_key() {
            Some(key) if key.involves(me) => Ok(key),
            _ => Err(ClientError::NotAllowed("not part of this conversation".into())),
        }
    }

    async fn mirror<T: Serialize>(&self, path: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to encode realtime payload");
                return;
            }
        };
        if let Err(e) = self.realtime.set(path, value).await {
            warn!(path = %path, error = %e, "Realtime mirror failed, peers will see it on next fetch");
        }
    }
}
