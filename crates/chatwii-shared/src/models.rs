//! Domain models shared by the realtime layer, the relational store and the
//! client.
//!
//! Every struct derives `Serialize` so it can be written to the realtime tree
//! as-is (camelCase keys, epoch-millisecond timestamps). Reading goes through
//! the explicit decoders in [`crate::decode`] instead of `Deserialize`, since
//! the vendor payloads are looser than what we write.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DELETED_MESSAGE_TEXT;
use crate::types::{conversation_key, ConversationKey, MediaType, Role, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message between two users.
///
/// Messages are never physically removed. Deleting one turns it into a
/// tombstone: `deleted_at` is set, the content is replaced by
/// [`DELETED_MESSAGE_TEXT`] and any attachment is dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: Option<String>,
    pub media: Option<MediaAttachment>,
    pub reply_to: Option<Uuid>,
    pub is_read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub translated_content: Option<String>,
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// A fresh, unread message created now.
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        content: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content,
            media: None,
            reply_to: None,
            is_read: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            translated_content: None,
            language_code: None,
            reactions: Vec::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Text a UI should render for this message.
    pub fn display_text(&self) -> &str {
        if self.is_deleted() {
            return DELETED_MESSAGE_TEXT;
        }
        self.content.as_deref().unwrap_or("")
    }

    /// Soft-delete in place.
    pub fn tombstone(&mut self, at: DateTime<Utc>) {
        self.content = Some(DELETED_MESSAGE_TEXT.to_string());
        self.media = None;
        self.translated_content = None;
        self.deleted_at = Some(at);
        self.updated_at = at;
    }

    pub fn conversation_key(&self) -> Option<ConversationKey> {
        conversation_key(&self.sender_id, &self.receiver_id)
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// A file attached to exactly one message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: UserId,
    pub url: String,
    pub media_type: MediaType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: UserId,
    pub emoji: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    pub fn matches(&self, message_id: &Uuid, user_id: &UserId, emoji: &str) -> bool {
        &self.message_id == message_id && &self.user_id == user_id && self.emoji == emoji
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Ephemeral "online" marker stored at `presence/{uid}`.
///
/// The backend removes it on disconnect; the client never heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub nickname: String,
    pub role: Role,
    pub vip: bool,
    pub gender: Option<String>,
    pub age: Option<u8>,
    pub country: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    /// Epoch milliseconds of the last write.
    pub last_seen: i64,
    /// Viewer-only marker, never stored.
    #[serde(skip)]
    pub is_current_user: bool,
}

impl PresenceRecord {
    pub fn from_profile(profile: &Profile, now: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.id.clone(),
            nickname: profile.nickname.clone(),
            role: profile.role,
            vip: profile.vip,
            gender: profile.gender.clone(),
            age: profile.age,
            country: profile.country.clone(),
            interests: profile.interests.clone(),
            last_seen: now.timestamp_millis(),
            is_current_user: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

/// Payload stored at `typing/{key}/{uid}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    pub is_typing: bool,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Relational-only records
// ---------------------------------------------------------------------------

/// A registered (anonymous) user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub nickname: String,
    pub role: Role,
    pub vip: bool,
    pub gender: Option<String>,
    pub age: Option<u8>,
    pub country: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Directional block: `blocker_id` no longer wants contact with `blocked_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct BlockedPair {
    pub blocker_id: UserId,
    pub blocked_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub id: Uuid,
    pub user_id: UserId,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Ban {
    /// A ban without expiry is permanent.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: UserId,
    pub reported_id: UserId,
    pub message_id: Option<Uuid>,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyPhotoUpload {
    pub user_id: UserId,
    pub upload_date: NaiveDate,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_replaces_content() {
        let now = Utc::now();
        let mut msg = Message::new(
            UserId::from("a"),
            UserId::from("b"),
            Some("secret".into()),
            now,
        );
        assert_eq!(msg.display_text(), "secret");

        let later = now + chrono::Duration::seconds(5);
        msg.tombstone(later);

        assert!(msg.is_deleted());
        assert_eq!(msg.display_text(), DELETED_MESSAGE_TEXT);
        assert_eq!(msg.content.as_deref(), Some(DELETED_MESSAGE_TEXT));
        assert_eq!(msg.updated_at, later);
        assert_eq!(msg.created_at, now);
    }

    #[test]
    fn test_ban_expiry() {
        let now = Utc::now();
        let mut ban = Ban {
            id: Uuid::new_v4(),
            user_id: UserId::from("u"),
            reason: "spam".into(),
            expires_at: None,
            created_at: now,
        };
        assert!(ban.is_active(now));
        ban.expires_at = Some(now - chrono::Duration::hours(1));
        assert!(!ban.is_active(now));
    }

    #[test]
    fn test_presence_skips_viewer_marker() {
        let record = PresenceRecord {
            user_id: UserId::from("u1"),
            nickname: "Nova".into(),
            role: Role::Vip,
            vip: true,
            gender: None,
            age: Some(30),
            country: Some("FR".into()),
            interests: vec![],
            last_seen: 1,
            is_current_user: true,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("isCurrentUser").is_none());
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["role"], "vip");
    }
}
