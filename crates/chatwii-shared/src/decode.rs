//! Explicit decoders for payloads read back from the backends.
//!
//! Vendor snapshots are loosely typed: timestamps arrive as epoch millis, as
//! RFC 3339 strings or as `{seconds, nanoseconds}` objects, and keys can be
//! camelCase or snake_case depending on which provider wrote them. Every shape
//! is handled here, at one boundary, and anything else becomes a
//! [`DecodeError`] instead of a half-filled entity.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::models::{MediaAttachment, Message, PresenceRecord, Reaction, TypingState};
use crate::types::{MediaType, Role, UserId};

/// Decode one entity from a JSON value.
pub trait Decode: Sized {
    fn decode(value: &Value) -> Result<Self, DecodeError>;
}

/// Decode a whole realtime snapshot (the value at a subscribed path, `None`
/// when the path is empty).
pub trait SnapshotDecode: Sized + Send + 'static {
    fn from_snapshot(snapshot: Option<&Value>) -> Result<Self, DecodeError>;
}

/// Children of a keyed realtime node, decoded one by one.
///
/// A malformed child does not poison its siblings: it lands in `rejected`
/// and the rest of the batch is still delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<(String, T)>,
    pub rejected: Vec<(String, DecodeError)>,
}

impl<T> Batch<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, v)| v)
    }

    pub fn into_values(self) -> Vec<T> {
        self.items.into_iter().map(|(_, v)| v).collect()
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Decode + Send + 'static> SnapshotDecode for Batch<T> {
    fn from_snapshot(snapshot: Option<&Value>) -> Result<Self, DecodeError> {
        let obj = match snapshot {
            None | Some(Value::Null) => return Ok(Self::empty()),
            Some(Value::Object(obj)) => obj,
            Some(other) => {
                return Err(DecodeError::UnexpectedShape {
                    expected: "object",
                    found: kind_of(other),
                })
            }
        };

        let mut batch = Self::empty();
        for (key, child) in obj {
            match T::decode(child) {
                Ok(item) => batch.items.push((key.clone(), item)),
                Err(e) => batch.rejected.push((key.clone(), e)),
            }
        }
        Ok(batch)
    }
}

/// The `.info/connected` flag. An empty node counts as disconnected.
impl SnapshotDecode for bool {
    fn from_snapshot(snapshot: Option<&Value>) -> Result<Self, DecodeError> {
        match snapshot {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(DecodeError::UnexpectedShape {
                expected: "bool",
                found: kind_of(other),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity decoders
// ---------------------------------------------------------------------------

impl Decode for Message {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = as_object(value)?;
        let created_at = timestamp(obj, &["createdAt", "created_at"], "createdAt")?;
        let updated_at =
            opt_timestamp(obj, &["updatedAt", "updated_at"], "updatedAt")?.unwrap_or(created_at);

        let media = match lookup(obj, &["media", "media_attachment"]) {
            None | Some(Value::Null) => None,
            Some(v) => Some(MediaAttachment::decode(v)?),
        };
        let reactions = match lookup(obj, &["reactions", "message_reactions"]) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(Reaction::decode)
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Object(map)) => map
                .values()
                .map(Reaction::decode)
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: "reactions",
                    reason: format!("expected array or object, got {}", kind_of(other)),
                })
            }
        };

        Ok(Message {
            id: uuid(obj, &["id"], "id")?,
            sender_id: user_id(obj, &["senderId", "sender_id"], "senderId")?,
            receiver_id: user_id(obj, &["receiverId", "receiver_id"], "receiverId")?,
            content: opt_string(obj, &["content"], "content")?,
            media,
            reply_to: opt_uuid(obj, &["replyTo", "reply_to", "reply_to_message_id"], "replyTo")?,
            is_read: opt_bool(obj, &["isRead", "is_read", "read"], "isRead")?.unwrap_or(false),
            created_at,
            updated_at,
            deleted_at: opt_timestamp(obj, &["deletedAt", "deleted_at"], "deletedAt")?,
            translated_content: opt_string(
                obj,
                &["translatedContent", "translated_content"],
                "translatedContent",
            )?,
            language_code: opt_string(obj, &["languageCode", "language_code"], "languageCode")?,
            reactions,
        })
    }
}

impl Decode for MediaAttachment {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = as_object(value)?;
        let kind = string(obj, &["mediaType", "media_type", "type"], "mediaType")?;
        let media_type = MediaType::parse(&kind).ok_or_else(|| DecodeError::InvalidField {
            field: "mediaType",
            reason: format!("unknown media type {kind:?}"),
        })?;
        Ok(MediaAttachment {
            id: uuid(obj, &["id"], "id")?,
            message_id: uuid(obj, &["messageId", "message_id"], "messageId")?,
            user_id: user_id(obj, &["userId", "user_id"], "userId")?,
            url: string(obj, &["url", "file_url"], "url")?,
            media_type,
            created_at: timestamp(obj, &["createdAt", "created_at"], "createdAt")?,
        })
    }
}

impl Decode for Reaction {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = as_object(value)?;
        Ok(Reaction {
            id: uuid(obj, &["id"], "id")?,
            message_id: uuid(obj, &["messageId", "message_id"], "messageId")?,
            user_id: user_id(obj, &["userId", "user_id"], "userId")?,
            emoji: string(obj, &["emoji"], "emoji")?,
            created_at: timestamp(obj, &["createdAt", "created_at"], "createdAt")?,
        })
    }
}

impl Decode for PresenceRecord {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = as_object(value)?;
        let role = match opt_string(obj, &["role"], "role")? {
            None => Role::Standard,
            Some(s) => Role::parse(&s).ok_or_else(|| DecodeError::InvalidField {
                field: "role",
                reason: format!("unknown role {s:?}"),
            })?,
        };
        let age = match lookup(obj, &["age"]) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let raw = n.as_u64().ok_or_else(|| DecodeError::InvalidField {
                    field: "age",
                    reason: "not a positive integer".into(),
                })?;
                Some(u8::try_from(raw).map_err(|_| DecodeError::InvalidField {
                    field: "age",
                    reason: format!("{raw} out of range"),
                })?)
            }
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: "age",
                    reason: format!("expected number, got {}", kind_of(other)),
                })
            }
        };
        let interests = match lookup(obj, &["interests"]) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: "interests",
                    reason: format!("expected array, got {}", kind_of(other)),
                })
            }
        };
        let last_seen = match lookup(obj, &["lastSeen", "last_seen"]) {
            None | Some(Value::Null) => 0,
            Some(v) => to_datetime(v, "lastSeen")?.timestamp_millis(),
        };

        Ok(PresenceRecord {
            user_id: user_id(obj, &["userId", "user_id", "id"], "userId")?,
            nickname: string(obj, &["nickname"], "nickname")?,
            role,
            vip: opt_bool(obj, &["vip", "isVip", "is_vip"], "vip")?.unwrap_or(role == Role::Vip),
            gender: opt_string(obj, &["gender"], "gender")?,
            age,
            country: opt_string(obj, &["country"], "country")?,
            interests,
            last_seen,
            is_current_user: false,
        })
    }
}

impl Decode for TypingState {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        // Older clients wrote a bare boolean.
        if let Value::Bool(is_typing) = value {
            return Ok(TypingState {
                is_typing: *is_typing,
                timestamp: 0,
            });
        }
        let obj = as_object(value)?;
        let is_typing = opt_bool(obj, &["isTyping", "is_typing"], "isTyping")?
            .ok_or(DecodeError::MissingField("isTyping"))?;
        let timestamp = match lookup(obj, &["timestamp", "updatedAt"]) {
            None | Some(Value::Null) => 0,
            Some(v) => to_datetime(v, "timestamp")?.timestamp_millis(),
        };
        Ok(TypingState {
            is_typing,
            timestamp,
        })
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, DecodeError> {
    value.as_object().ok_or(DecodeError::UnexpectedShape {
        expected: "object",
        found: kind_of(value),
    })
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn string(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<String, DecodeError> {
    opt_string(obj, keys, field)?.ok_or(DecodeError::MissingField(field))
}

fn opt_string(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<String>, DecodeError> {
    match lookup(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DecodeError::InvalidField {
            field,
            reason: format!("expected string, got {}", kind_of(other)),
        }),
    }
}

fn opt_bool(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<bool>, DecodeError> {
    match lookup(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(DecodeError::InvalidField {
            field,
            reason: format!("expected bool, got {}", kind_of(other)),
        }),
    }
}

fn user_id(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<UserId, DecodeError> {
    let raw = string(obj, keys, field)?;
    if raw.is_empty() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "empty user id".into(),
        });
    }
    Ok(UserId(raw))
}

fn uuid(obj: &Map<String, Value>, keys: &[&str], field: &'static str) -> Result<Uuid, DecodeError> {
    opt_uuid(obj, keys, field)?.ok_or(DecodeError::MissingField(field))
}

fn opt_uuid(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<Uuid>, DecodeError> {
    opt_string(obj, keys, field)?
        .map(|s| {
            Uuid::parse_str(&s).map_err(|e| DecodeError::InvalidField {
                field,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn timestamp(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<DateTime<Utc>, DecodeError> {
    opt_timestamp(obj, keys, field)?.ok_or(DecodeError::MissingField(field))
}

fn opt_timestamp(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, DecodeError> {
    match lookup(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => to_datetime(v, field).map(Some),
    }
}

/// Accepts epoch milliseconds, RFC 3339 strings and `{seconds, nanoseconds}`
/// objects (with or without leading underscores).
pub fn to_datetime(value: &Value, field: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidField { field, reason };
    match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| invalid(format!("{n} is not an integer")))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| invalid(format!("{millis} out of range")))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(e.to_string())),
        Value::Object(obj) => {
            let seconds = lookup(obj, &["seconds", "_seconds"])
                .and_then(Value::as_i64)
                .ok_or_else(|| invalid("timestamp object without seconds".into()))?;
            let nanos = lookup(obj, &["nanoseconds", "_nanoseconds"])
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let nanos = u32::try_from(nanos).map_err(|_| invalid("nanoseconds overflow".into()))?;
            Utc.timestamp_opt(seconds, nanos)
                .single()
                .ok_or_else(|| invalid(format!("{seconds}s out of range")))
        }
        other => Err(invalid(format!(
            "expected timestamp, got {}",
            kind_of(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_json(id: &str) -> Value {
        json!({
            "id": id,
            "senderId": "alice",
            "receiverId": "bob",
            "content": "hello",
            "isRead": false,
            "createdAt": 1_700_000_000_000i64,
            "updatedAt": "2023-11-14T22:13:21Z",
        })
    }

    #[test]
    fn test_message_accepts_mixed_timestamps() {
        let id = Uuid::new_v4().to_string();
        let msg = Message::decode(&message_json(&id)).unwrap();
        assert_eq!(msg.id.to_string(), id);
        assert_eq!(msg.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(msg.updated_at.timestamp(), 1_700_000_001);
        assert!(msg.deleted_at.is_none());
    }

    #[test]
    fn test_seconds_object_timestamp() {
        let ts = to_datetime(&json!({"seconds": 10, "nanoseconds": 5_000_000}), "t").unwrap();
        assert_eq!(ts.timestamp_millis(), 10_005);
        let ts = to_datetime(&json!({"_seconds": 3}), "t").unwrap();
        assert_eq!(ts.timestamp(), 3);
    }

    #[test]
    fn test_message_snake_case_row() {
        let id = Uuid::new_v4();
        let value = json!({
            "id": id.to_string(),
            "sender_id": "alice",
            "receiver_id": "bob",
            "content": null,
            "is_read": true,
            "created_at": "2024-01-01T00:00:00Z",
            "deleted_at": "2024-01-02T00:00:00Z",
        });
        let msg = Message::decode(&value).unwrap();
        assert!(msg.is_read);
        assert!(msg.is_deleted());
        assert_eq!(msg.updated_at, msg.created_at);
    }

    #[test]
    fn test_malformed_child_is_rejected_not_fatal() {
        let good = Uuid::new_v4().to_string();
        let snapshot = json!({
            (good.clone()): message_json(&good),
            "broken": {"id": "not-a-uuid"},
        });
        let batch = Batch::<Message>::from_snapshot(Some(&snapshot)).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].0, "broken");
    }

    #[test]
    fn test_non_object_snapshot_is_error() {
        let err = Batch::<Message>::from_snapshot(Some(&json!([1, 2]))).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedShape {
                expected: "object",
                found: "array"
            }
        );
        assert!(Batch::<Message>::from_snapshot(None).unwrap().is_empty());
    }

    #[test]
    fn test_typing_shapes() {
        let t = TypingState::decode(&json!({"isTyping": true, "timestamp": 42})).unwrap();
        assert_eq!(t, TypingState { is_typing: true, timestamp: 42 });
        let t = TypingState::decode(&json!(false)).unwrap();
        assert!(!t.is_typing);
        assert!(TypingState::decode(&json!({"timestamp": 1})).is_err());
    }

    #[test]
    fn test_presence_defaults() {
        let p = PresenceRecord::decode(&json!({
            "userId": "u1",
            "nickname": "Luna",
            "role": "vip",
            "age": 27,
            "lastSeen": {"seconds": 2}
        }))
        .unwrap();
        assert!(p.vip);
        assert_eq!(p.age, Some(27));
        assert_eq!(p.last_seen, 2_000);
        assert!(!p.is_current_user);
    }

    #[test]
    fn test_written_message_decodes_back() {
        let mut msg = Message::new("a".into(), "b".into(), Some("hi".into()), Utc::now());
        msg.tombstone(Utc::now());
        let value = serde_json::to_value(&msg).unwrap();
        let back = Message::decode(&value).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.content, msg.content);
        assert_eq!(
            back.deleted_at.map(|d| d.timestamp_millis()),
            msg.deleted_at.map(|d| d.timestamp_millis())
        );
    }
}
