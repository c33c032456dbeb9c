use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    CONVERSATION_KEY_SEPARATOR, FORBIDDEN_ID_CHARS, MESSAGES_ROOT, PRESENCE_ROOT, REACTIONS_ROOT,
    TYPING_ROOT,
};

// User identity = the auth provider's opaque user id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id can be used as a realtime path segment and as one half
    /// of a conversation key.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(FORBIDDEN_ID_CHARS)
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Canonical key of a one-to-one conversation.
///
/// Built from the two participants' ids sorted lexicographically and joined by
/// [`CONVERSATION_KEY_SEPARATOR`], so `key(a, b) == key(b, a)`. Only path-safe
/// ids are accepted, which keeps the mapping injective: the separator can never
/// appear inside either half.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, in sorted order.
    pub fn participants(&self) -> (UserId, UserId) {
        let (a, b) = self
            .0
            .split_once(CONVERSATION_KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""));
        (UserId::from(a), UserId::from(b))
    }

    pub fn involves(&self, user: &UserId) -> bool {
        let (a, b) = self.participants();
        &a == user || &b == user
    }

    /// The participant that is not `me`, if `me` takes part at all.
    pub fn other(&self, me: &UserId) -> Option<UserId> {
        let (a, b) = self.participants();
        if &a == me {
            Some(b)
        } else if &b == me {
            Some(a)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the conversation key for an unordered pair of users.
///
/// Returns `None` when either id is empty or not path-safe, or when both ids
/// are the same user. Callers must not subscribe or write when this is `None`.
pub fn conversation_key(a: &UserId, b: &UserId) -> Option<ConversationKey> {
    if !a.is_path_safe() || !b.is_path_safe() || a == b {
        return None;
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Some(ConversationKey(format!(
        "{}{}{}",
        lo.0, CONVERSATION_KEY_SEPARATOR, hi.0
    )))
}

/// Same as [`conversation_key`] for optional ids, as handed over by UI state.
pub fn conversation_key_opt(a: Option<&UserId>, b: Option<&UserId>) -> Option<ConversationKey> {
    conversation_key(a?, b?)
}

// ---------------------------------------------------------------------------
// Realtime paths
// ---------------------------------------------------------------------------

pub fn messages_path(key: &ConversationKey) -> String {
    format!("{MESSAGES_ROOT}/{key}")
}

pub fn message_path(key: &ConversationKey, message_id: &Uuid) -> String {
    format!("{MESSAGES_ROOT}/{key}/{message_id}")
}

pub fn reactions_path(key: &ConversationKey) -> String {
    format!("{REACTIONS_ROOT}/{key}")
}

pub fn reaction_path(key: &ConversationKey, reaction_id: &Uuid) -> String {
    format!("{REACTIONS_ROOT}/{key}/{reaction_id}")
}

pub fn typing_path(key: &ConversationKey) -> String {
    format!("{TYPING_ROOT}/{key}")
}

pub fn typing_user_path(key: &ConversationKey, user: &UserId) -> String {
    format!("{TYPING_ROOT}/{key}/{user}")
}

/// Presence node of a single user, or `None` for an id that is not path-safe.
pub fn presence_path(user: &UserId) -> Option<String> {
    user.is_path_safe().then(|| format!("{PRESENCE_ROOT}/{user}"))
}

// ---------------------------------------------------------------------------
// Small enums shared by models and capability rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Standard,
    Vip,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Vip => "vip",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Role::Standard),
            "vip" => Some(Role::Vip),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Voice,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Voice => "voice",
            MediaType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaType::Image),
            "voice" => Some(MediaType::Voice),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    #[test]
    fn test_key_is_symmetric() {
        let a = uid("7f3a");
        let b = uid("01bc");
        assert_eq!(conversation_key(&a, &b), conversation_key(&b, &a));
        assert_eq!(conversation_key(&a, &b).unwrap().as_str(), "01bc_7f3a");
    }

    #[test]
    fn test_key_distinct_pairs_differ() {
        let ids = ["a", "b", "ab", "ba", "abc", "c", "b-c"];
        let mut seen = std::collections::HashMap::new();
        for (i, x) in ids.iter().enumerate() {
            for y in ids.iter().skip(i + 1) {
                let key = conversation_key(&uid(x), &uid(y)).unwrap();
                let mut pair = [x.to_string(), y.to_string()];
                pair.sort();
                if let Some(prev) = seen.insert(key.clone(), pair.clone()) {
                    panic!("{key} produced by {prev:?} and {pair:?}");
                }
            }
        }
    }

    #[test]
    fn test_key_rejects_invalid_ids() {
        assert!(conversation_key(&uid(""), &uid("b")).is_none());
        assert!(conversation_key(&uid("a_b"), &uid("c")).is_none());
        assert!(conversation_key(&uid("a/b"), &uid("c")).is_none());
        assert!(conversation_key(&uid("same"), &uid("same")).is_none());
        assert!(conversation_key_opt(None, Some(&uid("b"))).is_none());
    }

    #[test]
    fn test_participants_and_other() {
        let me = uid("m1");
        let them = uid("t2");
        let key = conversation_key(&me, &them).unwrap();
        assert_eq!(key.participants(), (me.clone(), them.clone()));
        assert_eq!(key.other(&me), Some(them.clone()));
        assert_eq!(key.other(&uid("zz")), None);
        assert!(key.involves(&them));
    }

    #[test]
    fn test_paths() {
        let key = conversation_key(&uid("a1"), &uid("b2")).unwrap();
        assert_eq!(messages_path(&key), "messages/a1_b2");
        assert_eq!(typing_user_path(&key, &uid("a1")), "typing/a1_b2/a1");
        assert_eq!(presence_path(&uid("a1")).as_deref(), Some("presence/a1"));
        assert_eq!(presence_path(&uid("")), None);
    }
}
