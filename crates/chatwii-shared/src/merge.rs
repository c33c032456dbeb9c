//! Merging message sets coming from fetches and realtime pushes.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::Message;

/// Merge `incoming` into `current`.
///
/// Last write wins per message id: an incoming message replaces the current
/// one when its `updated_at` is the same or newer. Ids are never duplicated
/// and the result is sorted ascending by `created_at`, then by id.
pub fn merge_messages(current: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut by_id: HashMap<Uuid, Message> = HashMap::with_capacity(current.len() + incoming.len());

    for msg in current.iter().chain(incoming.iter()) {
        match by_id.get(&msg.id) {
            Some(existing) if existing.updated_at > msg.updated_at => {}
            _ => {
                by_id.insert(msg.id, msg.clone());
            }
        }
    }

    let mut merged: Vec<Message> = by_id.into_values().collect();
    sort_messages(&mut merged);
    merged
}

/// Merge a single pushed message.
pub fn upsert_message(current: &[Message], incoming: Message) -> Vec<Message> {
    merge_messages(current, std::slice::from_ref(&incoming))
}

pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
