use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use chatwii_shared::{ConversationKey, MediaAttachment, MediaType, Message, UserId};

use crate::database::{conversion_error, optional, parse_opt_time, parse_time, parse_uuid, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, reply_to, is_read,
     created_at, updated_at, deleted_at, translated_content, language_code";

impl Database {
    /// Insert a message together with its attachment, if any.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let key = message.conversation_key().ok_or_else(|| {
            StoreError::InvalidData(format!(
                "no conversation between {} and {}",
                message.sender_id, message.receiver_id
            ))
        })?;

        self.conn().execute(
            "INSERT INTO messages (id, conversation_key, sender_id, receiver_id, content, reply_to,
                                   is_read, created_at, updated_at, deleted_at,
                                   translated_content, language_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.id.to_string(),
                key.as_str(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.content,
                message.reply_to.map(|id| id.to_string()),
                message.is_read,
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
                message.deleted_at.map(|t| t.to_rfc3339()),
                message.translated_content,
                message.language_code,
            ],
        )?;

        if let Some(media) = &message.media {
            self.insert_media(media)?;
        }
        Ok(())
    }

    pub fn insert_media(&self, media: &MediaAttachment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO message_media (id, message_id, user_id, url, media_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                media.id.to_string(),
                media.message_id.to_string(),
                media.user_id.as_str(),
                media.url,
                media.media_type.as_str(),
                media.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Latest `limit` messages of a conversation, oldest first, with media
    /// and reactions attached.
    pub fn get_conversation_messages(
        &self,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_key = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![key.as_str(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();

        for message in &mut messages {
            self.attach_related(message)?;
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        self.attach_related(&mut message)?;
        Ok(message)
    }

    /// Soft-delete: replace content, drop the attachment, stamp `deleted_at`.
    /// Returns the tombstoned message.
    pub fn tombstone_message(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<Message> {
        let mut message = self.get_message_by_id(id)?;
        message.tombstone(at);

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE messages
             SET content = ?1, translated_content = NULL, deleted_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![message.content, at.to_rfc3339(), id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM message_media WHERE message_id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;

        Ok(message)
    }

    /// Mark everything `other` sent to `reader` as read. Returns the number
    /// of rows changed.
    pub fn mark_conversation_read(
        &self,
        reader: &UserId,
        other: &UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE messages SET is_read = 1, updated_at = ?1
             WHERE receiver_id = ?2 AND sender_id = ?3 AND is_read = 0",
            params![at.to_rfc3339(), reader.as_str(), other.as_str()],
        )?;
        Ok(changed)
    }

    pub fn set_translation(&self, id: Uuid, text: &str, language_code: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE messages SET translated_content = ?1, language_code = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            params![text, language_code, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_media_for_message(&self, message_id: Uuid) -> Result<Option<MediaAttachment>> {
        optional(self.conn().query_row(
            "SELECT id, message_id, user_id, url, media_type, created_at
             FROM message_media WHERE message_id = ?1",
            params![message_id.to_string()],
            row_to_media,
        ))
    }

    fn attach_related(&self, message: &mut Message) -> Result<()> {
        message.media = self.get_media_for_message(message.id)?;
        message.reactions = self.get_reactions_for_message(message.id)?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: String = row.get(2)?;
    let content: Option<String> = row.get(3)?;
    let reply_to: Option<String> = row.get(4)?;
    let is_read: bool = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    let deleted_str: Option<String> = row.get(8)?;

    Ok(Message {
        id: parse_uuid(0, &id_str)?,
        sender_id: UserId::new(sender),
        receiver_id: UserId::new(receiver),
        content,
        media: None,
        reply_to: reply_to.map(|s| parse_uuid(4, &s)).transpose()?,
        is_read,
        created_at: parse_time(6, &created_str)?,
        updated_at: parse_time(7, &updated_str)?,
        deleted_at: parse_opt_time(8, deleted_str)?,
        translated_content: row.get(9)?,
        language_code: row.get(10)?,
        reactions: Vec::new(),
    })
}

fn row_to_media(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaAttachment> {
    let id_str: String = row.get(0)?;
    let message_str: String = row.get(1)?;
    let user: String = row.get(2)?;
    let url: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    let media_type = MediaType::parse(&kind).ok_or_else(|| {
        conversion_error(4, StoreError::InvalidData(format!("unknown media type {kind:?}")))
    })?;

    Ok(MediaAttachment {
        id: parse_uuid(0, &id_str)?,
        message_id: parse_uuid(1, &message_str)?,
        user_id: UserId::new(user),
        url,
        media_type,
        created_at: parse_time(5, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn message(from: &str, to: &str, text: &str, at: DateTime<Utc>) -> Message {
        Message::new(UserId::from(from), UserId::from(to), Some(text.into()), at)
    }

    #[test]
    fn test_conversation_is_ordered_and_limited() {
        let db = db();
        let base = Utc::now();
        for i in 0..5 {
            let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            db.insert_message(&message(from, to, &format!("m{i}"), base + Duration::seconds(i)))
                .unwrap();
        }
        db.insert_message(&message("a", "c", "other", base)).unwrap();

        let key = chatwii_shared::conversation_key(&UserId::from("a"), &UserId::from("b")).unwrap();
        let all = db.get_conversation_messages(&key, 100).unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.display_text()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);

        let latest = db.get_conversation_messages(&key, 2).unwrap();
        let texts: Vec<&str> = latest.iter().map(|m| m.display_text()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }

    #[test]
    fn test_tombstone_drops_media() {
        let mut db = db();
        let now = Utc::now();
        let mut msg = message("a", "b", "look", now);
        msg.media = Some(MediaAttachment {
            id: Uuid::new_v4(),
            message_id: msg.id,
            user_id: UserId::from("a"),
            url: "https://cdn.example/p.jpg".into(),
            media_type: MediaType::Image,
            created_at: now,
        });
        db.insert_message(&msg).unwrap();
        assert!(db.get_message_by_id(msg.id).unwrap().media.is_some());

        let later = now + Duration::seconds(10);
        let dead = db.tombstone_message(msg.id, later).unwrap();
        assert!(dead.is_deleted());

        let stored = db.get_message_by_id(msg.id).unwrap();
        assert_eq!(stored.display_text(), chatwii_shared::constants::DELETED_MESSAGE_TEXT);
        assert!(stored.media.is_none());
        assert_eq!(stored.updated_at.timestamp(), later.timestamp());
    }

    #[test]
    fn test_mark_read_only_touches_incoming() {
        let db = db();
        let now = Utc::now();
        db.insert_message(&message("b", "a", "to a", now)).unwrap();
        db.insert_message(&message("a", "b", "to b", now)).unwrap();

        let changed = db
            .mark_conversation_read(&UserId::from("a"), &UserId::from("b"), now)
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            db.mark_conversation_read(&UserId::from("a"), &UserId::from("b"), now)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_missing_message() {
        let db = db();
        assert!(matches!(
            db.get_message_by_id(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.set_translation(Uuid::new_v4(), "hola", "es"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_insert_rejects_self_conversation() {
        let db = db();
        let result = db.insert_message(&message("a", "a", "echo", Utc::now()));
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }
}
