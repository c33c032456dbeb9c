use rusqlite::params;
use uuid::Uuid;

use chatwii_shared::{Reaction, UserId};

use crate::database::{optional, parse_time, parse_uuid, Database};
use crate::error::Result;

impl Database {
    /// Insert a reaction. A duplicate (same message, user and emoji) is
    /// ignored; returns whether a row was written.
    pub fn add_reaction(&self, reaction: &Reaction) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_reactions (id, message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reaction.id.to_string(),
                reaction.message_id.to_string(),
                reaction.user_id.as_str(),
                reaction.emoji,
                reaction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_reaction(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM message_reactions WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn find_reaction(
        &self,
        message_id: Uuid,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        optional(self.conn().query_row(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM message_reactions
             WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user_id.as_str(), emoji],
            row_to_reaction,
        ))
    }

    pub fn get_reactions_for_message(&self, message_id: Uuid) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM message_reactions WHERE message_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], row_to_reaction)?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    let id_str: String = row.get(0)?;
    let message_str: String = row.get(1)?;
    let user: String = row.get(2)?;
    let emoji: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    Ok(Reaction {
        id: parse_uuid(0, &id_str)?,
        message_id: parse_uuid(1, &message_str)?,
        user_id: UserId::new(user),
        emoji,
        created_at: parse_time(4, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwii_shared::Message;
    use chrono::Utc;

    fn reaction(message_id: Uuid, user: &str, emoji: &str) -> Reaction {
        Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id: UserId::from(user),
            emoji: emoji.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_reaction_ignored() {
        let db = Database::open_in_memory().unwrap();
        let msg = Message::new(UserId::from("a"), UserId::from("b"), Some("hi".into()), Utc::now());
        db.insert_message(&msg).unwrap();

        assert!(db.add_reaction(&reaction(msg.id, "b", "👍")).unwrap());
        assert!(!db.add_reaction(&reaction(msg.id, "b", "👍")).unwrap());
        assert!(db.add_reaction(&reaction(msg.id, "b", "❤️")).unwrap());
        assert_eq!(db.get_reactions_for_message(msg.id).unwrap().len(), 2);

        let found = db.find_reaction(msg.id, &UserId::from("b"), "👍").unwrap().unwrap();
        assert!(db.remove_reaction(found.id).unwrap());
        assert!(db.find_reaction(msg.id, &UserId::from("b"), "👍").unwrap().is_none());
    }

    #[test]
    fn test_reactions_follow_message_delete() {
        let db = Database::open_in_memory().unwrap();
        let msg = Message::new(UserId::from("a"), UserId::from("b"), Some("hi".into()), Utc::now());
        db.insert_message(&msg).unwrap();
        db.add_reaction(&reaction(msg.id, "a", "🔥")).unwrap();

        db.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![msg.id.to_string()])
            .unwrap();
        assert!(db.get_reactions_for_message(msg.id).unwrap().is_empty());
    }
}
