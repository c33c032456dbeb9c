use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use chatwii_shared::{Ban, BlockedPair, Report, UserId};

use crate::database::{parse_opt_time, parse_time, parse_uuid, Database};
use crate::error::Result;

impl Database {
    /// Record a block. Blocking twice is a no-op.
    pub fn block_user(&self, pair: &BlockedPair) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO blocked_users (blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                pair.blocker_id.as_str(),
                pair.blocked_id.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn unblock_user(&self, blocker: &UserId, blocked: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker.as_str(), blocked.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Every block involving `user`, in either direction.
    pub fn get_blocked_pairs(&self, user: &UserId) -> Result<Vec<BlockedPair>> {
        let mut stmt = self.conn().prepare(
            "SELECT blocker_id, blocked_id FROM blocked_users
             WHERE blocker_id = ?1 OR blocked_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            let blocker: String = row.get(0)?;
            let blocked: String = row.get(1)?;
            Ok(BlockedPair {
                blocker_id: UserId::new(blocker),
                blocked_id: UserId::new(blocked),
            })
        })?;

        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    pub fn insert_report(&self, report: &Report) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reports (id, reporter_id, reported_id, message_id, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.id.to_string(),
                report.reporter_id.as_str(),
                report.reported_id.as_str(),
                report.message_id.map(|id| id.to_string()),
                report.reason,
                report.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_reports(&self) -> Result<Vec<Report>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, reporter_id, reported_id, message_id, reason, created_at
             FROM reports ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let reporter: String = row.get(1)?;
            let reported: String = row.get(2)?;
            let message: Option<String> = row.get(3)?;
            let created: String = row.get(5)?;
            Ok(Report {
                id: parse_uuid(0, &id)?,
                reporter_id: UserId::new(reporter),
                reported_id: UserId::new(reported),
                message_id: message.map(|m| parse_uuid(3, &m)).transpose()?,
                reason: row.get(4)?,
                created_at: parse_time(5, &created)?,
            })
        })?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?);
        }
        Ok(reports)
    }

    pub fn insert_ban(&self, ban: &Ban) -> Result<()> {
        self.conn().execute(
            "INSERT INTO bans (id, user_id, reason, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ban.id.to_string(),
                ban.user_id.as_str(),
                ban.reason,
                ban.expires_at.map(|t| t.to_rfc3339()),
                ban.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The ban currently in force for `user`, if any. Permanent bans win
    /// over timed ones, then the one ending last.
    pub fn get_active_ban(&self, user: &UserId, now: DateTime<Utc>) -> Result<Option<Ban>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, reason, expires_at, created_at
             FROM bans WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user.as_str()], row_to_ban)?;

        let mut active: Option<Ban> = None;
        for row in rows {
            let ban = row?;
            if !ban.is_active(now) {
                continue;
            }
            let replace = match (&active, ban.expires_at) {
                (None, _) => true,
                (Some(current), Some(until)) => {
                    current.expires_at.is_some_and(|c| until > c)
                }
                (Some(current), None) => current.expires_at.is_some(),
            };
            if replace {
                active = Some(ban);
            }
        }
        Ok(active)
    }

    pub fn lift_ban(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM bans WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_ban(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ban> {
    let id: String = row.get(0)?;
    let user: String = row.get(1)?;
    let expires: Option<String> = row.get(3)?;
    let created: String = row.get(4)?;
    Ok(Ban {
        id: parse_uuid(0, &id)?,
        user_id: UserId::new(user),
        reason: row.get(2)?,
        expires_at: parse_opt_time(3, expires)?,
        created_at: parse_time(4, &created)?,
    })
}
