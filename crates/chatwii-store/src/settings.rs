use chrono::{NaiveDate, Utc};
use rusqlite::params;

use chatwii_shared::UserId;

use crate::database::{optional, Database};
use crate::error::Result;

impl Database {
    pub fn get_site_setting(&self, key: &str) -> Result<Option<String>> {
        optional(self.conn().query_row(
            "SELECT value FROM site_settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ))
    }

    pub fn set_site_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO site_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Photos `user` sent on `date` (UTC).
    pub fn get_daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32> {
        let count = optional(self.conn().query_row(
            "SELECT count FROM daily_photo_uploads WHERE user_id = ?1 AND upload_date = ?2",
            params![user.as_str(), date.to_string()],
            |row| row.get::<_, u32>(0),
        ))?;
        Ok(count.unwrap_or(0))
    }

    /// Bump the counter for `date` and return the new value.
    pub fn increment_daily_photo_count(&self, user: &UserId, date: NaiveDate) -> Result<u32> {
        self.conn().execute(
            "INSERT INTO daily_photo_uploads (user_id, upload_date, count) VALUES (?1, ?2, 1)
             ON CONFLICT(user_id, upload_date) DO UPDATE SET count = count + 1",
            params![user.as_str(), date.to_string()],
        )?;
        self.get_daily_photo_count(user, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_setting_overwrite() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_site_setting("maintenance_mode").unwrap(), None);
        db.set_site_setting("maintenance_mode", "true").unwrap();
        db.set_site_setting("maintenance_mode", "false").unwrap();
        assert_eq!(
            db.get_site_setting("maintenance_mode").unwrap().as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_daily_photo_counter_is_per_day() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::from("u1");
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();

        assert_eq!(db.get_daily_photo_count(&user, monday).unwrap(), 0);
        assert_eq!(db.increment_daily_photo_count(&user, monday).unwrap(), 1);
        assert_eq!(db.increment_daily_photo_count(&user, monday).unwrap(), 2);
        assert_eq!(db.get_daily_photo_count(&user, tuesday).unwrap(), 0);
    }
}
