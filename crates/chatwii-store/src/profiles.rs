use rusqlite::params;

use chatwii_shared::vip::{SubscriptionStatus, VipPlan, VipSubscription};
use chatwii_shared::{Profile, Role, UserId};

use crate::database::{conversion_error, optional, parse_time, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or replace a profile keyed by its id.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let interests = serde_json::to_string(&profile.interests)?;
        self.conn()
            .execute(
                "INSERT INTO profiles (id, nickname, role, vip, gender, age, country, interests, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     nickname = excluded.nickname,
                     role = excluded.role,
                     vip = excluded.vip,
                     gender = excluded.gender,
                     age = excluded.age,
                     country = excluded.country,
                     interests = excluded.interests",
                params![
                    profile.id.as_str(),
                    profile.nickname,
                    profile.role.as_str(),
                    profile.vip,
                    profile.gender,
                    profile.age,
                    profile.country,
                    interests,
                    profile.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::PermissionDenied(format!(
                        "nickname {:?} is already taken",
                        profile.nickname
                    ))
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    pub fn get_profile(&self, id: &UserId) -> Result<Option<Profile>> {
        optional(self.conn().query_row(
            "SELECT id, nickname, role, vip, gender, age, country, interests, created_at
             FROM profiles WHERE id = ?1",
            params![id.as_str()],
            row_to_profile,
        ))
    }

    /// Case-insensitive availability check, as the provider's
    /// `is_nickname_available` function does it.
    pub fn is_nickname_available(&self, nickname: &str) -> Result<bool> {
        let taken: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM profiles WHERE nickname = ?1 COLLATE NOCASE",
            params![nickname.trim()],
            |row| row.get(0),
        )?;
        Ok(taken == 0)
    }

    pub fn get_vip_subscription(&self, user: &UserId) -> Result<Option<VipSubscription>> {
        optional(self.conn().query_row(
            "SELECT user_id, plan, status, current_period_end
             FROM vip_subscriptions WHERE user_id = ?1",
            params![user.as_str()],
            |row| {
                let user: String = row.get(0)?;
                let plan: String = row.get(1)?;
                let status: String = row.get(2)?;
                let end: String = row.get(3)?;
                Ok(VipSubscription {
                    user_id: UserId::new(user),
                    plan: VipPlan::parse(&plan).ok_or_else(|| {
                        conversion_error(1, StoreError::InvalidData(format!("plan {plan:?}")))
                    })?,
                    status: SubscriptionStatus::parse(&status).ok_or_else(|| {
                        conversion_error(2, StoreError::InvalidData(format!("status {status:?}")))
                    })?,
                    current_period_end: parse_time(3, &end)?,
                })
            },
        ))
    }

    pub fn upsert_vip_subscription(&self, sub: &VipSubscription) -> Result<()> {
        self.conn().execute(
            "INSERT INTO vip_subscriptions (user_id, plan, status, current_period_end)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 plan = excluded.plan,
                 status = excluded.status,
                 current_period_end = excluded.current_period_end",
            params![
                sub.user_id.as_str(),
                sub.plan.as_str(),
                sub.status.as_str(),
                sub.current_period_end.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id: String = row.get(0)?;
    let role: String = row.get(2)?;
    let interests: String = row.get(7)?;
    let created: String = row.get(8)?;

    Ok(Profile {
        id: UserId::new(id),
        nickname: row.get(1)?,
        role: Role::parse(&role).ok_or_else(|| {
            conversion_error(2, StoreError::InvalidData(format!("role {role:?}")))
        })?,
        vip: row.get(3)?,
        gender: row.get(4)?,
        age: row.get(5)?,
        country: row.get(6)?,
        interests: serde_json::from_str(&interests).map_err(|e| conversion_error(7, e))?,
        created_at: parse_time(8, &created)?,
    })
}
