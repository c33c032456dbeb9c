//! Seed data for mock mode.

use chrono::{DateTime, Duration, Utc};

use chatwii_shared::constants::MAINTENANCE_MODE_SETTING;
use chatwii_shared::vip::{SubscriptionStatus, VipPlan, VipSubscription};
use chatwii_shared::{Profile, Role, UserId};

use crate::database::Database;
use crate::error::Result;

/// Demo users shown to a mock-mode session.
pub fn fixture_profiles(now: DateTime<Utc>) -> Vec<Profile> {
    let profile = |id: &str, nickname: &str, role: Role, age: u8, country: &str, interests: &[&str]| Profile {
        id: UserId::from(id),
        nickname: nickname.to_string(),
        role,
        vip: role != Role::Standard,
        gender: None,
        age: Some(age),
        country: Some(country.to_string()),
        interests: interests.iter().map(|s| s.to_string()).collect(),
        created_at: now - Duration::days(30),
    };

    vec![
        profile("mock-nova", "Nova", Role::Vip, 29, "FR", &["music", "travel"]),
        profile("mock-orion", "Orion", Role::Standard, 34, "CA", &["gaming"]),
        profile("mock-atlas", "Atlas", Role::Standard, 41, "DE", &["books", "hiking"]),
        profile("mock-luna", "Luna", Role::Standard, 23, "BR", &[]),
        profile("mock-sentinel", "Sentinel", Role::Admin, 38, "US", &[]),
    ]
}

/// Insert the fixture profiles, Nova's VIP subscription and default site
/// settings.
pub fn seed(db: &Database, now: DateTime<Utc>) -> Result<()> {
    for profile in fixture_profiles(now) {
        db.upsert_profile(&profile)?;
    }
    db.upsert_vip_subscription(&VipSubscription {
        user_id: UserId::from("mock-nova"),
        plan: VipPlan::Yearly,
        status: SubscriptionStatus::Active,
        current_period_end: now + Duration::days(365),
    })?;
    db.set_site_setting(MAINTENANCE_MODE_SETTING, "false")?;
    tracing::debug!("Seeded mock fixtures");
    Ok(())
}
