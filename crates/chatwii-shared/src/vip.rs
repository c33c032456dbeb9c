use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DAILY_PHOTO_LIMIT;
use crate::models::Profile;
use crate::types::{MediaType, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipPlan {
    Monthly,
    Quarterly,
    Yearly,
}

impl VipPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            VipPlan::Monthly => "monthly",
            VipPlan::Quarterly => "quarterly",
            VipPlan::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(VipPlan::Monthly),
            "quarterly" => Some(VipPlan::Quarterly),
            "yearly" => Some(VipPlan::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PastDue,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" | "canceled" => Some(SubscriptionStatus::Cancelled),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

// Row of `vip_subscriptions`, written by the payment webhook, read by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipSubscription {
    pub user_id: UserId,
    pub plan: VipPlan,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
}

impl VipSubscription {
    /// A cancelled subscription stays usable until the paid period ends.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Cancelled
        ) && now < self.current_period_end
    }
}

/// What a user may do, derived from their role and VIP state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub media_types: &'static [MediaType],
    /// `None` means unlimited.
    pub daily_photo_limit: Option<u32>,
}

const STANDARD_MEDIA: &[MediaType] = &[MediaType::Image];
const VIP_MEDIA: &[MediaType] = &[MediaType::Image, MediaType::Voice, MediaType::Video];

impl Capabilities {
    pub fn for_user(role: Role, vip: bool) -> Self {
        if vip || matches!(role, Role::Vip | Role::Admin) {
            Self {
                media_types: VIP_MEDIA,
                daily_photo_limit: None,
            }
        } else {
            Self {
                media_types: STANDARD_MEDIA,
                daily_photo_limit: Some(DAILY_PHOTO_LIMIT),
            }
        }
    }

    pub fn for_profile(profile: &Profile) -> Self {
        Self::for_user(profile.role, profile.vip)
    }

    pub fn can_send(&self, media_type: MediaType) -> bool {
        self.media_types.contains(&media_type)
    }

    /// Whether another image fits in today's allowance.
    pub fn photo_allowed(&self, uploaded_today: u32) -> bool {
        self.daily_photo_limit.map_or(true, |limit| uploaded_today < limit)
    }
}

/// Resolve the effective VIP flag from the profile and its subscription row.
pub fn effective_vip(profile: &Profile, subscription: Option<&VipSubscription>, now: DateTime<Utc>) -> bool {
    profile.role == Role::Admin || subscription.is_some_and(|s| s.is_active(now)) || profile.vip
}
