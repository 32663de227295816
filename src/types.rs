use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a ledger credit was earned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tip,
    Subscription,
    Course,
    Service,
    Store,
    LiveSession,
    PaymentLink,
    Generic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tip => "tip",
            Category::Subscription => "subscription",
            Category::Course => "course",
            Category::Service => "service",
            Category::Store => "store",
            Category::LiveSession => "live_session",
            Category::PaymentLink => "payment_link",
            Category::Generic => "generic",
        }
    }
}

/// Lifecycle of an earning record. Only ever moves `Held -> Available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    Held,
    Available,
}

impl EarningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningStatus::Held => "held",
            EarningStatus::Available => "available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Converted,
}

impl ReferralStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReferralStatus::Pending),
            "converted" => Some(ReferralStatus::Converted),
            _ => None,
        }
    }
}

/// One credit owed to a user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EarningRecord {
    /// The ID of the earning.
    pub id: Uuid,
    /// The user who is owed the money.
    pub beneficiary_user_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
    /// The category, stored as its snake_case name.
    pub category: String,
    /// The order/enrollment/access/package record this credit belongs to.
    pub source_reference_id: Uuid,
    /// `held` or `available`.
    pub status: String,
    /// When a held store earning may be released without delivery confirmation.
    pub release_at: Option<DateTime<Utc>>,
    /// The timestamp when the earning was written.
    pub created_at: DateTime<Utc>,
}

/// Links a referred user to the affiliate who brought them in.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReferralAttribution {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referred_user_id: Uuid,
    pub status: String,
    pub months_active: i32,
    pub total_commission_earned: i64,
    pub converted_at: Option<DateTime<Utc>>,
}

/// One commission credit to an affiliate for one underlying purchase or invoice.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AffiliateEarning {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referral_id: Uuid,
    pub source_key: String,
    pub amount: i64,
    pub commission_rate_bps: i32,
    pub subscription_month: i32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Affiliate {
    pub id: Uuid,
    pub pending_earnings: i64,
    pub updated_at: DateTime<Utc>,
}

/// Held/available totals for one beneficiary.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EarningsSummary {
    pub held: i64,
    pub available: i64,
    pub records: i64,
}
