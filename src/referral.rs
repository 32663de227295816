//! Referral tracking and affiliate commission.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::commission::affiliate_commission;
use crate::types::{Affiliate, AffiliateEarning, ReferralAttribution, ReferralStatus};

/// What kind of payment triggered the commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A purchase or first subscription payment. Never advances months_active.
    OneOff,
    /// A subscription renewal invoice. Advances months_active by one.
    Recurring,
}

/// Result of running the affiliate flow for one purchase or invoice.
#[derive(Debug, Clone)]
pub enum Commission {
    /// The buyer was not referred by anyone.
    NoReferral,
    /// This source already produced an affiliate earning.
    AlreadyRecorded,
    Recorded(AffiliateEarning),
}

/// The month a commission is calculated for, given the referral's current state.
///
/// Returns `(month, converting)`.
pub fn commission_month(status: ReferralStatus, months_active: i32, trigger: Trigger) -> (i32, bool) {
    match (status, trigger) {
        (ReferralStatus::Pending, _) => (1, true),
        (ReferralStatus::Converted, Trigger::Recurring) => (months_active + 1, false),
        (ReferralStatus::Converted, Trigger::OneOff) => (months_active.max(1), false),
    }
}

async fn lock_active_referral(
    tx: &mut Transaction<'_, Postgres>,
    referred_user_id: Uuid,
) -> Result<Option<ReferralAttribution>, sqlx::Error> {
    sqlx::query_as::<_, ReferralAttribution>(
        r#"SELECT id, affiliate_id, referred_user_id, status, months_active, total_commission_earned, converted_at
           FROM referrals
           WHERE referred_user_id = $1 AND status IN ('pending', 'converted')
           FOR UPDATE"#,
    )
    .bind(referred_user_id)
    .fetch_optional(tx.as_mut())
    .await
}

async fn insert_affiliate_earning(
    tx: &mut Transaction<'_, Postgres>,
    earning: &AffiliateEarning,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"INSERT INTO affiliate_earnings
             (id, affiliate_id, referral_id, source_key, amount, commission_rate_bps, subscription_month, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
           ON CONFLICT (referral_id, source_key) DO NOTHING"#,
    )
    .bind(earning.id)
    .bind(earning.affiliate_id)
    .bind(earning.referral_id)
    .bind(&earning.source_key)
    .bind(earning.amount)
    .bind(earning.commission_rate_bps)
    .bind(earning.subscription_month)
    .bind(&earning.status)
    .execute(tx.as_mut())
    .await?;

    Ok(res.rows_affected() == 1)
}

/// Credits the affiliate who referred `buyer_id`, if any.
///
/// The earning insert, the referral update and the affiliate increment all run
/// on `tx`. A second call with the same `source_key` is a no-op.
pub async fn apply_commission(
    tx: &mut Transaction<'_, Postgres>,
    buyer_id: Uuid,
    base: i64,
    source_key: &str,
    trigger: Trigger,
    now: DateTime<Utc>,
) -> Result<Commission, sqlx::Error> {
    let Some(referral) = lock_active_referral(tx, buyer_id).await? else {
        return Ok(Commission::NoReferral);
    };
    let Some(status) = ReferralStatus::parse(&referral.status) else {
        warn!(referral_id = %referral.id, status = %referral.status, "unknown referral status");
        return Ok(Commission::NoReferral);
    };

    let (month, converting) = commission_month(status, referral.months_active, trigger);
    let (rate, amount) = affiliate_commission(base, month);

    let earning = AffiliateEarning {
        id: Uuid::new_v4(),
        affiliate_id: referral.affiliate_id,
        referral_id: referral.id,
        source_key: source_key.to_string(),
        amount,
        commission_rate_bps: rate,
        subscription_month: month,
        status: "pending".to_string(),
    };

    if !insert_affiliate_earning(tx, &earning).await? {
        info!(referral_id = %referral.id, source_key, "affiliate earning already recorded");
        return Ok(Commission::AlreadyRecorded);
    }

    sqlx::query(
        r#"UPDATE referrals
           SET months_active = $2,
               total_commission_earned = total_commission_earned + $3,
               status = 'converted',
               converted_at = COALESCE(converted_at, $4)
           WHERE id = $1"#,
    )
    .bind(referral.id)
    .bind(month)
    .bind(amount)
    .bind(now)
    .execute(tx.as_mut())
    .await?;

    sqlx::query(
        r#"UPDATE affiliates
           SET pending_earnings = pending_earnings + $2, updated_at = $3
           WHERE id = $1"#,
    )
    .bind(referral.affiliate_id)
    .bind(amount)
    .bind(now)
    .execute(tx.as_mut())
    .await?;

    info!(
        affiliate_id = %referral.affiliate_id,
        referral_id = %referral.id,
        month,
        rate_bps = rate,
        amount,
        converted = converting,
        "affiliate commission recorded"
    );

    Ok(Commission::Recorded(earning))
}

pub async fn affiliate(pool: &PgPool, affiliate_id: Uuid) -> Result<Option<Affiliate>, sqlx::Error> {
    sqlx::query_as::<_, Affiliate>(
        r#"SELECT id, pending_earnings, updated_at FROM affiliates WHERE id = $1"#,
    )
    .bind(affiliate_id)
    .fetch_optional(pool)
    .await
}

pub async fn referral_for_user(
    pool: &PgPool,
    referred_user_id: Uuid,
) -> Result<Option<ReferralAttribution>, sqlx::Error> {
    sqlx::query_as::<_, ReferralAttribution>(
        r#"SELECT id, affiliate_id, referred_user_id, status, months_active, total_commission_earned, converted_at
           FROM referrals
           WHERE referred_user_id = $1 AND status IN ('pending', 'converted')"#,
    )
    .bind(referred_user_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_referral_converts_at_month_one() {
        assert_eq!(commission_month(ReferralStatus::Pending, 0, Trigger::OneOff), (1, true));
        assert_eq!(commission_month(ReferralStatus::Pending, 0, Trigger::Recurring), (1, true));
    }

    #[test]
    fn one_off_purchases_keep_the_month() {
        assert_eq!(commission_month(ReferralStatus::Converted, 4, Trigger::OneOff), (4, false));
    }

    #[test]
    fn renewals_advance_the_month() {
        assert_eq!(commission_month(ReferralStatus::Converted, 2, Trigger::Recurring), (3, false));
    }

    #[test]
    fn third_month_renewal_drops_to_standard_rate() {
        let (month, _) = commission_month(ReferralStatus::Converted, 2, Trigger::Recurring);
        assert_eq!(affiliate_commission(10_000, month), (1_500, 1_500));
    }
}
