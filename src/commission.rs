//! Commission schedules and split arithmetic.
//!
//! Amounts are minor units (cents), rates are basis points. Nothing in here
//! touches storage.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::types::{Category, EarningStatus};

const BPS_DENOMINATOR: i64 = 10_000;

/// Affiliate rate for the first two months after conversion.
pub const AFFILIATE_INTRO_RATE_BPS: i32 = 2_500;
/// Affiliate rate from the third month on.
pub const AFFILIATE_STANDARD_RATE_BPS: i32 = 1_500;
/// Last month that still earns the intro rate.
pub const AFFILIATE_INTRO_MONTHS: i32 = 2;

/// How long store earnings stay held without a delivery confirmation.
pub const STORE_HOLD_DAYS: i64 = 40;

/// Platform commission for a purchase category, in basis points.
pub fn platform_rate_bps(category: Category) -> i32 {
    match category {
        Category::PaymentLink | Category::Course | Category::LiveSession => 4_000,
        Category::Service => 2_500,
        Category::Store => 2_000,
        Category::Generic | Category::Tip | Category::Subscription => 0,
    }
}

/// Initial ledger status for a beneficiary's share of a purchase.
pub fn initial_status(category: Category) -> EarningStatus {
    match category {
        Category::Service | Category::Store | Category::Generic => EarningStatus::Held,
        Category::Course
        | Category::LiveSession
        | Category::PaymentLink
        | Category::Tip
        | Category::Subscription => EarningStatus::Available,
    }
}

/// Release deadline persisted alongside a held earning, if the category has one.
pub fn release_deadline(category: Category, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match category {
        Category::Store => Some(created_at + Duration::days(STORE_HOLD_DAYS)),
        _ => None,
    }
}

/// Affiliate commission rate as a function of months since conversion.
pub fn affiliate_rate_bps(months_active: i32) -> i32 {
    if months_active <= AFFILIATE_INTRO_MONTHS {
        AFFILIATE_INTRO_RATE_BPS
    } else {
        AFFILIATE_STANDARD_RATE_BPS
    }
}

/// Commission owed to an affiliate, rounded down to the cent.
pub fn affiliate_commission(platform_earnings: i64, months_active: i32) -> (i32, i64) {
    let rate = affiliate_rate_bps(months_active);
    let amount = (platform_earnings as i128 * rate as i128 / BPS_DENOMINATOR as i128) as i64;
    (rate, amount)
}

/// Which base the generic-fallback purchase feeds into the affiliate flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericCommissionBase {
    /// Commission on the whole order total.
    #[default]
    FullAmount,
    /// Commission on the platform share, which is zero for generic purchases.
    PlatformShare,
}

/// Result of splitting a purchase total between the platform and its beneficiaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub platform_earnings: i64,
    /// One share per beneficiary, in the order the beneficiaries were given.
    pub shares: Vec<i64>,
}

impl Split {
    pub fn beneficiary_total(&self) -> i64 {
        self.shares.iter().sum()
    }
}

/// Splits `total` at `rate_bps` across `beneficiaries` recipients.
///
/// The platform share rounds up; the beneficiary pot is divided evenly and
/// the last beneficiary absorbs the division remainder.
pub fn split(total: i64, rate_bps: i32, beneficiaries: usize) -> Split {
    let numerator = total as i128 * rate_bps as i128;
    let denominator = BPS_DENOMINATOR as i128;
    let platform_earnings = ((numerator + denominator - 1) / denominator) as i64;
    let pot = total - platform_earnings;

    if beneficiaries == 0 {
        return Split {
            platform_earnings,
            shares: Vec::new(),
        };
    }

    let n = beneficiaries as i64;
    let each = pot / n;
    let mut shares = vec![each; beneficiaries];
    if let Some(last) = shares.last_mut() {
        *last += pot - each * n;
    }

    Split {
        platform_earnings,
        shares,
    }
}
