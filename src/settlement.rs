use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::commission::{self, GenericCommissionBase};
use crate::event::PurchaseKind;
use crate::types::{Category, EarningStatus};

/// An earning record about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningDraft {
    pub beneficiary_user_id: Uuid,
    pub amount: i64,
    pub status: EarningStatus,
    pub release_at: Option<DateTime<Utc>>,
}

/// How one purchase's money is attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub category: Category,
    pub platform_earnings: i64,
    /// Base amount handed to the affiliate flow.
    pub affiliate_base: i64,
    pub created_at: DateTime<Utc>,
    pub earnings: Vec<EarningDraft>,
}

/// Beneficiaries named by the purchase itself. Payment links resolve their
/// owner from storage instead.
pub fn beneficiaries(kind: &PurchaseKind) -> Vec<Uuid> {
    match kind {
        PurchaseKind::PaymentLink { .. } => Vec::new(),
        PurchaseKind::Service { freelancer_id, .. } => vec![*freelancer_id],
        PurchaseKind::Course { creator_id, .. } => vec![*creator_id],
        PurchaseKind::LiveSession { streamer_id, .. } => vec![*streamer_id],
        PurchaseKind::Store { seller_ids } => seller_ids.clone(),
        PurchaseKind::Generic { beneficiary_id } => vec![*beneficiary_id],
    }
}

pub fn plan(
    category: Category,
    total_amount: i64,
    beneficiaries: &[Uuid],
    generic_base: GenericCommissionBase,
    now: DateTime<Utc>,
) -> Settlement {
    let split = commission::split(
        total_amount,
        commission::platform_rate_bps(category),
        beneficiaries.len(),
    );
    let status = commission::initial_status(category);
    let release_at = commission::release_deadline(category, now);

    let earnings = beneficiaries
        .iter()
        .zip(split.shares.iter())
        .map(|(beneficiary, amount)| EarningDraft {
            beneficiary_user_id: *beneficiary,
            amount: *amount,
            status,
            release_at,
        })
        .collect();

    let affiliate_base = match (category, generic_base) {
        (Category::Generic, GenericCommissionBase::FullAmount) => total_amount,
        _ => split.platform_earnings,
    };

    Settlement {
        category,
        platform_earnings: split.platform_earnings,
        affiliate_base,
        created_at: now,
        earnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn course_without_referral_pays_creator_sixty_percent() {
        let creator = Uuid::new_v4();
        let now = Utc::now();
        let s = plan(
            Category::Course,
            10_000,
            &[creator],
            GenericCommissionBase::FullAmount,
            now,
        );
        assert_eq!(s.platform_earnings, 4_000);
        assert_eq!(
            s.earnings,
            vec![EarningDraft {
                beneficiary_user_id: creator,
                amount: 6_000,
                status: EarningStatus::Available,
                release_at: None,
            }]
        );
    }

    #[test]
    fn freelance_order_is_held_and_feeds_platform_share_to_affiliates() {
        let freelancer = Uuid::new_v4();
        let s = plan(
            Category::Service,
            10_000,
            &[freelancer],
            GenericCommissionBase::FullAmount,
            Utc::now(),
        );
        assert_eq!(s.platform_earnings, 2_500);
        assert_eq!(s.affiliate_base, 2_500);
        assert_eq!(s.earnings[0].amount, 7_500);
        assert_eq!(s.earnings[0].status, EarningStatus::Held);
        assert!(s.earnings[0].release_at.is_none());
    }

    #[test]
    fn store_order_split_across_three_sellers() {
        let sellers = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let now = Utc::now();
        let s = plan(
            Category::Store,
            5_000,
            &sellers,
            GenericCommissionBase::FullAmount,
            now,
        );
        assert_eq!(s.platform_earnings, 1_000);
        let amounts: Vec<i64> = s.earnings.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![1_333, 1_333, 1_334]);
        assert_eq!(s.earnings[2].beneficiary_user_id, sellers[2]);
        for earning in &s.earnings {
            assert_eq!(earning.status, EarningStatus::Held);
            assert_eq!(earning.release_at, Some(now + Duration::days(40)));
        }
    }

    #[test]
    fn generic_policies_differ_only_in_affiliate_base() {
        let beneficiary = [Uuid::new_v4()];
        let now = Utc::now();
        let full = plan(
            Category::Generic,
            8_000,
            &beneficiary,
            GenericCommissionBase::FullAmount,
            now,
        );
        let share = plan(
            Category::Generic,
            8_000,
            &beneficiary,
            GenericCommissionBase::PlatformShare,
            now,
        );
        assert_eq!(full.affiliate_base, 8_000);
        assert_eq!(share.affiliate_base, 0);
        assert_eq!(full.earnings, share.earnings);
        assert_eq!(full.earnings[0].amount, 8_000);
    }

    #[test]
    fn beneficiaries_follow_purchase_kind() {
        let sellers = vec![Uuid::new_v4(), Uuid::new_v4()];
        assert_eq!(
            beneficiaries(&PurchaseKind::Store {
                seller_ids: sellers.clone()
            }),
            sellers
        );
        assert!(
            beneficiaries(&PurchaseKind::PaymentLink {
                link_ref: "plink_1".into()
            })
            .is_empty()
        );
    }
}
