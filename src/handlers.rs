//! Per-category handlers. Each runs inside the delivery's transaction.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::commission::GenericCommissionBase;
use crate::event::{Purchase, PurchaseKind, SubscriptionChange, SubscriptionCheckout, SubscriptionInvoice};
use crate::ledger;
use crate::referral::{self, Commission, Trigger};
use crate::settlement;
use crate::types::Category;

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    /// Already handled under this event id or natural key.
    Duplicate,
    Ignored(String),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Duplicate => "duplicate",
            Outcome::Ignored(_) => "ignored",
        }
    }
}

fn checkout_key(session_id: &str) -> String {
    format!("checkout:{session_id}")
}

fn invoice_key(invoice_id: &str) -> String {
    format!("invoice:{invoice_id}")
}

async fn create_order(
    tx: &mut Transaction<'_, Postgres>,
    purchase: &Purchase,
    category: Category,
) -> Result<Option<Uuid>, sqlx::Error> {
    let status = match category {
        Category::Store => "awaiting_delivery",
        _ => "paid",
    };
    sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO orders (id, checkout_session_id, buyer_id, total_amount, category, status)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT DO NOTHING
           RETURNING id"#,
    )
    .bind(Uuid::new_v4())
    .bind(&purchase.session_id)
    .bind(purchase.buyer_id)
    .bind(purchase.total_amount)
    .bind(category.as_str())
    .bind(status)
    .fetch_optional(tx.as_mut())
    .await
}

async fn create_package_order(
    tx: &mut Transaction<'_, Postgres>,
    purchase: &Purchase,
    package_id: Uuid,
    client_id: Uuid,
    freelancer_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO package_orders (id, checkout_session_id, package_id, client_id, freelancer_id, amount, status)
           VALUES ($1, $2, $3, $4, $5, $6, 'pending')
           ON CONFLICT DO NOTHING
           RETURNING id"#,
    )
    .bind(Uuid::new_v4())
    .bind(&purchase.session_id)
    .bind(package_id)
    .bind(client_id)
    .bind(freelancer_id)
    .bind(purchase.total_amount)
    .fetch_optional(tx.as_mut())
    .await
}

async fn create_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    purchase: &Purchase,
    course_id: Uuid,
    student_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO enrollments (id, checkout_session_id, course_id, user_id, amount_paid)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT DO NOTHING
           RETURNING id"#,
    )
    .bind(Uuid::new_v4())
    .bind(&purchase.session_id)
    .bind(course_id)
    .bind(student_id)
    .bind(purchase.total_amount)
    .fetch_optional(tx.as_mut())
    .await
}

async fn create_stream_access(
    tx: &mut Transaction<'_, Postgres>,
    purchase: &Purchase,
    stream_id: Uuid,
    viewer_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO stream_access (id, checkout_session_id, stream_id, user_id, amount_paid)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT DO NOTHING
           RETURNING id"#,
    )
    .bind(Uuid::new_v4())
    .bind(&purchase.session_id)
    .bind(stream_id)
    .bind(viewer_id)
    .bind(purchase.total_amount)
    .fetch_optional(tx.as_mut())
    .await
}

/// Looks up a payment link by our id or the processor's, returning `(id, owner_id)`.
async fn lock_payment_link(
    tx: &mut Transaction<'_, Postgres>,
    link_ref: &str,
) -> Result<Option<(Uuid, Uuid)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, Uuid)>(
        r#"SELECT id, owner_id FROM payment_links
           WHERE id::text = $1 OR processor_link_id = $1
           LIMIT 1
           FOR UPDATE"#,
    )
    .bind(link_ref)
    .fetch_optional(tx.as_mut())
    .await
}

async fn mark_link_paid(
    tx: &mut Transaction<'_, Postgres>,
    link_id: Uuid,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE payment_links
           SET status = 'paid', paid_at = $2, checkout_session_id = $3
           WHERE id = $1 AND status <> 'paid'"#,
    )
    .bind(link_id)
    .bind(now)
    .bind(session_id)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

/// Handles a one-off payment: domain record, ledger entries, notifications and
/// the buyer's affiliate commission.
pub async fn handle_purchase(
    tx: &mut Transaction<'_, Postgres>,
    purchase: &Purchase,
    generic_base: GenericCommissionBase,
    now: DateTime<Utc>,
) -> Result<Outcome, sqlx::Error> {
    let category = purchase.kind.category();

    let (source_reference_id, beneficiaries) = match &purchase.kind {
        PurchaseKind::PaymentLink { link_ref } => {
            let Some((link_id, owner_id)) = lock_payment_link(tx, link_ref).await? else {
                return Ok(Outcome::Ignored(format!("unknown payment link {link_ref}")));
            };
            let created = create_order(tx, purchase, category).await?;
            if created.is_some() {
                mark_link_paid(tx, link_id, &purchase.session_id, now).await?;
            }
            (created, vec![owner_id])
        }
        PurchaseKind::Service {
            package_id,
            client_id,
            freelancer_id,
        } => (
            create_package_order(tx, purchase, *package_id, *client_id, *freelancer_id).await?,
            settlement::beneficiaries(&purchase.kind),
        ),
        PurchaseKind::Course {
            course_id,
            student_id,
            ..
        } => (
            create_enrollment(tx, purchase, *course_id, *student_id).await?,
            settlement::beneficiaries(&purchase.kind),
        ),
        PurchaseKind::LiveSession {
            stream_id,
            viewer_id,
            ..
        } => (
            create_stream_access(tx, purchase, *stream_id, *viewer_id).await?,
            settlement::beneficiaries(&purchase.kind),
        ),
        PurchaseKind::Store { .. } | PurchaseKind::Generic { .. } => (
            create_order(tx, purchase, category).await?,
            settlement::beneficiaries(&purchase.kind),
        ),
    };

    let Some(source_reference_id) = source_reference_id else {
        info!(
            category = category.as_str(),
            session_id = %purchase.session_id,
            "purchase already recorded"
        );
        return Ok(Outcome::Duplicate);
    };

    let plan = settlement::plan(
        category,
        purchase.total_amount,
        &beneficiaries,
        generic_base,
        now,
    );
    let written = ledger::record_settlement(tx, &plan, source_reference_id).await?;

    if let Some(kind) = notification_kind(&purchase.kind) {
        for earning in &plan.earnings {
            ledger::notify(
                tx,
                earning.beneficiary_user_id,
                kind,
                json!({
                    "source_reference_id": source_reference_id,
                    "amount": earning.amount,
                    "category": category.as_str(),
                }),
            )
            .await?;
        }
    }

    info!(
        category = category.as_str(),
        %source_reference_id,
        platform_earnings = plan.platform_earnings,
        earnings_written = written,
        "purchase settled"
    );

    if let Some(buyer_id) = purchase.buyer_id {
        referral::apply_commission(
            tx,
            buyer_id,
            plan.affiliate_base,
            &checkout_key(&purchase.session_id),
            Trigger::OneOff,
            now,
        )
        .await?;
    }

    Ok(Outcome::Processed)
}

fn notification_kind(kind: &PurchaseKind) -> Option<&'static str> {
    match kind {
        PurchaseKind::PaymentLink { .. } => Some("payment_link_paid"),
        PurchaseKind::Service { .. } => Some("service_order_placed"),
        PurchaseKind::Course { .. } => Some("course_enrollment"),
        PurchaseKind::Store { .. } => Some("store_order_placed"),
        PurchaseKind::LiveSession { .. } | PurchaseKind::Generic { .. } => None,
    }
}

/// First payment of a subscription. Nothing is split; the whole amount is the
/// affiliate base and this is the referral's conversion event.
pub async fn handle_subscription_checkout(
    tx: &mut Transaction<'_, Postgres>,
    checkout: &SubscriptionCheckout,
    now: DateTime<Utc>,
) -> Result<Outcome, sqlx::Error> {
    let created = sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO subscriptions (id, processor_subscription_id, user_id, plan, status)
           VALUES ($1, $2, $3, $4, 'active')
           ON CONFLICT (processor_subscription_id) DO NOTHING
           RETURNING id"#,
    )
    .bind(Uuid::new_v4())
    .bind(&checkout.processor_subscription_id)
    .bind(checkout.user_id)
    .bind(&checkout.plan)
    .fetch_optional(tx.as_mut())
    .await?;

    let commission = referral::apply_commission(
        tx,
        checkout.user_id,
        checkout.amount,
        &checkout_key(&checkout.session_id),
        Trigger::OneOff,
        now,
    )
    .await?;

    if created.is_none() && !matches!(commission, Commission::Recorded(_)) {
        return Ok(Outcome::Duplicate);
    }
    Ok(Outcome::Processed)
}

/// A renewal invoice: advances the subscriber's referral by one month.
pub async fn handle_subscription_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &SubscriptionInvoice,
    now: DateTime<Utc>,
) -> Result<Outcome, sqlx::Error> {
    let stored = sqlx::query_scalar::<_, Uuid>(
        r#"SELECT user_id FROM subscriptions WHERE processor_subscription_id = $1"#,
    )
    .bind(&invoice.processor_subscription_id)
    .fetch_optional(tx.as_mut())
    .await?;

    let Some(user_id) = stored.or(invoice.user_id) else {
        return Ok(Outcome::Ignored(format!(
            "no subscriber for {}",
            invoice.processor_subscription_id
        )));
    };

    let commission = referral::apply_commission(
        tx,
        user_id,
        invoice.amount,
        &invoice_key(&invoice.invoice_id),
        Trigger::Recurring,
        now,
    )
    .await?;

    match commission {
        Commission::AlreadyRecorded => Ok(Outcome::Duplicate),
        Commission::NoReferral | Commission::Recorded(_) => Ok(Outcome::Processed),
    }
}

pub async fn handle_subscription_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &SubscriptionChange,
    now: DateTime<Utc>,
) -> Result<Outcome, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE subscriptions
           SET status = $2,
               current_period_end = COALESCE($3, current_period_end),
               updated_at = $4
           WHERE processor_subscription_id = $1"#,
    )
    .bind(&change.processor_subscription_id)
    .bind(&change.status)
    .bind(change.current_period_end)
    .bind(now)
    .execute(tx.as_mut())
    .await?;

    if res.rows_affected() == 0 {
        return Ok(Outcome::Ignored(format!(
            "unknown subscription {}",
            change.processor_subscription_id
        )));
    }
    Ok(Outcome::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commission_keys_separate_checkouts_from_invoices() {
        assert_eq!(checkout_key("cs_1"), "checkout:cs_1");
        assert_eq!(invoice_key("in_1"), "invoice:in_1");
    }

    #[test]
    fn live_sessions_do_not_notify() {
        let kind = PurchaseKind::LiveSession {
            stream_id: Uuid::new_v4(),
            viewer_id: Uuid::new_v4(),
            streamer_id: Uuid::new_v4(),
        };
        assert_eq!(notification_kind(&kind), None);
    }

    #[test]
    fn outcome_names() {
        assert_eq!(Outcome::Processed.as_str(), "processed");
        assert_eq!(Outcome::Duplicate.as_str(), "duplicate");
        assert_eq!(Outcome::Ignored("x".into()).as_str(), "ignored");
    }
}
