//! Webhook ingestion: authenticate, deduplicate, dispatch.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::WebhookError;
use crate::event::{self, PaymentEvent, ProcessorEvent};
use crate::handlers::{self, Outcome};
use crate::signature::{self, Trust};

/// Verifies, parses and processes one raw delivery.
pub async fn ingest(
    pool: &PgPool,
    config: &Config,
    signature_header: Option<&str>,
    payload: &[u8],
) -> Result<Outcome, WebhookError> {
    let trust = signature::verify(
        config.webhook_secret(),
        signature_header,
        payload,
        Utc::now().timestamp(),
        config.webhook_tolerance_secs,
    )?;
    if trust == Trust::Degraded {
        warn!(
            degraded_trust = true,
            "accepting unsigned webhook delivery, no signing secret configured"
        );
    }

    let event = event::parse_event(payload)?;
    let classified = event::classify(&event)?;
    process_event(pool, config, &event, classified).await
}

async fn mark_processed(
    tx: &mut Transaction<'_, Postgres>,
    event: &ProcessorEvent,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"INSERT INTO processed_events (event_id, event_type) VALUES ($1, $2)
           ON CONFLICT (event_id) DO NOTHING"#,
    )
    .bind(&event.id)
    .bind(&event.event_type)
    .execute(tx.as_mut())
    .await?;

    Ok(res.rows_affected() == 1)
}

/// Applies a classified event in a single transaction. Any storage error rolls
/// back every write made for the delivery.
#[tracing::instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
pub async fn process_event(
    pool: &PgPool,
    config: &Config,
    event: &ProcessorEvent,
    classified: PaymentEvent,
) -> Result<Outcome, WebhookError> {
    if let PaymentEvent::Ignored(reason) = classified {
        info!(%reason, outcome = "ignored", "webhook acknowledged without processing");
        return Ok(Outcome::Ignored(reason));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    if !mark_processed(&mut tx, event).await? {
        tx.rollback().await?;
        info!(outcome = "duplicate", "webhook event already processed");
        return Ok(Outcome::Duplicate);
    }

    let outcome = match &classified {
        PaymentEvent::Purchase(purchase) => {
            handlers::handle_purchase(&mut tx, purchase, config.generic_commission_base, now)
                .await?
        }
        PaymentEvent::SubscriptionCheckout(checkout) => {
            handlers::handle_subscription_checkout(&mut tx, checkout, now).await?
        }
        PaymentEvent::SubscriptionInvoice(invoice) => {
            handlers::handle_subscription_invoice(&mut tx, invoice, now).await?
        }
        PaymentEvent::SubscriptionChanged(change) => {
            handlers::handle_subscription_change(&mut tx, change, now).await?
        }
        PaymentEvent::Ignored(reason) => Outcome::Ignored(reason.clone()),
    };

    tx.commit().await?;

    match &outcome {
        Outcome::Ignored(reason) => info!(%reason, outcome = outcome.as_str(), "webhook acknowledged"),
        _ => info!(outcome = outcome.as_str(), "webhook processed"),
    }
    Ok(outcome)
}
