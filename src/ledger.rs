//! Earnings ledger and notification outbox.
//!
//! Rows are inserted once per (category, source, beneficiary) and never
//! updated here; releasing held funds belongs to the reconciliation job.

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::settlement::{EarningDraft, Settlement};
use crate::types::{EarningRecord, EarningsSummary};

async fn insert_earning(
    tx: &mut Transaction<'_, Postgres>,
    settlement: &Settlement,
    source_reference_id: Uuid,
    draft: &EarningDraft,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"INSERT INTO earnings
             (id, beneficiary_user_id, amount, category, source_reference_id, status, release_at, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
           ON CONFLICT (category, source_reference_id, beneficiary_user_id) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(draft.beneficiary_user_id)
    .bind(draft.amount)
    .bind(settlement.category.as_str())
    .bind(source_reference_id)
    .bind(draft.status.as_str())
    .bind(draft.release_at)
    .bind(settlement.created_at)
    .execute(tx.as_mut())
    .await?;

    Ok(res.rows_affected() == 1)
}

/// Writes one earning per beneficiary of `settlement`. Returns how many were new.
pub async fn record_settlement(
    tx: &mut Transaction<'_, Postgres>,
    settlement: &Settlement,
    source_reference_id: Uuid,
) -> Result<usize, sqlx::Error> {
    let mut written = 0;
    for draft in &settlement.earnings {
        if insert_earning(tx, settlement, source_reference_id, draft).await? {
            written += 1;
        } else {
            debug!(
                beneficiary = %draft.beneficiary_user_id,
                %source_reference_id,
                "earning already recorded"
            );
        }
    }
    Ok(written)
}

/// Appends a row for the UI layer to render.
pub async fn notify(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    kind: &str,
    payload: Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO notifications (id, user_id, kind, payload) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(kind)
    .bind(payload)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

pub async fn summary(pool: &PgPool, user_id: Uuid) -> Result<EarningsSummary, sqlx::Error> {
    sqlx::query_as::<_, EarningsSummary>(
        r#"SELECT
             COALESCE(SUM(amount) FILTER (WHERE status = 'held'), 0)::BIGINT AS held,
             COALESCE(SUM(amount) FILTER (WHERE status = 'available'), 0)::BIGINT AS available,
             COUNT(*) AS records
           FROM earnings WHERE beneficiary_user_id = $1"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn earnings_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<EarningRecord>, sqlx::Error> {
    sqlx::query_as::<_, EarningRecord>(
        r#"SELECT id, beneficiary_user_id, amount, category, source_reference_id, status, release_at, created_at
           FROM earnings WHERE beneficiary_user_id = $1 ORDER BY created_at, id"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
