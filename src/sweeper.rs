use anyhow::{Context, Result};
use sqlx::Row;
use tracing::{error, info};
use uuid::Uuid;

use crate::{tickets, AppState};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tickets_released: u64,
    pub transactions_expired: u64,
}

pub fn spawn_reconciliation_sweeper(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(state.sweep_interval).await;
            let start = std::time::Instant::now();
            match run_sweep(&state).await {
                Ok(report) => {
                    if report.tickets_released > 0 || report.transactions_expired > 0 {
                        info!(
                            tickets_released = report.tickets_released,
                            transactions_expired = report.transactions_expired,
                            "reconciliation sweep reclaimed stale state"
                        );
                    }
                }
                Err(err) => error!(error = %err, "reconciliation sweep error"),
            }
            crate::app::SWEEP_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
        }
    });
}

/// One reconciliation pass. Two independent, batch-bounded cleanups; every
/// update is guarded on expected prior status so state the orchestrator moved
/// concurrently is never reverted.
pub async fn run_sweep(state: &AppState) -> Result<SweepReport> {
    let grace_secs = state.reservation_grace.as_secs() as i64;

    let tickets_released = tickets::release_stale(&state.db, grace_secs, state.sweep_batch).await?;

    let transactions_expired = expire_stale_transactions(state, grace_secs).await?;

    crate::app::SWEEP_TICKETS_RELEASED_TOTAL.inc_by(tickets_released);
    crate::app::SWEEP_TRANSACTIONS_EXPIRED_TOTAL.inc_by(transactions_expired);
    Ok(SweepReport { tickets_released, transactions_expired })
}

/// Expires created/pending transactions past the grace window. The ticket
/// link and any credential fields are cleared in the same mutation, so a
/// late, spoofed, or duplicated webhook after expiry can never surface
/// credentials; the linked ticket is released under its own status and owner
/// guards.
async fn expire_stale_transactions(state: &AppState, grace_secs: i64) -> Result<u64> {
    let mut tx = state.db.begin().await.context("begin sweep transaction")?;

    let rows = sqlx::query(
        r#"WITH stale AS (
               SELECT id, ticket_id FROM transactions
               WHERE status IN ('created', 'pending')
                 AND created_at < NOW() - ($1 * INTERVAL '1 second')
               LIMIT $2
               FOR UPDATE SKIP LOCKED
           )
           UPDATE transactions t
           SET status = 'expired', ticket_id = NULL, username = NULL, password = NULL,
               updated_at = NOW()
           FROM stale
           WHERE t.id = stale.id AND t.status IN ('created', 'pending')
           RETURNING t.id, stale.ticket_id"#,
    )
    .bind(grace_secs)
    .bind(state.sweep_batch)
    .fetch_all(&mut *tx)
    .await?;

    for row in rows.iter() {
        let txn_id: Uuid = row.get("id");
        let ticket_id: Option<Uuid> = row.get("ticket_id");
        if let Some(ticket_id) = ticket_id {
            // Owner-guarded: if pass 1 already freed the ticket and another
            // transaction re-reserved it, the new holder keeps it.
            tickets::release(&mut *tx, ticket_id, txn_id).await?;
        }
        info!(txn_id = %txn_id, "transaction expired by sweeper");
    }

    tx.commit().await.context("commit sweep transaction")?;
    Ok(rows.len() as u64)
}
