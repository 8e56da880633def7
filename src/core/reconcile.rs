//! Decides how an incoming record relates to what is already stored for the
//! same fund, and applies that decision inside one transaction.

use anyhow::Result;
use chrono::NaiveDate;
use std::fmt::Display;
use tracing::{debug, info, warn};

use crate::core::persistence::{FundId, FundStore, FundTransaction, StoredFund};
use crate::core::record::FundRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Nothing stored for the identity yet.
    Insert,
    /// The stored record is older: replace its dependents, keep its id.
    ReplaceCascade { id: FundId },
    /// The stored record is as new or newer: drop the incoming one.
    Skip { id: FundId },
    /// A cutoff is missing on either side, so the two cannot be ordered.
    /// Stored as a separate record, never overwriting.
    InsertAsNewVariant { existing: FundId },
}

impl ReconcileDecision {
    pub fn writes(&self) -> bool {
        !matches!(self, ReconcileDecision::Skip { .. })
    }
}

impl Display for ReconcileDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileDecision::Insert => write!(f, "Insert"),
            ReconcileDecision::ReplaceCascade { .. } => write!(f, "Replace"),
            ReconcileDecision::Skip { .. } => write!(f, "Skip"),
            ReconcileDecision::InsertAsNewVariant { .. } => write!(f, "New variant"),
        }
    }
}

pub fn decide(existing: Option<&StoredFund>, incoming_cutoff: Option<NaiveDate>) -> ReconcileDecision {
    let Some(existing) = existing else {
        return ReconcileDecision::Insert;
    };
    match (existing.cutoff(), incoming_cutoff) {
        (Some(stored), Some(incoming)) if stored < incoming => {
            ReconcileDecision::ReplaceCascade { id: existing.id }
        }
        (Some(_), Some(_)) => ReconcileDecision::Skip { id: existing.id },
        _ => ReconcileDecision::InsertAsNewVariant {
            existing: existing.id,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub decision: ReconcileDecision,
    /// Id holding the incoming data, `None` when skipped.
    pub id: Option<FundId>,
    pub rows_deleted: usize,
    pub rows_inserted: usize,
}

async fn apply(tx: &mut dyn FundTransaction, record: &FundRecord) -> Result<ReconcileOutcome> {
    let existing = tx.find_by_identity(&record.identity).await?;
    let decision = decide(existing.as_ref(), record.cutoff());
    debug!(identity = %record.identity, %decision, "Reconciliation decision");

    let mut outcome = ReconcileOutcome {
        decision,
        id: None,
        rows_deleted: 0,
        rows_inserted: 0,
    };
    match decision {
        ReconcileDecision::Insert | ReconcileDecision::InsertAsNewVariant { .. } => {
            let id = tx.upsert_root(None, &record.identity, &record.root).await?;
            outcome.rows_inserted = tx.insert_dependents(id, &record.rows).await?;
            outcome.id = Some(id);
        }
        ReconcileDecision::ReplaceCascade { id } => {
            outcome.rows_deleted = tx.cascade_delete_dependents(id).await?;
            let id = tx
                .upsert_root(Some(id), &record.identity, &record.root)
                .await?;
            outcome.rows_inserted = tx.insert_dependents(id, &record.rows).await?;
            outcome.id = Some(id);
        }
        ReconcileDecision::Skip { .. } => {}
    }
    Ok(outcome)
}

/// Runs find, decide and write for one record as a single unit of work.
/// Any failure rolls the whole unit back.
pub async fn reconcile(store: &dyn FundStore, record: &FundRecord) -> Result<ReconcileOutcome> {
    let mut tx = store.begin().await?;
    let outcome = match apply(tx.as_mut(), record).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(source = %record.source_file, error = %rollback_err, "Rollback failed");
            }
            return Err(e);
        }
    };

    if outcome.decision.writes() {
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    match outcome.decision {
        ReconcileDecision::InsertAsNewVariant { existing } => warn!(
            source = %record.source_file,
            identity = %record.identity,
            %existing,
            "Cutoff date missing, stored as a separate record"
        ),
        decision => info!(
            source = %record.source_file,
            identity = %record.identity,
            %decision,
            id = ?outcome.id,
            deleted = outcome.rows_deleted,
            inserted = outcome.rows_inserted,
            "Reconciled fund"
        ),
    }
    Ok(outcome)
}
