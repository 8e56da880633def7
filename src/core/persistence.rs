//! Contract between reconciliation and whatever keeps fund records.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::core::record::{DependentRow, FundIdentity};
use crate::core::sheet::FundRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FundId(pub u64);

impl Display for FundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A persisted fund root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFund {
    pub id: FundId,
    pub identity: FundIdentity,
    pub root: FundRoot,
}

impl StoredFund {
    pub fn cutoff(&self) -> Option<NaiveDate> {
        self.root.fecha_corte.as_ref().and_then(|d| d.iso)
    }
}

/// Picks the current record among those sharing an identity: the latest
/// parseable cutoff, otherwise the most recently inserted.
pub fn pick_current<I>(candidates: I) -> Option<StoredFund>
where
    I: IntoIterator<Item = StoredFund>,
{
    candidates.into_iter().max_by_key(|f| (f.cutoff(), f.id))
}

#[async_trait]
pub trait FundStore: Send + Sync {
    /// Opens a unit of work. Holds the store's writer lock until the
    /// transaction is committed, rolled back or dropped.
    async fn begin(&self) -> Result<Box<dyn FundTransaction>>;

    async fn get(&self, id: FundId) -> Result<Option<StoredFund>>;

    async fn dependents(&self, id: FundId) -> Result<Vec<DependentRow>>;

    async fn funds(&self) -> Result<Vec<StoredFund>>;
}

/// Reads see the transaction's own staged writes. Nothing is visible to
/// other readers before `commit`; dropping without commit discards all.
#[async_trait]
pub trait FundTransaction: Send {
    async fn find_by_identity(&mut self, identity: &FundIdentity) -> Result<Option<StoredFund>>;

    /// Removes every dependent row of `id`, returning how many went away.
    async fn cascade_delete_dependents(&mut self, id: FundId) -> Result<usize>;

    /// Updates the root of `existing` in place, or inserts a new fund.
    async fn upsert_root(
        &mut self,
        existing: Option<FundId>,
        identity: &FundIdentity,
        root: &FundRoot,
    ) -> Result<FundId>;

    async fn insert_dependents(&mut self, id: FundId, rows: &[DependentRow]) -> Result<usize>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dates::DateField;

    fn fund(id: u64, cutoff: Option<&str>) -> StoredFund {
        StoredFund {
            id: FundId(id),
            identity: FundIdentity::new("u1", "Fondo A"),
            root: FundRoot {
                nombre_fic: "Fondo A".to_string(),
                gestor: None,
                custodio: None,
                fecha_corte: cutoff.map(DateField::parse),
                politica_de_inversion: None,
                url: Some("u1".to_string()),
                tipo: "Otro".to_string(),
            },
        }
    }

    #[test]
    fn test_pick_current_prefers_latest_cutoff() {
        let picked = pick_current(vec![
            fund(1, Some("2025-07-31")),
            fund(2, Some("2025-06-30")),
            fund(3, None),
        ]);
        assert_eq!(picked.map(|f| f.id), Some(FundId(1)));
    }

    #[test]
    fn test_pick_current_falls_back_to_latest_insert() {
        let picked = pick_current(vec![fund(1, None), fund(4, Some("cierre")), fund(2, None)]);
        assert_eq!(picked.map(|f| f.id), Some(FundId(4)));
        assert_eq!(pick_current(Vec::new()), None);
    }
}
