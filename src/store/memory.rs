use crate::core::persistence::{FundId, FundStore, FundTransaction, StoredFund, pick_current};
use crate::core::record::{DependentRow, FundIdentity};
use crate::core::sheet::FundRoot;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: u64,
    funds: BTreeMap<FundId, StoredFund>,
    dependents: BTreeMap<FundId, Vec<DependentRow>>,
}

/// In-memory fund store. Transactions work on a copy of the state and swap
/// it in on commit.
#[derive(Clone, Default)]
pub struct MemoryFundStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryFundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FundStore for MemoryFundStore {
    async fn begin(&self) -> Result<Box<dyn FundTransaction>> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let staged = guard.clone();
        debug!("Memory transaction started");
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn get(&self, id: FundId) -> Result<Option<StoredFund>> {
        Ok(self.inner.lock().await.funds.get(&id).cloned())
    }

    async fn dependents(&self, id: FundId) -> Result<Vec<DependentRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .dependents
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn funds(&self) -> Result<Vec<StoredFund>> {
        Ok(self.inner.lock().await.funds.values().cloned().collect())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl FundTransaction for MemoryTransaction {
    async fn find_by_identity(&mut self, identity: &FundIdentity) -> Result<Option<StoredFund>> {
        let key = identity.key();
        Ok(pick_current(
            self.staged
                .funds
                .values()
                .filter(|f| f.identity.key() == key)
                .cloned(),
        ))
    }

    async fn cascade_delete_dependents(&mut self, id: FundId) -> Result<usize> {
        let removed = self.staged.dependents.remove(&id).map_or(0, |rows| rows.len());
        debug!("Staged removal of {removed} dependent rows of fund {id}");
        Ok(removed)
    }

    async fn upsert_root(
        &mut self,
        existing: Option<FundId>,
        identity: &FundIdentity,
        root: &FundRoot,
    ) -> Result<FundId> {
        let id = match existing {
            Some(id) if self.staged.funds.contains_key(&id) => id,
            Some(id) => bail!("Fund {id} does not exist"),
            None => {
                self.staged.next_id += 1;
                FundId(self.staged.next_id)
            }
        };
        self.staged.funds.insert(
            id,
            StoredFund {
                id,
                identity: identity.clone(),
                root: root.clone(),
            },
        );
        Ok(id)
    }

    async fn insert_dependents(&mut self, id: FundId, rows: &[DependentRow]) -> Result<usize> {
        if !self.staged.funds.contains_key(&id) {
            bail!("Fund {id} does not exist");
        }
        self.staged
            .dependents
            .entry(id)
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        debug!("Memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Memory transaction rolled back");
        Ok(())
    }
}
