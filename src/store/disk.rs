use crate::core::persistence::{FundId, FundStore, FundTransaction, StoredFund, pick_current};
use crate::core::record::{DependentRow, FundIdentity};
use crate::core::sheet::FundRoot;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

const NEXT_ID_KEY: &[u8] = b"next_id";

fn id_key(id: FundId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn identity_prefix(identity: &FundIdentity) -> Vec<u8> {
    let mut prefix = identity.key().into_bytes();
    prefix.push(0);
    prefix
}

fn identity_entry(identity: &FundIdentity, id: FundId) -> Vec<u8> {
    let mut key = identity_prefix(identity);
    key.extend_from_slice(&id_key(id));
    key
}

fn dependent_key(id: FundId, seq: u64) -> Vec<u8> {
    let mut key = id_key(id).to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn trailing_u64(bytes: &[u8]) -> Result<u64> {
    let tail = bytes
        .len()
        .checked_sub(8)
        .map(|start| &bytes[start..])
        .context("Key too short")?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(tail);
    Ok(u64::from_be_bytes(buf))
}

/// Fund store backed by a fjall keyspace.
///
/// Partitions: `funds` (id -> root), `identities` (identity key, 0, id -> ()),
/// `dependents` (id, seq -> row) and `meta`.
#[derive(Clone)]
pub struct DiskFundStore {
    keyspace: Keyspace,
    funds: PartitionHandle,
    identities: PartitionHandle,
    dependents: PartitionHandle,
    meta: PartitionHandle,
    writer: Arc<Mutex<()>>,
}

impl DiskFundStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create store directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let open = |name: &str| {
            keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .with_context(|| format!("Failed to open partition {name}"))
        };
        let store = Self {
            funds: open("funds")?,
            identities: open("identities")?,
            dependents: open("dependents")?,
            meta: open("meta")?,
            keyspace,
            writer: Arc::new(Mutex::new(())),
        };
        debug!("Opened fund store at {}", path.display());
        Ok(store)
    }

    fn read_fund(&self, id: FundId) -> Result<Option<StoredFund>> {
        match self.funds.get(id_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_next_id(&self) -> Result<u64> {
        match self.meta.get(NEXT_ID_KEY)? {
            Some(bytes) => trailing_u64(&bytes),
            None => Ok(0),
        }
    }

    fn identity_ids(&self, identity: &FundIdentity) -> Result<Vec<FundId>> {
        self.identities
            .prefix(identity_prefix(identity))
            .map(|kv| -> Result<FundId> {
                let (key, _) = kv?;
                Ok(FundId(trailing_u64(&key)?))
            })
            .collect()
    }

    fn dependent_keys(&self, id: FundId) -> Result<Vec<Vec<u8>>> {
        self.dependents
            .prefix(id_key(id))
            .map(|kv| -> Result<Vec<u8>> {
                let (key, _) = kv?;
                Ok(key.to_vec())
            })
            .collect()
    }

    fn next_dependent_seq(&self, id: FundId) -> Result<u64> {
        match self.dependents.prefix(id_key(id)).next_back() {
            Some(kv) => {
                let (key, _) = kv?;
                Ok(trailing_u64(&key)? + 1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl FundStore for DiskFundStore {
    async fn begin(&self) -> Result<Box<dyn FundTransaction>> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let next_id = self.read_next_id()?;
        debug!("Disk transaction started");
        Ok(Box::new(DiskTransaction {
            _guard: guard,
            store: self.clone(),
            next_id,
            funds: BTreeMap::new(),
            new_identities: Vec::new(),
            cleared: HashSet::new(),
            new_rows: BTreeMap::new(),
        }))
    }

    async fn get(&self, id: FundId) -> Result<Option<StoredFund>> {
        self.read_fund(id)
    }

    async fn dependents(&self, id: FundId) -> Result<Vec<DependentRow>> {
        self.dependents
            .prefix(id_key(id))
            .map(|kv| -> Result<DependentRow> {
                let (_, value) = kv?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    async fn funds(&self) -> Result<Vec<StoredFund>> {
        self.funds
            .iter()
            .map(|kv| -> Result<StoredFund> {
                let (_, value) = kv?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }
}

/// Stages writes in memory and applies them as one batch on commit.
struct DiskTransaction {
    _guard: OwnedMutexGuard<()>,
    store: DiskFundStore,
    next_id: u64,
    funds: BTreeMap<FundId, StoredFund>,
    new_identities: Vec<(FundIdentity, FundId)>,
    cleared: HashSet<FundId>,
    new_rows: BTreeMap<FundId, Vec<DependentRow>>,
}

impl DiskTransaction {
    fn fund(&self, id: FundId) -> Result<Option<StoredFund>> {
        match self.funds.get(&id) {
            Some(fund) => Ok(Some(fund.clone())),
            None => self.store.read_fund(id),
        }
    }
}

#[async_trait]
impl FundTransaction for DiskTransaction {
    async fn find_by_identity(&mut self, identity: &FundIdentity) -> Result<Option<StoredFund>> {
        let mut ids = self.store.identity_ids(identity)?;
        ids.extend(
            self.new_identities
                .iter()
                .filter(|(staged, _)| staged.key() == identity.key())
                .map(|(_, id)| *id),
        );
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(fund) = self.fund(id)? {
                candidates.push(fund);
            }
        }
        Ok(pick_current(candidates))
    }

    async fn cascade_delete_dependents(&mut self, id: FundId) -> Result<usize> {
        let persisted = if self.cleared.insert(id) {
            self.store.dependent_keys(id)?.len()
        } else {
            0
        };
        let staged = self.new_rows.remove(&id).map_or(0, |rows| rows.len());
        debug!("Staged removal of {} dependent rows of fund {id}", persisted + staged);
        Ok(persisted + staged)
    }

    async fn upsert_root(
        &mut self,
        existing: Option<FundId>,
        identity: &FundIdentity,
        root: &FundRoot,
    ) -> Result<FundId> {
        let id = match existing {
            Some(id) => {
                if self.fund(id)?.is_none() {
                    bail!("Fund {id} does not exist");
                }
                id
            }
            None => {
                self.next_id += 1;
                let id = FundId(self.next_id);
                self.new_identities.push((identity.clone(), id));
                id
            }
        };
        self.funds.insert(
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
        if self.fund(id)?.is_none() {
            bail!("Fund {id} does not exist");
        }
        self.new_rows
            .entry(id)
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let store = &self.store;
        let mut batch = store.keyspace.batch();

        batch.insert(&store.meta, NEXT_ID_KEY, self.next_id.to_be_bytes().to_vec());
        for (id, fund) in &self.funds {
            batch.insert(&store.funds, id_key(*id).to_vec(), serde_json::to_vec(fund)?);
        }
        for (identity, id) in &self.new_identities {
            batch.insert(&store.identities, identity_entry(identity, *id), Vec::new());
        }
        for id in &self.cleared {
            for key in store.dependent_keys(*id)? {
                batch.remove(&store.dependents, key);
            }
        }
        for (id, rows) in &self.new_rows {
            // New keys always sort after every persisted one, so they never
            // collide with the removals above.
            let start = store.next_dependent_seq(*id)?;
            for (offset, row) in rows.iter().enumerate() {
                batch.insert(
                    &store.dependents,
                    dependent_key(*id, start + offset as u64),
                    serde_json::to_vec(row)?,
                );
            }
        }

        batch.commit().context("Failed to commit store batch")?;
        store
            .keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to sync store journal")?;
        debug!("Disk transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Disk transaction rolled back");
        Ok(())
    }
}
