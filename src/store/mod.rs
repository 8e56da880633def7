pub mod disk;
pub mod memory;

use crate::core::config::{AppConfig, StoreKind};
use crate::core::persistence::FundStore;
use anyhow::Result;
use disk::DiskFundStore;
use memory::MemoryFundStore;
use std::sync::Arc;
use tracing::debug;

/// Opens the fund store selected in the config. The disk store lives in
/// `<data_path>/funds`.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn FundStore>> {
    match config.store {
        StoreKind::Memory => {
            debug!("Using in-memory fund store");
            Ok(Arc::new(MemoryFundStore::new()))
        }
        StoreKind::Disk => {
            let path = config.default_data_path()?.join("funds");
            Ok(Arc::new(DiskFundStore::open(&path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_store_from_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = AppConfig {
            data_path: Some(temp_dir.path().to_string_lossy().into_owned()),
            ..AppConfig::default()
        };
        let store = open_store(&config)?;
        assert!(store.funds().await?.is_empty());
        assert!(temp_dir.path().join("funds").exists());

        let memory = open_store(&AppConfig {
            store: StoreKind::Memory,
            ..AppConfig::default()
        })?;
        assert!(memory.funds().await?.is_empty());
        Ok(())
    }
}
