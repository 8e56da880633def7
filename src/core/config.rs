use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::core::entity::DEFAULT_SIMILARITY_CUTOFF;

/// One bank of the directory used to resolve fund URLs from file names.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BankEntry {
    pub bank: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Disk,
    Memory,
}

fn default_workers() -> usize {
    3
}

fn default_similarity_cutoff() -> f64 {
    DEFAULT_SIMILARITY_CUTOFF
}

fn default_rating_agencies() -> Vec<String> {
    [
        "BRC Ratings - S&P Global S.A.",
        "Fitch Ratings Colombia S.A.",
        "Value and Risk Rating S.A.",
        "Moody's Investors Service",
        "Standard & Poor's",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_similarity_cutoff")]
    pub similarity_cutoff: f64,
    #[serde(default = "default_rating_agencies")]
    pub rating_agencies: Vec<String>,
    #[serde(default)]
    pub directory: Vec<BankEntry>,
    #[serde(default)]
    pub store: StoreKind,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            workers: default_workers(),
            similarity_cutoff: default_similarity_cutoff(),
            rating_agencies: default_rating_agencies(),
            directory: Vec::new(),
            store: StoreKind::default(),
            data_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Loads `path` when given, otherwise the default config file if it
    /// exists, otherwise built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::load_from_path(&default_path)
                } else {
                    debug!("No config at {}, using defaults", default_path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("co", "fundsheet", "fundsheet")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("co", "fundsheet", "fundsheet")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
workers: 5
similarity_cutoff: 0.85
rating_agencies:
  - "Fitch Ratings Colombia S.A."
directory:
  - bank: "Bancolombia"
    url: "https://www.bancolombia.com/fondos"
  - bank: "Davivienda"
    url: "https://www.davivienda.com/fondos"
store: memory
data_path: "/tmp/fundsheet"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.workers, 5);
        assert_eq!(config.similarity_cutoff, 0.85);
        assert_eq!(config.rating_agencies, vec!["Fitch Ratings Colombia S.A."]);
        assert_eq!(config.directory.len(), 2);
        assert_eq!(config.directory[1].bank, "Davivienda");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/fundsheet")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = serde_yaml::from_str("data_path: null").unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.similarity_cutoff, 0.8);
        assert!(!config.rating_agencies.is_empty());
        assert!(config.directory.is_empty());
        assert_eq!(config.store, StoreKind::Disk);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let err = AppConfig::load_from_path("/nonexistent/fundsheet/config.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
