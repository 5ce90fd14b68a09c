//! CLI command implementations for Quarry.

pub mod generate;
pub mod serve;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use quarry_core::{MemoryStore, QuarryConfig};

/// Load `quarry.yaml` (or defaults) and apply the `--store` override.
pub fn load_config(path: &Path, store: Option<&Path>) -> Result<QuarryConfig> {
    if !path.exists() {
        tracing::debug!(config = %path.display(), "Config file not found, using defaults");
    }
    let mut config = QuarryConfig::load(Some(path))
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(store) = store {
        config.store.path = store.to_path_buf();
    }
    Ok(config)
}

pub fn open_store(config: &QuarryConfig) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::open(&config.store.path)
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}
