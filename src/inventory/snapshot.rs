//! Inventory snapshot loading
//!
//! Startup order: local snapshot first, remote registry only when the
//! snapshot is missing or unreadable.

use std::path::Path;

use uuid::Uuid;

use super::{Inventory, InventoryError};
use crate::config::InventoryConfig;
use crate::models::ModelRegistry;

/// Build the process inventory.
///
/// A missing or corrupt snapshot falls through to a single registry fetch.
/// A failed fetch is returned to the caller; nothing else can serve listings.
pub async fn load_inventory(
    config: &InventoryConfig,
    registry: &dyn ModelRegistry,
) -> Result<Inventory, InventoryError> {
    match read_snapshot(&config.snapshot_path).await {
        Some(inventory) => {
            tracing::info!(
                path = %config.snapshot_path.display(),
                models = inventory.len(),
                "Loaded model inventory from snapshot"
            );
            return Ok(inventory);
        }
        None => tracing::info!("Fetching list of available models"),
    }

    let inventory = registry.fetch_listing().await?;
    tracing::info!(models = inventory.len(), "Fetched model inventory from registry");

    if config.persist_snapshot {
        if let Err(e) = write_snapshot(&config.snapshot_path, &inventory).await {
            tracing::warn!(
                path = %config.snapshot_path.display(),
                "Failed to persist inventory snapshot: {}",
                e
            );
        }
    }

    Ok(inventory)
}

async fn read_snapshot(path: &Path) -> Option<Inventory> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No inventory snapshot");
            return None;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Unreadable inventory snapshot: {}", e);
            return None;
        }
    };

    match Inventory::from_slice(&data) {
        Ok(inventory) => Some(inventory),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring corrupt inventory snapshot: {}", e);
            None
        }
    }
}

/// Atomically replace the snapshot file with the given inventory
pub async fn write_snapshot(path: &Path, inventory: &Inventory) -> Result<(), InventoryError> {
    let data = inventory.to_snapshot_json()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "inventory".to_string());
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    tokio::fs::write(&temp_path, &data).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), "Wrote inventory snapshot");
    Ok(())
}
