//! Model Inventory
//!
//! The set of recognition models the service knows about. Built once at
//! startup (from the local snapshot or the remote registry) and shared
//! read-only for the lifetime of the process.
//!
//! Snapshot format (insertion order is preserved):
//!
//! ```json
//! {"modelA": {"summary": "desc", "script": ["latin"], "graphemes": ["a", "b"]}}
//! ```

mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::RegistryError;

pub use snapshot::{load_inventory, write_snapshot};

/// Metadata for one recognition model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(rename = "description")]
    pub summary: String,
    pub scripts: Vec<String>,
    pub graphemes: Vec<String>,
}

/// Per-model entry as stored in the snapshot and served by the registry
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotEntry {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    script: Vec<String>,
    #[serde(default)]
    graphemes: Vec<String>,
}

/// Inventory errors
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Malformed inventory document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Malformed inventory entry '{name}': {source}")]
    InvalidEntry {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to fetch model listing: {0}")]
    Fetch(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Name-keyed, insertion-ordered set of model descriptors
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl Inventory {
    /// Build from descriptors; a repeated name replaces the earlier entry in place
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut inventory = Self::default();
        for descriptor in descriptors {
            match inventory.index.get(&descriptor.name) {
                Some(&slot) => inventory.models[slot] = descriptor,
                None => {
                    inventory
                        .index
                        .insert(descriptor.name.clone(), inventory.models.len());
                    inventory.models.push(descriptor);
                }
            }
        }
        inventory
    }

    /// Parse a snapshot / listing document
    pub fn from_slice(data: &[u8]) -> Result<Self, InventoryError> {
        let document: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)?;

        let mut descriptors = Vec::with_capacity(document.len());
        for (name, value) in document {
            let entry: SnapshotEntry = serde_json::from_value(value).map_err(|source| {
                InventoryError::InvalidEntry {
                    name: name.clone(),
                    source,
                }
            })?;
            descriptors.push(ModelDescriptor {
                name,
                summary: entry.summary.unwrap_or_default(),
                scripts: entry.script,
                graphemes: entry.graphemes,
            });
        }

        Ok(Self::from_descriptors(descriptors))
    }

    /// Serialize back into the snapshot format
    pub fn to_snapshot_json(&self) -> Result<Vec<u8>, InventoryError> {
        let mut document = serde_json::Map::with_capacity(self.models.len());
        for model in &self.models {
            let entry = SnapshotEntry {
                summary: Some(model.summary.clone()),
                script: model.scripts.clone(),
                graphemes: model.graphemes.clone(),
            };
            document.insert(model.name.clone(), serde_json::to_value(entry)?);
        }
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.index.get(name).map(|&slot| &self.models[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelDescriptor> {
        self.models.iter()
    }

    /// Owned, lazy enumeration of the inventory in load order.
    ///
    /// Each call starts a fresh pass, so listings are restartable per request.
    pub fn descriptors(self: &Arc<Self>) -> Descriptors {
        Descriptors {
            inventory: Arc::clone(self),
            next: 0,
        }
    }
}

/// Iterator returned by [`Inventory::descriptors`]
pub struct Descriptors {
    inventory: Arc<Inventory>,
    next: usize,
}

impl Iterator for Descriptors {
    type Item = ModelDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let descriptor = self.inventory.models.get(self.next)?.clone();
        self.next += 1;
        Some(descriptor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.inventory.models.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Descriptors {}
