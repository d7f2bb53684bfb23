//! Model resolver
//!
//! Turns a model name into a readable local file: search the model directory,
//! download once if nothing is there, search again, fail.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ModelFormat, ModelRegistry, RegistryError};

/// Resolution errors. Every variant names the model it concerns.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid model name '{model}': {reason}")]
    InvalidName { model: String, reason: &'static str },

    #[error("Model '{model}' could not be downloaded: {source}")]
    Download {
        model: String,
        #[source]
        source: RegistryError,
    },

    #[error("Model '{model}' is not available locally after download")]
    Missing { model: String },

    #[error("Model '{model}' could not be stored: {source}")]
    Io {
        model: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// Name of the model that failed to resolve
    pub fn model(&self) -> &str {
        match self {
            Self::InvalidName { model, .. }
            | Self::Download { model, .. }
            | Self::Missing { model }
            | Self::Io { model, .. } => model,
        }
    }

    /// Whether the model simply does not exist anywhere
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Missing { .. }
                | Self::Download {
                    source: RegistryError::ModelNotFound(_),
                    ..
                }
        )
    }
}

/// Reject names that could escape the model directory
pub fn validate_model_name(name: &str) -> Result<(), ResolveError> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if name == "." || name == ".." || name.starts_with('.') {
        Some("name starts with a dot")
    } else if name.chars().any(char::is_control) {
        Some("name contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ResolveError::InvalidName {
            model: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

type DownloadLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Resolves model names against the shared model directory
pub struct ModelResolver {
    model_dir: PathBuf,
    registry: Arc<dyn ModelRegistry>,
    /// One async lock per model name with a resolution in flight
    downloads: DownloadLocks,
}

impl ModelResolver {
    pub fn new(model_dir: impl Into<PathBuf>, registry: Arc<dyn ModelRegistry>) -> Self {
        Self {
            model_dir: model_dir.into(),
            registry,
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Search the model directory for `name`, in format priority order
    pub async fn locate(&self, name: &str) -> Option<PathBuf> {
        for format in ModelFormat::PRIORITY {
            let candidate = self.model_dir.join(format.file_name(name));
            match tokio::fs::metadata(&candidate).await {
                Ok(metadata) if metadata.is_file() => return Some(candidate),
                _ => continue,
            }
        }
        None
    }

    /// Resolve `name` to a local model file, downloading it at most once
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        validate_model_name(name)?;

        if let Some(path) = self.locate(name).await {
            return Ok(path);
        }

        let slot = DownloadSlot::acquire(&self.downloads, name);
        let _guard = slot.lock.lock().await;

        // A concurrent call may have finished the download while we waited
        if let Some(path) = self.locate(name).await {
            return Ok(path);
        }

        tracing::info!(model = name, "Downloading model '{}'", name);
        tokio::fs::create_dir_all(&self.model_dir)
            .await
            .map_err(|source| ResolveError::Io {
                model: name.to_string(),
                source,
            })?;

        self.registry
            .fetch_model(name, &self.model_dir)
            .await
            .map_err(|source| ResolveError::Download {
                model: name.to_string(),
                source,
            })?;

        self.locate(name).await.ok_or_else(|| ResolveError::Missing {
            model: name.to_string(),
        })
    }
}

/// Claim on a per-name download lock.
///
/// The table entry is removed when the last claim for that name is dropped,
/// including when the resolving future is cancelled.
struct DownloadSlot<'a> {
    table: &'a DownloadLocks,
    name: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> DownloadSlot<'a> {
    fn acquire(table: &'a DownloadLocks, name: &'a str) -> Self {
        let lock = table.lock().entry(name.to_string()).or_default().clone();
        Self { table, name, lock }
    }
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Held by the table and by this slot only
        if Arc::strong_count(&self.lock) == 2 {
            table.remove(self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Registry that publishes a fixed set of models and counts downloads
    struct FakeRegistry {
        published: Vec<&'static str>,
        /// Write the file somewhere other than where it was asked for
        misplace: bool,
        downloads: AtomicUsize,
    }

    impl FakeRegistry {
        fn publishing(published: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                published,
                misplace: false,
                downloads: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelRegistry for FakeRegistry {
        async fn fetch_listing(&self) -> Result<Inventory, RegistryError> {
            Ok(Inventory::default())
        }

        async fn fetch_model(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, RegistryError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            if !self.published.iter().any(|published| *published == name) {
                return Err(RegistryError::ModelNotFound(name.to_string()));
            }

            let path = if self.misplace {
                dest_dir.join(format!("{}.weights", name))
            } else {
                dest_dir.join(ModelFormat::Clstm.file_name(name))
            };
            tokio::fs::write(&path, b"weights").await?;
            Ok(path)
        }
    }

    #[tokio::test]
    async fn test_existing_file_no_download() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("local.clstm"), b"x").unwrap();

        let registry = FakeRegistry::publishing(vec![]);
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        let path = resolver.resolve("local").await.unwrap();
        assert_eq!(path, dir.path().join("local.clstm"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("both.clstm"), b"x").unwrap();
        std::fs::write(dir.path().join("both.pronn"), b"x").unwrap();
        std::fs::write(dir.path().join("both.mlmodel"), b"x").unwrap();

        let resolver = ModelResolver::new(dir.path(), FakeRegistry::publishing(vec![]));
        let path = resolver.resolve("both").await.unwrap();
        assert_eq!(path, dir.path().join("both.pronn"));
    }

    #[tokio::test]
    async fn test_download_then_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec!["remote"]);
        let resolver = ModelResolver::new(dir.path().join("models"), registry.clone());

        let first = resolver.resolve("remote").await.unwrap();
        let second = resolver.resolve("remote").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("models").join("remote.clstm"));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_missing_model_single_attempt() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec![]);
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        let err = resolver.resolve("missing-model").await.unwrap_err();

        assert_eq!(registry.count(), 1);
        assert_eq!(err.model(), "missing-model");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("missing-model"));
    }

    #[tokio::test]
    async fn test_misplaced_download_fails_after_one_retry() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry {
            published: vec!["odd"],
            misplace: true,
            downloads: AtomicUsize::new(0),
        });
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        let err = resolver.resolve("odd").await.unwrap_err();
        assert!(matches!(err, ResolveError::Missing { .. }));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_download_once() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec!["shared"]);
        let resolver = Arc::new(ModelResolver::new(dir.path(), registry.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("shared").await })
            })
            .collect();

        for task in tasks {
            let path = task.await.unwrap().unwrap();
            assert_eq!(path, dir.path().join("shared.clstm"));
        }
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_lock_table_drained_after_failures() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec![]);
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        for i in 0..50 {
            let name = format!("junk-{}", i);
            assert!(resolver.resolve(&name).await.is_err());
        }

        assert_eq!(registry.count(), 50);
        assert!(resolver.downloads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_drained_after_concurrent_downloads() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec!["shared"]);
        let resolver = Arc::new(ModelResolver::new(dir.path(), registry.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                let name = if i % 2 == 0 { "shared" } else { "absent" };
                tokio::spawn(async move { resolver.resolve(name).await.is_ok() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(resolver.downloads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_resolution_releases_lock() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec!["slow"]);
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        // The fake registry sleeps, so this times out mid-download
        let result = tokio::time::timeout(Duration::from_millis(1), resolver.resolve("slow")).await;
        assert!(result.is_err());
        assert!(resolver.downloads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_names_rejected_without_download() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::publishing(vec![]);
        let resolver = ModelResolver::new(dir.path(), registry.clone());

        for name in ["", "  ", "../etc/passwd", "a/b", "a\\b", "..", ".hidden"] {
            let err = resolver.resolve(name).await.unwrap_err();
            assert!(matches!(err, ResolveError::InvalidName { .. }), "{name:?}");
        }
        assert_eq!(registry.count(), 0);
    }
}
