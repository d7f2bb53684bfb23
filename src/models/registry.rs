//! Model registry client
//!
//! The registry serves a listing document and the model files themselves:
//!
//! - `GET <base>/models.json` returns the inventory document
//! - `GET <base>/<name>.<ext>` returns a model file, tried in
//!   [`ModelFormat::PRIORITY`] order

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::ModelFormat;
use crate::inventory::Inventory;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Model not found in registry: {0}")]
    ModelNotFound(String),

    #[error("Registry returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid model listing: {0}")]
    Listing(String),

    #[error("Invalid registry URL: {0}")]
    InvalidUrl(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of the model listing and of model files
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Fetch the full listing of published models
    async fn fetch_listing(&self) -> Result<Inventory, RegistryError>;

    /// Download `name` into `dest_dir`, returning the written file
    async fn fetch_model(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, RegistryError>;
}

/// HTTP registry client
pub struct HttpRegistry {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RegistryError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// URL of `file_name` under the base; the name is escaped as a single path segment
    fn file_url(&self, file_name: &str) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(file_name);
        Ok(url)
    }

    fn listing_url(&self) -> Result<Url, RegistryError> {
        self.file_url("models.json")
    }

    fn model_url(&self, name: &str, format: ModelFormat) -> Result<Url, RegistryError> {
        self.file_url(&format.file_name(name))
    }

    /// Stream a successful response into `dest_dir`, then move it into place
    async fn download(
        &self,
        response: reqwest::Response,
        dest_dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf, RegistryError> {
        let final_path = dest_dir.join(file_name);
        let temp_path = dest_dir.join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            let mut hasher = Sha256::new();
            let mut downloaded: u64 = 0;
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                hasher.update(&chunk);
                downloaded += chunk.len() as u64;
            }

            file.flush().await?;
            drop(file);

            tokio::fs::rename(&temp_path, &final_path).await?;
            Ok::<_, RegistryError>((downloaded, hex::encode(hasher.finalize())))
        }
        .await;

        match result {
            Ok((size, digest)) => {
                tracing::info!(
                    path = %final_path.display(),
                    size_bytes = size,
                    sha256 = %digest,
                    "Downloaded model file"
                );
                Ok(final_path)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ModelRegistry for HttpRegistry {
    async fn fetch_listing(&self) -> Result<Inventory, RegistryError> {
        let url = self.listing_url()?;
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        Inventory::from_slice(&body).map_err(|e| RegistryError::Listing(e.to_string()))
    }

    async fn fetch_model(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, RegistryError> {
        for format in ModelFormat::PRIORITY {
            let url = self.model_url(name, format)?;
            let response = self.client.get(url.clone()).send().await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                tracing::debug!(url = %url, "Model variant not published");
                continue;
            }
            if !response.status().is_success() {
                return Err(RegistryError::Status {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                });
            }

            tracing::info!(model = name, url = %url, "Downloading model");
            return self
                .download(response, dest_dir, &format.file_name(name))
                .await;
        }

        Err(RegistryError::ModelNotFound(name.to_string()))
    }
}
