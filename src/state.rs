//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pipeline: Pipeline,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, pipeline }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the OCR pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }
}
