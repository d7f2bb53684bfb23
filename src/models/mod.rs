//! Model files
//!
//! Locating model files on local disk and acquiring missing ones from the
//! remote registry.

mod registry;
mod resolver;

pub use registry::{HttpRegistry, ModelRegistry, RegistryError};
pub use resolver::{validate_model_name, ModelResolver, ResolveError};

/// Recognized model file variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    /// Legacy pickled network
    Pronn,
    /// CLSTM protobuf model
    Clstm,
    /// CoreML-serialized model
    Mlmodel,
}

impl ModelFormat {
    /// Lookup order used both on disk and against the registry
    pub const PRIORITY: [ModelFormat; 3] = [Self::Pronn, Self::Clstm, Self::Mlmodel];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pronn => "pronn",
            Self::Clstm => "clstm",
            Self::Mlmodel => "mlmodel",
        }
    }

    /// File name for a model of this format
    pub fn file_name(&self, model: &str) -> String {
        format!("{}.{}", model, self.extension())
    }
}
