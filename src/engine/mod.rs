//! OCR Engine
//!
//! The image-processing side of the service. The orchestration layer only
//! depends on the [`OcrEngine`] trait; [`NativeEngine`] is the implementation
//! wired up by the server binary.
//!
//! All engine calls are synchronous and may block for a long time. Callers
//! run them on the blocking thread pool.

mod binarize;
mod bridge;
mod native;
mod segment;

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::geometry::Corners;

pub use bridge::RecognizerCommand;
pub use native::NativeEngine;

/// Parameters of the non-linear binarizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarizeParams {
    /// Threshold on the normalized, flattened image (0..1)
    pub threshold: f32,
    /// Downscale factor for background estimation (0..1]
    pub zoom: f32,
    /// Scale of the background estimation window
    pub escale: f32,
    /// Fraction of each edge ignored when estimating black/white levels
    pub border: f32,
    /// Percentile used by the background filter
    pub perc: i32,
    /// Percentile taken as black level
    pub low: i32,
    /// Percentile taken as white level
    pub high: i32,
}

impl Default for BinarizeParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            zoom: 0.5,
            escale: 1.0,
            border: 0.1,
            perc: 80,
            low: 5,
            high: 90,
        }
    }
}

/// Parameters of line segmentation
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParams {
    /// Engine direction token (`left-to-right`, ...)
    pub text_direction: String,
    /// Expected line scale in pixels, `<= 0` to estimate
    pub scale: f32,
    /// Maximum number of whitespace column separators
    pub max_col_seps: u32,
    /// Also split columns on solid black separators
    pub black_col_seps: bool,
}

/// Line regions together with their reading direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segmentation {
    pub text_direction: String,
    pub boxes: Vec<Corners>,
}

/// Pass-through flags for recognition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizeOptions {
    /// Padding in pixels added around each line
    pub padding: u32,
    /// Apply line normalization before inference
    pub normalize: bool,
    /// Reorder output into logical order for bidirectional text
    pub bidi_reorder: bool,
}

/// One recognized line as produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRecord {
    pub prediction: String,
    pub cuts: Vec<Corners>,
    pub confidences: Vec<f32>,
}

/// A loaded recognition model
#[derive(Debug, Clone)]
pub struct Recognizer {
    model_path: PathBuf,
    size_bytes: u64,
}

impl Recognizer {
    pub fn new(model_path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            model_path: model_path.into(),
            size_bytes,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Lazily produced recognition records, in engine order
pub type RecordIter = Box<dyn Iterator<Item = Result<OcrRecord, EngineError>> + Send>;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Engine produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the error stems from the caller's inputs rather than the engine
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. } | Self::InvalidInput(_))
    }
}

/// OCR engine contract
pub trait OcrEngine: Send + Sync {
    /// Binarize a page image
    fn binarize(&self, image: &DynamicImage, params: &BinarizeParams)
        -> Result<GrayImage, EngineError>;

    /// Find text-line regions, in reading order
    fn segment(&self, image: &DynamicImage, params: &SegmentParams)
        -> Result<Segmentation, EngineError>;

    /// Load a recognition model from a local file
    fn load_recognizer(&self, model_path: &Path) -> Result<Recognizer, EngineError>;

    /// Recognize the text of each line in `bounds`
    fn recognize(
        &self,
        recognizer: &Recognizer,
        image: &DynamicImage,
        bounds: &Segmentation,
        options: &RecognizeOptions,
    ) -> Result<RecordIter, EngineError>;
}
