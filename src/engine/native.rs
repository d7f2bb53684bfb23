//! Built-in engine
//!
//! Binarization and segmentation run in-process; recognition is delegated to
//! the configured [`RecognizerCommand`].

use std::path::Path;

use image::{DynamicImage, GrayImage};

use super::binarize::nlbin;
use super::bridge::RecognizerCommand;
use super::segment::segment_lines;
use super::{
    BinarizeParams, EngineError, OcrEngine, RecognizeOptions, Recognizer, RecordIter,
    SegmentParams, Segmentation,
};

/// In-process engine with an optional external recognizer
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    recognizer: Option<RecognizerCommand>,
}

impl NativeEngine {
    pub fn new(recognizer: Option<RecognizerCommand>) -> Self {
        Self { recognizer }
    }

    /// Build from a configured command line
    pub fn from_command_line(command_line: Option<&str>) -> Self {
        Self::new(command_line.and_then(RecognizerCommand::parse))
    }

    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }
}

impl OcrEngine for NativeEngine {
    fn binarize(&self, image: &DynamicImage, params: &BinarizeParams) -> Result<GrayImage, EngineError> {
        nlbin(&image.to_luma8(), params)
    }

    fn segment(&self, image: &DynamicImage, params: &SegmentParams) -> Result<Segmentation, EngineError> {
        let boxes = segment_lines(&image.to_luma8(), params)?;
        Ok(Segmentation {
            text_direction: params.text_direction.clone(),
            boxes,
        })
    }

    fn load_recognizer(&self, model_path: &Path) -> Result<Recognizer, EngineError> {
        let model_load = |reason: String| EngineError::ModelLoad {
            path: model_path.to_path_buf(),
            reason,
        };

        let data = std::fs::read(model_path).map_err(|e| model_load(e.to_string()))?;
        if data.is_empty() {
            return Err(model_load("model file is empty".to_string()));
        }

        tracing::debug!(
            path = %model_path.display(),
            size_bytes = data.len(),
            "Loaded recognition model"
        );
        Ok(Recognizer::new(model_path, data.len() as u64))
    }

    fn recognize(
        &self,
        recognizer: &Recognizer,
        image: &DynamicImage,
        bounds: &Segmentation,
        options: &RecognizeOptions,
    ) -> Result<RecordIter, EngineError> {
        let command = self.recognizer.as_ref().ok_or_else(|| {
            EngineError::Unavailable(
                "no recognizer command configured (set MOCRI_RECOGNIZER_CMD)".to_string(),
            )
        })?;

        if bounds.boxes.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        for corners in &bounds.boxes {
            if corners.x2 > image.width() || corners.y2 > image.height() {
                return Err(EngineError::InvalidInput(format!(
                    "line ({}, {})-({}, {}) lies outside the {}x{} image",
                    corners.x1,
                    corners.y1,
                    corners.x2,
                    corners.y2,
                    image.width(),
                    image.height()
                )));
            }
        }

        command.run(recognizer, image, bounds, options)
    }
}
