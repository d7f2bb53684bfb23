//! Pipeline request / response types
//!
//! Wire shapes are camelCase JSON. Image bytes travel base64-encoded.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::engine::{BinarizeParams, EngineError, OcrRecord};
use crate::geometry::{LineBox, TextDirection};

pub const PNG_MIME_TYPE: &str = "image/png";

/// Encoded image as exchanged with clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub mime_type: String,
}

impl Image {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Decode into a bitmap.
    ///
    /// The format is sniffed from the bytes; the declared MIME type is the
    /// fallback for formats without a recognizable signature.
    pub fn decode(&self) -> Result<DynamicImage, PipelineError> {
        if self.data.is_empty() {
            return Err(PipelineError::Decode("image data is empty".to_string()));
        }

        match image::load_from_memory(&self.data) {
            Ok(image) => Ok(image),
            Err(sniff_err) => match ImageFormat::from_mime_type(&self.mime_type) {
                Some(format) => image::load_from_memory_with_format(&self.data, format)
                    .map_err(|e| PipelineError::Decode(e.to_string())),
                None => Err(PipelineError::Decode(sniff_err.to_string())),
            },
        }
    }

    /// Encode a grayscale bitmap as PNG
    pub fn encode_png(bitmap: &GrayImage) -> Result<Self, PipelineError> {
        let mut buf = Cursor::new(Vec::new());
        bitmap
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
        Ok(Self::new(buf.into_inner(), PNG_MIME_TYPE))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_col_seps() -> u32 {
    2
}

fn default_padding() -> u32 {
    16
}

/// BinarizeImage request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinarizeRequest {
    pub image: Image,
    #[serde(flatten)]
    pub params: BinarizeParams,
}

/// SegmentLines request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRequest {
    pub image: Image,
    #[serde(default)]
    pub direction: TextDirection,
    /// Line scale in pixels; 0 lets the engine estimate it
    #[serde(default)]
    pub scale: f32,
    #[serde(default = "default_max_col_seps")]
    pub max_col_seps: u32,
    #[serde(default)]
    pub black_col_seps: bool,
}

/// RecognizeText request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeRequest {
    pub image: Image,
    pub model_name: String,
    #[serde(default)]
    pub lines: Vec<LineBox>,
    #[serde(default)]
    pub direction: TextDirection,
    #[serde(default = "default_padding")]
    pub padding: u32,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_true")]
    pub bidi_reorder: bool,
}

/// One recognized line.
///
/// `positions` and `confidences` are index-aligned; construction rejects
/// records where they are not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrText {
    text: String,
    positions: Vec<LineBox>,
    confidences: Vec<f32>,
}

impl OcrText {
    pub fn new(
        text: impl Into<String>,
        positions: Vec<LineBox>,
        confidences: Vec<f32>,
    ) -> Result<Self, PipelineError> {
        if positions.len() != confidences.len() {
            return Err(EngineError::InvalidOutput(format!(
                "{} cuts but {} confidences",
                positions.len(),
                confidences.len()
            ))
            .into());
        }
        Ok(Self {
            text: text.into(),
            positions,
            confidences,
        })
    }

    /// Convert an engine record, turning its cuts into boxes
    pub fn from_record(record: OcrRecord) -> Result<Self, PipelineError> {
        let positions = record
            .cuts
            .into_iter()
            .map(LineBox::from_corners)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::InvalidOutput(e.to_string()))?;
        Self::new(record.prediction, positions, record.confidences)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn positions(&self) -> &[LineBox] {
        &self.positions
    }

    pub fn confidences(&self) -> &[f32] {
        &self.confidences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Corners;
    use image::Luma;

    fn png_bytes() -> Vec<u8> {
        let bitmap = GrayImage::from_fn(10, 10, |x, _| Luma([(x * 25) as u8]));
        Image::encode_png(&bitmap).unwrap().data
    }

    #[test]
    fn test_image_wire_format() {
        let image = Image::new(vec![1, 2, 3], "image/png");
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json, serde_json::json!({"data": "AQID", "mimeType": "image/png"}));

        let parsed: Image = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, image);

        let bad = serde_json::from_str::<Image>(r#"{"data": "***", "mimeType": "image/png"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_decode() {
        let decoded = Image::new(png_bytes(), "image/png").decode().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 10));

        // Sniffing wins over a wrong declaration
        let decoded = Image::new(png_bytes(), "image/jpeg").decode().unwrap();
        assert_eq!(decoded.width(), 10);

        assert!(matches!(
            Image::new(b"not an image".to_vec(), "image/png").decode(),
            Err(PipelineError::Decode(_))
        ));
        assert!(matches!(
            Image::new(Vec::new(), "").decode(),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn test_request_defaults() {
        let request: RecognizeRequest = serde_json::from_value(serde_json::json!({
            "image": {"data": "AQID", "mimeType": "image/png"},
            "modelName": "en-default",
        }))
        .unwrap();
        assert_eq!(request.direction, TextDirection::LeftToRight);
        assert_eq!(request.padding, 16);
        assert!(request.normalize);
        assert!(request.bidi_reorder);
        assert!(request.lines.is_empty());

        let request: SegmentRequest = serde_json::from_value(serde_json::json!({
            "image": {"data": "AQID"},
            "direction": "TOP_TO_BOTTOM",
        }))
        .unwrap();
        assert_eq!(request.direction, TextDirection::TopToBottom);
        assert_eq!(request.scale, 0.0);
        assert_eq!(request.max_col_seps, 2);
        assert!(!request.black_col_seps);

        let request: BinarizeRequest = serde_json::from_value(serde_json::json!({
            "image": {"data": "AQID"},
            "threshold": 0.6,
            "perc": 70,
        }))
        .unwrap();
        assert_eq!(request.params.threshold, 0.6);
        assert_eq!(request.params.perc, 70);
        assert_eq!(request.params.zoom, 0.5);
        assert_eq!(request.params.high, 90);
    }

    #[test]
    fn test_ocr_text_from_record() {
        let record = OcrRecord {
            prediction: "ab".to_string(),
            cuts: vec![Corners::new(0, 0, 5, 10), Corners::new(5, 0, 9, 10)],
            confidences: vec![0.9, 0.7],
        };
        let text = OcrText::from_record(record).unwrap();
        assert_eq!(text.text(), "ab");
        assert_eq!(text.positions(), &[LineBox::new(0, 0, 5, 10), LineBox::new(5, 0, 4, 10)]);
        assert_eq!(text.positions().len(), text.confidences().len());

        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["positions"][1]["offsetX"], 5);
    }

    #[test]
    fn test_ocr_text_alignment_enforced() {
        let misaligned = OcrRecord {
            prediction: "ab".to_string(),
            cuts: vec![Corners::new(0, 0, 5, 10)],
            confidences: vec![0.9, 0.7],
        };
        assert!(matches!(
            OcrText::from_record(misaligned),
            Err(PipelineError::Engine(EngineError::InvalidOutput(_)))
        ));

        let inverted = OcrRecord {
            prediction: "a".to_string(),
            cuts: vec![Corners::new(5, 0, 0, 10)],
            confidences: vec![0.9],
        };
        assert!(OcrText::from_record(inverted).is_err());
    }
}
