//! Line geometry
//!
//! Boxes travel between segmentation and recognition in two shapes: the wire
//! shape (`LineBox`, offset plus extent) and the engine shape (`Corners`, two
//! corner points). Conversions are exact integer arithmetic in both directions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned text-line region in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineBox {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Corner-pair rectangle as produced and consumed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Corners {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Geometry conversion errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("Inverted corners ({x1}, {y1})-({x2}, {y2})")]
    Inverted { x1: u32, y1: u32, x2: u32, y2: u32 },

    #[error("Box at ({offset_x}, {offset_y}) with size {width}x{height} exceeds the coordinate range")]
    Overflow {
        offset_x: u32,
        offset_y: u32,
        width: u32,
        height: u32,
    },
}

impl Corners {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Swap the x and y axes
    pub fn transposed(self) -> Self {
        Self {
            x1: self.y1,
            y1: self.x1,
            x2: self.y2,
            y2: self.x2,
        }
    }
}

impl From<[u32; 4]> for Corners {
    fn from([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<Corners> for [u32; 4] {
    fn from(c: Corners) -> Self {
        [c.x1, c.y1, c.x2, c.y2]
    }
}

impl LineBox {
    pub fn new(offset_x: u32, offset_y: u32, width: u32, height: u32) -> Self {
        Self {
            offset_x,
            offset_y,
            width,
            height,
        }
    }

    /// Build a box from engine corners (`width = x2 - x1`, `height = y2 - y1`)
    pub fn from_corners(corners: Corners) -> Result<Self, GeometryError> {
        let Corners { x1, y1, x2, y2 } = corners;
        match (x2.checked_sub(x1), y2.checked_sub(y1)) {
            (Some(width), Some(height)) => Ok(Self::new(x1, y1, width, height)),
            _ => Err(GeometryError::Inverted { x1, y1, x2, y2 }),
        }
    }

    /// Reconstruct engine corners (`x2 = offsetX + width`, `y2 = offsetY + height`)
    pub fn to_corners(&self) -> Result<Corners, GeometryError> {
        let x2 = self.offset_x.checked_add(self.width);
        let y2 = self.offset_y.checked_add(self.height);
        match (x2, y2) {
            (Some(x2), Some(y2)) => Ok(Corners::new(self.offset_x, self.offset_y, x2, y2)),
            _ => Err(GeometryError::Overflow {
                offset_x: self.offset_x,
                offset_y: self.offset_y,
                width: self.width,
                height: self.height,
            }),
        }
    }
}

impl TryFrom<Corners> for LineBox {
    type Error = GeometryError;

    fn try_from(corners: Corners) -> Result<Self, Self::Error> {
        Self::from_corners(corners)
    }
}

/// Reading direction of the text lines in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextDirection {
    #[default]
    LeftToRight,
    RightToLeft,
    TopToBottom,
}

impl TextDirection {
    /// Lowercase, hyphen-separated token understood by the engine
    pub fn engine_token(&self) -> &'static str {
        match self {
            Self::LeftToRight => "left-to-right",
            Self::RightToLeft => "right-to-left",
            Self::TopToBottom => "top-to-bottom",
        }
    }

    /// Parse an engine token back into a direction
    pub fn from_engine_token(token: &str) -> Option<Self> {
        match token {
            "left-to-right" => Some(Self::LeftToRight),
            "right-to-left" => Some(Self::RightToLeft),
            "top-to-bottom" => Some(Self::TopToBottom),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners_round_trip() {
        let samples = [
            (0, 0, 0, 0),
            (0, 0, 50, 10),
            (0, 20, 50, 30),
            (7, 3, 7, 9),
            (1, 1, u32::MAX, u32::MAX),
            (u32::MAX, u32::MAX, u32::MAX, u32::MAX),
        ];

        for (x1, y1, x2, y2) in samples {
            let corners = Corners::new(x1, y1, x2, y2);
            let line = LineBox::from_corners(corners).unwrap();
            assert_eq!(line.width, x2 - x1);
            assert_eq!(line.height, y2 - y1);
            assert_eq!(line.to_corners().unwrap(), corners);
        }
    }

    #[test]
    fn test_inverted_corners_rejected() {
        let result = LineBox::from_corners(Corners::new(10, 0, 5, 4));
        assert!(matches!(result, Err(GeometryError::Inverted { .. })));

        let result = LineBox::try_from(Corners::new(0, 9, 5, 4));
        assert!(matches!(result, Err(GeometryError::Inverted { .. })));
    }

    #[test]
    fn test_overflowing_box_rejected() {
        let line = LineBox::new(u32::MAX - 1, 0, 2, 1);
        assert!(matches!(line.to_corners(), Err(GeometryError::Overflow { .. })));
    }

    #[test]
    fn test_box_wire_names() {
        let json = serde_json::to_value(LineBox::new(1, 2, 3, 4)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"offsetX": 1, "offsetY": 2, "width": 3, "height": 4})
        );

        let corners: Corners = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(corners, Corners::new(1, 2, 3, 4));
    }

    #[test]
    fn test_direction_tokens() {
        let direction: TextDirection = serde_json::from_str("\"LEFT_TO_RIGHT\"").unwrap();
        assert_eq!(direction.engine_token(), "left-to-right");

        for direction in [
            TextDirection::LeftToRight,
            TextDirection::RightToLeft,
            TextDirection::TopToBottom,
        ] {
            let wire = serde_json::to_value(direction).unwrap();
            let expected = wire.as_str().unwrap().to_lowercase().replace('_', "-");
            assert_eq!(direction.engine_token(), expected);
            assert_eq!(TextDirection::from_engine_token(&expected), Some(direction));
        }

        assert_eq!(TextDirection::from_engine_token("diagonal"), None);
    }
}
