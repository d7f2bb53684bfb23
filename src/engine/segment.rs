//! Projection-profile line segmentation
//!
//! Works on an ink mask (dark pixels). Columns are split at wide vertical
//! whitespace runs (at most `max_col_seps` of them, widest first) and,
//! optionally, at solid black rules. Inside each column, consecutive inked
//! rows form a line; its horizontal extent is the ink extent within the column.
//!
//! Vertical (top-to-bottom) text is handled by transposing the mask.

use image::GrayImage;

use crate::geometry::{Corners, TextDirection};

use super::{EngineError, SegmentParams};

/// Pixels darker than this count as ink
const INK_LEVEL: u8 = 128;

/// Fraction of a column's height that must be inked for a black separator
const BLACK_SEP_COVERAGE: f32 = 0.9;

/// Boolean ink mask, row-major
struct InkMask {
    width: usize,
    height: usize,
    ink: Vec<bool>,
}

impl InkMask {
    fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            ink: gray.pixels().map(|p| p[0] < INK_LEVEL).collect(),
        }
    }

    fn transposed(&self) -> Self {
        let mut ink = vec![false; self.ink.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                ink[x * self.height + y] = self.ink[y * self.width + x];
            }
        }
        Self {
            width: self.height,
            height: self.width,
            ink,
        }
    }

    fn at(&self, x: usize, y: usize) -> bool {
        self.ink[y * self.width + x]
    }

    /// Ink count per row, restricted to columns `x0..x1`
    fn row_profile(&self, x0: usize, x1: usize) -> Vec<usize> {
        (0..self.height)
            .map(|y| (x0..x1).filter(|&x| self.at(x, y)).count())
            .collect()
    }

    /// Ink count per column over the full height
    fn column_profile(&self) -> Vec<usize> {
        (0..self.width)
            .map(|x| (0..self.height).filter(|&y| self.at(x, y)).count())
            .collect()
    }
}

/// Half-open runs of indices where `pred` holds
fn runs(profile: &[usize], pred: impl Fn(usize) -> bool) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, &value) in profile.iter().enumerate() {
        match (pred(value), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, profile.len()));
    }
    out
}

/// Median height of inked row bands across the page
fn estimate_scale(mask: &InkMask) -> Option<f32> {
    let bands = runs(&mask.row_profile(0, mask.width), |count| count > 0);
    if bands.is_empty() {
        return None;
    }
    let mut heights: Vec<usize> = bands.iter().map(|(a, b)| b - a).collect();
    heights.sort_unstable();
    Some(heights[heights.len() / 2] as f32)
}

/// Column ranges between separators, in left-to-right order
fn find_columns(mask: &InkMask, scale: f32, max_col_seps: u32, black_col_seps: bool) -> Vec<(usize, usize)> {
    let profile = mask.column_profile();
    let inked = runs(&profile, |count| count > 0);
    let (Some(&(left, _)), Some(&(_, right))) = (inked.first(), inked.last()) else {
        return Vec::new();
    };

    let min_gap = (2.0 * scale).ceil().max(1.0) as usize;
    let mut gaps: Vec<(usize, usize)> = runs(&profile, |count| count == 0)
        .into_iter()
        .filter(|&(a, b)| a > left && b < right && b - a >= min_gap)
        .collect();
    gaps.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));
    gaps.truncate(max_col_seps as usize);

    let mut separators = gaps;
    if black_col_seps {
        let solid = (mask.height as f32 * BLACK_SEP_COVERAGE).ceil() as usize;
        separators.extend(runs(&profile, |count| count >= solid.max(1)));
    }
    separators.sort_unstable();

    let mut columns = Vec::new();
    let mut cursor = left;
    for (a, b) in separators {
        if a > cursor {
            columns.push((cursor, a));
        }
        cursor = cursor.max(b);
    }
    if right > cursor {
        columns.push((cursor, right));
    }
    columns
}

/// Line corners inside one column, top to bottom
fn lines_in_column(mask: &InkMask, x0: usize, x1: usize) -> Vec<Corners> {
    runs(&mask.row_profile(x0, x1), |count| count > 0)
        .into_iter()
        .filter_map(|(y0, y1)| {
            let inked = |x: usize| (y0..y1).any(|y| mask.at(x, y));
            let left = (x0..x1).find(|&x| inked(x))?;
            let right = (x0..x1).rev().find(|&x| inked(x))? + 1;
            Some(Corners::new(left as u32, y0 as u32, right as u32, y1 as u32))
        })
        .collect()
}

/// Segment a page into line boxes in reading order
pub fn segment_lines(gray: &GrayImage, params: &SegmentParams) -> Result<Vec<Corners>, EngineError> {
    let direction = TextDirection::from_engine_token(&params.text_direction).ok_or_else(|| {
        EngineError::InvalidParameter {
            name: "text_direction",
            reason: format!("unknown direction '{}'", params.text_direction),
        }
    })?;
    if !params.scale.is_finite() {
        return Err(EngineError::InvalidParameter {
            name: "scale",
            reason: "must be a finite number".to_string(),
        });
    }

    let page = InkMask::from_gray(gray);
    let vertical = direction == TextDirection::TopToBottom;
    let mask = if vertical { page.transposed() } else { page };

    let scale = if params.scale > 0.0 {
        params.scale
    } else {
        match estimate_scale(&mask) {
            Some(scale) => scale,
            None => return Ok(Vec::new()),
        }
    };

    let mut columns = find_columns(&mask, scale, params.max_col_seps, params.black_col_seps);
    if direction == TextDirection::RightToLeft {
        columns.reverse();
    }

    let lines = columns
        .into_iter()
        .flat_map(|(x0, x1)| lines_in_column(&mask, x0, x1))
        .map(|c| if vertical { c.transposed() } else { c })
        .collect();
    Ok(lines)
}
