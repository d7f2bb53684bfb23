//! Non-linear binarization
//!
//! 1. normalize intensities to 0..1
//! 2. estimate the page background with a separable percentile filter on a
//!    downscaled copy, and flatten it out
//! 3. stretch between the `low` / `high` percentiles of the page interior
//! 4. threshold

use image::{GrayImage, Luma};

use super::{BinarizeParams, EngineError};

/// Base width of the background filter window, before `escale` / `zoom`
const FILTER_RANGE: f32 = 20.0;

fn invalid(name: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn validate(params: &BinarizeParams) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&params.threshold) {
        return Err(invalid("threshold", "must be within 0..=1"));
    }
    if !(params.zoom > 0.0 && params.zoom <= 1.0) {
        return Err(invalid("zoom", "must be within (0, 1]"));
    }
    if !(params.escale > 0.0 && params.escale.is_finite()) {
        return Err(invalid("escale", "must be positive"));
    }
    if !(0.0..0.5).contains(&params.border) {
        return Err(invalid("border", "must be within 0..0.5"));
    }
    for (name, value) in [("perc", params.perc), ("low", params.low), ("high", params.high)] {
        if !(0..=100).contains(&value) {
            return Err(invalid(name, "must be a percentile within 0..=100"));
        }
    }
    if params.low >= params.high {
        return Err(invalid("low", "must be below high"));
    }
    Ok(())
}

/// Value at percentile `perc` of `values` (sorts in place)
fn percentile(values: &mut [f32], perc: i32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (perc as f32 / 100.0) * (values.len() - 1) as f32;
    values[rank.round() as usize]
}

/// Single-axis percentile filter over a `width` x `height` grid
fn percentile_filter_1d(
    data: &[f32],
    width: usize,
    height: usize,
    window: usize,
    perc: i32,
    horizontal: bool,
) -> Vec<f32> {
    let half = window / 2;
    let mut out = vec![0.0; data.len()];
    let mut buf = Vec::with_capacity(window + 1);

    for y in 0..height {
        for x in 0..width {
            buf.clear();
            if horizontal {
                let start = x.saturating_sub(half);
                let end = (x + half).min(width - 1);
                buf.extend((start..=end).map(|xx| data[y * width + xx]));
            } else {
                let start = y.saturating_sub(half);
                let end = (y + half).min(height - 1);
                buf.extend((start..=end).map(|yy| data[yy * width + x]));
            }
            out[y * width + x] = percentile(&mut buf, perc);
        }
    }
    out
}

/// Nearest-neighbour resample of a float grid
fn resample(data: &[f32], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(new_w * new_h);
    for y in 0..new_h {
        let sy = (y * height / new_h).min(height - 1);
        for x in 0..new_w {
            let sx = (x * width / new_w).min(width - 1);
            out.push(data[sy * width + sx]);
        }
    }
    out
}

/// Binarize a grayscale page. Output pixels are 0 (ink) or 255 (paper).
pub fn nlbin(gray: &GrayImage, params: &BinarizeParams) -> Result<GrayImage, EngineError> {
    validate(params)?;

    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(EngineError::InvalidInput("image is empty".to_string()));
    }
    let (width, height) = (w as usize, h as usize);

    let raw: Vec<f32> = gray.pixels().map(|p| p[0] as f32 / 255.0).collect();
    let lo = raw.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    // Uniform pages carry no contrast to estimate from; threshold directly
    if hi - lo <= f32::EPSILON {
        let value = if lo > params.threshold { 255 } else { 0 };
        return Ok(GrayImage::from_pixel(w, h, Luma([value])));
    }

    let norm: Vec<f32> = raw.iter().map(|v| (v - lo) / (hi - lo)).collect();

    // Already bilevel input skips flattening
    let bilevel = norm.iter().all(|&v| v == 0.0 || v == 1.0);
    let flat = if bilevel {
        norm
    } else {
        let small_w = ((width as f32 * params.zoom).round() as usize).max(1);
        let small_h = ((height as f32 * params.zoom).round() as usize).max(1);
        // A window wider than the page filters nothing more
        let limit = small_w.max(small_h) as f32;
        let window = ((FILTER_RANGE * params.escale * params.zoom).round().min(limit) as usize).max(2);

        let small = resample(&norm, width, height, small_w, small_h);
        let pass = percentile_filter_1d(&small, small_w, small_h, window, params.perc, true);
        let background = percentile_filter_1d(&pass, small_w, small_h, window, params.perc, false);
        let background = resample(&background, small_w, small_h, width, height);

        norm.iter()
            .zip(&background)
            .map(|(v, bg)| (v - bg + 1.0).clamp(0.0, 1.0))
            .collect()
    };

    // Black/white levels from the page interior. border < 0.5 keeps it non-empty.
    let d0 = (params.border * height as f32) as usize;
    let d1 = (params.border * width as f32) as usize;
    let mut interior: Vec<f32> = (d0..height - d0)
        .flat_map(|y| flat[y * width + d1..y * width + width - d1].iter().copied())
        .collect();
    let mut scratch = interior.clone();
    let black = percentile(&mut interior, params.low);
    let white = percentile(&mut scratch, params.high);

    let stretched: Vec<f32> = if white - black > f32::EPSILON {
        flat.iter()
            .map(|v| ((v - black) / (white - black)).clamp(0.0, 1.0))
            .collect()
    } else {
        flat
    };

    let mut out = GrayImage::new(w, h);
    for (pixel, value) in out.pixels_mut().zip(stretched) {
        *pixel = Luma([if value > params.threshold { 255 } else { 0 }]);
    }
    Ok(out)
}
