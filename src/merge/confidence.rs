//! Confidence resolution (average, brush boost, clip) and thresholding.

use image::GrayImage;
use rayon::prelude::*;

use super::accumulator::AccumulatorGrid;
use super::placement::Canvas;

/// Per-pixel confidence in [0, 1], row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceField {
    canvas: Canvas,
    values: Vec<f64>,
}

impl ConfidenceField {
    #[inline]
    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.canvas.width + x]
    }
}

/// Confidence for a single pixel.
///
/// A pixel brushed `n` times is scaled by `boost_base^(n-1)`, so one pass
/// leaves the average as is and every further pass compounds.
#[inline]
pub fn pixel_confidence(sum: f64, coverage: u32, brush_count: u32, boost_base: f64) -> f64 {
    if coverage == 0 {
        return 0.0;
    }
    let mut confidence = sum / coverage as f64;
    // 0 * inf would turn an empty average into NaN.
    if brush_count >= 1 && confidence > 0.0 {
        confidence *= boost_pow(boost_base, brush_count - 1);
    }
    confidence.clamp(0.0, 1.0)
}

#[inline]
fn boost_pow(base: f64, exponent: u32) -> f64 {
    match i32::try_from(exponent) {
        Ok(e) => base.powi(e),
        Err(_) => base.powf(exponent as f64),
    }
}

/// Resolve the whole grid. Pure: the same grid always yields the same field.
pub fn resolve_confidence(grid: &AccumulatorGrid, boost_base: f64) -> ConfidenceField {
    let canvas = grid.canvas();
    let mut values = vec![0.0f64; canvas.area()];
    if canvas.width == 0 {
        return ConfidenceField { canvas, values };
    }

    let (sum, coverage, brush) = (grid.sum(), grid.coverage(), grid.brush_count());
    values
        .par_chunks_mut(canvas.width)
        .enumerate()
        .for_each(|(y, row)| {
            let base = y * canvas.width;
            for (x, out) in row.iter_mut().enumerate() {
                let i = base + x;
                *out = pixel_confidence(sum[i], coverage[i], brush[i], boost_base);
            }
        });

    ConfidenceField { canvas, values }
}

/// Binarize: 255 where confidence is strictly above `threshold`, else 0.
pub fn threshold_mask(field: &ConfidenceField, threshold: f64) -> GrayImage {
    let canvas = field.canvas();
    let pixels: Vec<u8> = field
        .values()
        .par_iter()
        .map(|&c| if c > threshold { 255u8 } else { 0u8 })
        .collect();

    GrayImage::from_raw(canvas.width as u32, canvas.height as u32, pixels)
        .unwrap_or_else(|| GrayImage::new(canvas.width as u32, canvas.height as u32))
}
