// ============================================================================
// MERGE: crop accumulation and the finalize pipeline
// ============================================================================
//
// Pipeline order is fixed: average -> boost -> clip -> threshold ->
// noise filter -> smooth. The first four always run; the last two are
// optional per request.

pub mod accumulator;
pub mod confidence;
pub mod placement;

use image::GrayImage;

pub use accumulator::{AccumulatorGrid, CropPlacement};
pub use confidence::{ConfidenceField, resolve_confidence, threshold_mask};
pub use placement::{Canvas, CropGeometry, Overlap, PixelRect, clip_to_canvas};

use crate::config::FinalizeOptions;
use crate::error::{FinalizeError, PlacementError};
use crate::ops::morphology::ShapeSmoother;
use crate::ops::noise::NoiseFilter;

/// One merge request's worth of state. Crops are only ever added.
#[derive(Clone, Debug)]
pub struct MergeSession {
    grid: AccumulatorGrid,
    placed: usize,
}

impl MergeSession {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            grid: AccumulatorGrid::new(canvas),
            placed: 0,
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.grid.canvas()
    }

    pub fn grid(&self) -> &AccumulatorGrid {
        &self.grid
    }

    /// Number of crops that touched at least one canvas pixel.
    pub fn placed(&self) -> usize {
        self.placed
    }

    pub fn add_crop(&mut self, crop: &CropPlacement) -> Result<bool, PlacementError> {
        let touched = self.grid.add(crop)?;
        if touched {
            self.placed += 1;
        } else {
            log::debug!(
                "crop at ({}, {}) lies outside the {}x{} canvas",
                crop.geometry.center_x,
                crop.geometry.center_y,
                self.grid.canvas().width,
                self.grid.canvas().height
            );
        }
        Ok(touched)
    }

    /// Confidence field for the current grid.
    pub fn confidence(&self, boost_base: f64) -> ConfidenceField {
        resolve_confidence(&self.grid, boost_base)
    }

    /// Run the finalize pipeline. Does not consume or alter the grid, so
    /// calling it twice gives the same mask.
    pub fn finalize(
        &self,
        options: &FinalizeOptions,
        noise_filter: &dyn NoiseFilter,
    ) -> Result<GrayImage, FinalizeError> {
        let field = self.confidence(options.boost_base);
        let mask = threshold_mask(&field, options.threshold);
        clean_mask(mask, options, noise_filter)
    }
}

/// Optional noise filtering and smoothing of a thresholded mask.
pub fn clean_mask(
    mask: GrayImage,
    options: &FinalizeOptions,
    noise_filter: &dyn NoiseFilter,
) -> Result<GrayImage, FinalizeError> {
    let mut mask = mask;

    if let Some(noise) = options.noise {
        let filtered = noise_filter.filter(&mask, noise.eps, noise.min_samples)?;
        if filtered.dimensions() != mask.dimensions() {
            return Err(FinalizeError::MaskSizeMismatch {
                expected_w: mask.width(),
                expected_h: mask.height(),
                actual_w: filtered.width(),
                actual_h: filtered.height(),
            });
        }
        mask = filtered;
    }

    if let Some(smoothing) = options.smoothing
        && mask.as_raw().iter().any(|&v| v > 0)
    {
        mask = ShapeSmoother::new(smoothing).apply(&mask);
    }

    Ok(mask)
}
