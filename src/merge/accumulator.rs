//! Canvas-sized accumulation buffers for one merge session.

use super::placement::{Canvas, CropGeometry, clip_to_canvas};
use crate::error::PlacementError;
use crate::ops::ai::ProbabilityMap;

/// A crop's declared position together with its normalized prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct CropPlacement {
    pub geometry: CropGeometry,
    pub prediction: ProbabilityMap,
}

impl CropPlacement {
    pub fn new(geometry: CropGeometry, prediction: ProbabilityMap) -> Self {
        Self {
            geometry,
            prediction,
        }
    }
}

/// Running per-pixel sums and counters. All buffers are row-major and
/// canvas-shaped.
///
/// `coverage` and `brush_count` are incremented together today. They stay
/// separate so brush weighting can diverge from plain coverage later.
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulatorGrid {
    canvas: Canvas,
    sum: Vec<f64>,
    coverage: Vec<u32>,
    brush_count: Vec<u32>,
}

impl AccumulatorGrid {
    pub fn new(canvas: Canvas) -> Self {
        let n = canvas.area();
        Self {
            canvas,
            sum: vec![0.0; n],
            coverage: vec![0; n],
            brush_count: vec![0; n],
        }
    }

    #[inline]
    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    pub fn coverage(&self) -> &[u32] {
        &self.coverage
    }

    pub fn brush_count(&self) -> &[u32] {
        &self.brush_count
    }

    /// Add one crop's prediction to the grid.
    ///
    /// Returns `Ok(false)` when the crop does not overlap the canvas; the
    /// grid is untouched in that case. A prediction smaller than the
    /// declared crop is rejected before anything is written.
    pub fn add(&mut self, crop: &CropPlacement) -> Result<bool, PlacementError> {
        let geom = &crop.geometry;
        let pred = &crop.prediction;

        let declared_w = geom.width.max(0) as usize;
        let declared_h = geom.height.max(0) as usize;
        if pred.width() < declared_w || pred.height() < declared_h {
            return Err(PlacementError::PredictionTooSmall {
                declared_w,
                declared_h,
                actual_w: pred.width(),
                actual_h: pred.height(),
            });
        }

        let Some(overlap) = clip_to_canvas(geom, self.canvas) else {
            return Ok(false);
        };

        let (dest, src) = (overlap.dest, overlap.src);
        for row in 0..dest.height {
            let src_row = &pred.row(src.y + row)[src.x..src.x + src.width];
            let start = (dest.y + row) * self.canvas.width + dest.x;

            for (offset, &p) in src_row.iter().enumerate() {
                let i = start + offset;
                self.sum[i] += p as f64;
                self.coverage[i] += 1;
                self.brush_count[i] += 1;
            }
        }

        Ok(true)
    }
}
