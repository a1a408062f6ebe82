//! Crop placement: where a crop lands on the canvas and which part of its
//! prediction survives clipping.

use serde::{Deserialize, Serialize};

/// Canvas size for one merge session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Declared crop position in canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropGeometry {
    pub center_x: i64,
    pub center_y: i64,
    pub width: i64,
    pub height: i64,
}

impl CropGeometry {
    pub fn new(center_x: i64, center_y: i64, width: i64, height: i64) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
        }
    }

    /// Unclipped placement rectangle as `(start_x, start_y, end_x, end_y)`.
    /// Odd sizes put the extra pixel after the center. `None` when the
    /// rectangle does not fit in `i64` coordinates.
    pub fn bounds(&self) -> Option<(i64, i64, i64, i64)> {
        let start_x = self.center_x.checked_sub(self.width.div_euclid(2))?;
        let start_y = self.center_y.checked_sub(self.height.div_euclid(2))?;
        let end_x = start_x.checked_add(self.width)?;
        let end_y = start_y.checked_add(self.height)?;
        Some((start_x, start_y, end_x, end_y))
    }
}

/// Axis-aligned pixel rectangle with non-zero extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// The clipped part of a crop: `dest` on the canvas, `src` in the
/// prediction. Both rectangles have the same size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overlap {
    pub dest: PixelRect,
    pub src: PixelRect,
}

/// Clip a crop against the canvas. `None` means nothing lands on it.
pub fn clip_to_canvas(geometry: &CropGeometry, canvas: Canvas) -> Option<Overlap> {
    let (start_x, start_y, end_x, end_y) = geometry.bounds()?;

    let canvas_start_x = start_x.max(0);
    let canvas_start_y = start_y.max(0);
    let canvas_end_x = end_x.min(canvas.width as i64);
    let canvas_end_y = end_y.min(canvas.height as i64);

    let width = canvas_end_x - canvas_start_x;
    let height = canvas_end_y - canvas_start_y;
    if width <= 0 || height <= 0 {
        return None;
    }

    Some(Overlap {
        dest: PixelRect {
            x: canvas_start_x as usize,
            y: canvas_start_y as usize,
            width: width as usize,
            height: height as usize,
        },
        src: PixelRect {
            x: (canvas_start_x - start_x) as usize,
            y: (canvas_start_y - start_y) as usize,
            width: width as usize,
            height: height as usize,
        },
    })
}
