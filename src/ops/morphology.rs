// ============================================================================
// MORPHOLOGY: shape smoothing for binary selection masks
// ============================================================================
//
// Closing fills pinholes and bridges fragments, opening strips spurs and
// specks, and a small median pass cleans whatever single pixels remain.
// Masks are handled as 0/1 byte planes internally and as 0/255 GrayImages at
// the boundary.

use image::GrayImage;
use rayon::prelude::*;

use crate::config::SmoothOptions;

/// Binary structuring element, stored as offsets from its anchor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuringElement {
    size: usize,
    offsets: Vec<(isize, isize)>,
}

impl StructuringElement {
    /// Elliptical element inscribed in a `size × size` square, built the
    /// same way OpenCV's `MORPH_ELLIPSE` is (size 3 yields a cross).
    pub fn ellipse(size: usize) -> Self {
        let size = size.max(1);
        let r = (size / 2) as isize;
        let c = (size / 2) as isize;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };

        let mut offsets = Vec::new();
        for i in 0..size as isize {
            let dy = i - r;
            if dy.abs() > r {
                continue;
            }
            let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as isize;
            let j1 = (c - dx).max(0);
            let j2 = (c + dx + 1).min(size as isize);
            for j in j1..j2 {
                offsets.push((j - c, dy));
            }
        }

        Self { size, offsets }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Row-major 0/1 rendering of the element.
    pub fn to_grid(&self) -> Vec<u8> {
        let half = (self.size / 2) as isize;
        let mut grid = vec![0u8; self.size * self.size];
        for &(dx, dy) in &self.offsets {
            let idx = (dy + half) as usize * self.size + (dx + half) as usize;
            grid[idx] = 1;
        }
        grid
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MorphOp {
    Dilate,
    Erode,
}

/// A 0/1 byte plane.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Plane {
    fn from_mask(mask: &GrayImage) -> Self {
        let (w, h) = mask.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            data: mask.as_raw().iter().map(|&v| (v > 127) as u8).collect(),
        }
    }

    fn into_mask(self) -> GrayImage {
        let (w, h) = (self.width as u32, self.height as u32);
        let pixels: Vec<u8> = self.data.into_iter().map(|v| v * 255).collect();
        GrayImage::from_raw(w, h, pixels).unwrap_or_else(|| GrayImage::new(w, h))
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width as isize || y >= self.height as isize {
            None
        } else {
            Some(self.data[y as usize * self.width + x as usize])
        }
    }
}

/// One dilation or erosion pass. Neighbors outside the plane are ignored,
/// so the canvas edge neither grows nor eats the mask.
fn morph_pass(src: &Plane, kernel: &StructuringElement, op: MorphOp) -> Plane {
    let mut out = vec![0u8; src.data.len()];
    if src.width == 0 {
        return Plane { data: out, ..*src };
    }

    out.par_chunks_mut(src.width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let neighbors = kernel
                    .offsets
                    .iter()
                    .filter_map(|&(dx, dy)| src.at(x as isize + dx, y as isize + dy));
                *px = match op {
                    MorphOp::Dilate => neighbors.max().unwrap_or(0),
                    MorphOp::Erode => neighbors.min().unwrap_or(1),
                };
            }
        });

    Plane {
        width: src.width,
        height: src.height,
        data: out,
    }
}

fn repeat(src: Plane, kernel: &StructuringElement, op: MorphOp, times: u32) -> Plane {
    (0..times).fold(src, |plane, _| morph_pass(&plane, kernel, op))
}

/// Closing: `iterations` dilations followed by `iterations` erosions.
fn close(src: Plane, kernel: &StructuringElement, iterations: u32) -> Plane {
    let dilated = repeat(src, kernel, MorphOp::Dilate, iterations);
    repeat(dilated, kernel, MorphOp::Erode, iterations)
}

/// Opening: `iterations` erosions followed by `iterations` dilations.
fn open(src: Plane, kernel: &StructuringElement, iterations: u32) -> Plane {
    let eroded = repeat(src, kernel, MorphOp::Erode, iterations);
    repeat(eroded, kernel, MorphOp::Dilate, iterations)
}

/// Median of a binary plane with a `window × window` box and replicated
/// borders. For 0/1 data the median is the window majority.
fn median(src: &Plane, window: usize) -> Plane {
    let half = (window / 2) as isize;
    let total = window * window;
    let (w, h) = (src.width as isize, src.height as isize);
    let mut out = vec![0u8; src.data.len()];
    if src.width == 0 {
        return Plane { data: out, ..*src };
    }

    out.par_chunks_mut(src.width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let mut ones = 0usize;
                for dy in -half..=half {
                    let sy = (y as isize + dy).clamp(0, h - 1) as usize;
                    for dx in -half..=half {
                        let sx = (x as isize + dx).clamp(0, w - 1) as usize;
                        ones += src.data[sy * src.width + sx] as usize;
                    }
                }
                *px = (ones * 2 > total) as u8;
            }
        });

    Plane {
        width: src.width,
        height: src.height,
        data: out,
    }
}

/// Closing, opening and median filtering with one shared kernel.
#[derive(Clone, Debug)]
pub struct ShapeSmoother {
    kernel: StructuringElement,
    iterations: u32,
    median_window: Option<usize>,
}

impl ShapeSmoother {
    pub fn new(options: SmoothOptions) -> Self {
        let size = options.kernel_size.max(1) as usize;
        Self {
            kernel: StructuringElement::ellipse(size),
            iterations: options.iterations,
            median_window: (size >= 3).then_some(size.min(5)),
        }
    }

    pub fn kernel(&self) -> &StructuringElement {
        &self.kernel
    }

    /// Smooth a 0/255 mask. Masks without foreground come back unchanged.
    pub fn apply(&self, mask: &GrayImage) -> GrayImage {
        if !mask.as_raw().iter().any(|&v| v > 0) {
            return mask.clone();
        }

        let plane = Plane::from_mask(mask);
        let closed = close(plane, &self.kernel, self.iterations);
        let mut opened = open(closed, &self.kernel, 1);
        if let Some(window) = self.median_window {
            opened = median(&opened, window);
        }
        opened.into_mask()
    }
}

/// Convenience wrapper for one-off smoothing.
pub fn smooth_mask(mask: &GrayImage, options: SmoothOptions) -> GrayImage {
    ShapeSmoother::new(options).apply(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(width: usize, height: usize, on: &[(usize, usize)]) -> Plane {
        let mut data = vec![0u8; width * height];
        for &(x, y) in on {
            data[y * width + x] = 1;
        }
        Plane {
            width,
            height,
            data,
        }
    }

    fn square_mask(size: u32, from: u32, to: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = (from..to).contains(&x) && (from..to).contains(&y);
            image::Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_ellipse_shapes() {
        assert_eq!(StructuringElement::ellipse(1).to_grid(), vec![1]);

        #[rustfmt::skip]
        let cross = vec![
            0, 1, 0,
            1, 1, 1,
            0, 1, 0,
        ];
        assert_eq!(StructuringElement::ellipse(3).to_grid(), cross);

        #[rustfmt::skip]
        let five = vec![
            0, 0, 1, 0, 0,
            1, 1, 1, 1, 1,
            1, 1, 1, 1, 1,
            1, 1, 1, 1, 1,
            0, 0, 1, 0, 0,
        ];
        assert_eq!(StructuringElement::ellipse(5).to_grid(), five);
    }

    #[test]
    fn test_closing_fills_pinhole() {
        let mut on = Vec::new();
        for y in 2..7 {
            for x in 2..7 {
                if (x, y) != (4, 4) {
                    on.push((x, y));
                }
            }
        }
        let src = plane(9, 9, &on);
        let closed = close(src, &StructuringElement::ellipse(3), 1);
        assert_eq!(closed.data[4 * 9 + 4], 1);
        // Outside stays background.
        assert_eq!(closed.data[0], 0);
    }

    #[test]
    fn test_closing_iterations_dilate_then_erode() {
        // Two blocks four columns apart: columns 2..8 and 12..18, rows 2..10.
        let mut on = Vec::new();
        for y in 2..10 {
            for x in (2..8).chain(12..18) {
                on.push((x, y));
            }
        }
        let src = plane(20, 12, &on);
        let cross = StructuringElement::ellipse(3);
        let gap = |p: &Plane| (8..12).all(|x| p.data[6 * 20 + x] == 1);

        // Two dilations reach across; one does not.
        assert!(gap(&close(src.clone(), &cross, 2)));
        assert!(!gap(&close(src.clone(), &cross, 1)));

        // Repeating a single closing is not the same thing.
        let twice = close(close(src, &cross, 1), &cross, 1);
        assert!(!gap(&twice));
    }

    #[test]
    fn test_median_window_capped_at_five() {
        let window = |kernel_size| {
            ShapeSmoother::new(SmoothOptions {
                kernel_size,
                iterations: 1,
            })
            .median_window
        };
        assert_eq!(window(1), None);
        assert_eq!(window(3), Some(3));
        assert_eq!(window(5), Some(5));
        assert_eq!(window(7), Some(5));
        assert_eq!(window(11), Some(5));
    }

    #[test]
    fn test_opening_removes_lone_pixel() {
        let src = plane(7, 7, &[(3, 3)]);
        let opened = open(src, &StructuringElement::ellipse(3), 1);
        assert!(opened.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_median_removes_speck_and_keeps_block() {
        let mut on = vec![(0, 6)];
        for y in 1..5 {
            for x in 1..5 {
                on.push((x, y));
            }
        }
        let src = plane(7, 7, &on);
        let filtered = median(&src, 3);
        assert_eq!(filtered.data[6 * 7], 0);
        assert_eq!(filtered.data[2 * 7 + 2], 1);
    }

    #[test]
    fn test_edges_do_not_erode() {
        let full = GrayImage::from_pixel(6, 5, image::Luma([255]));
        let smoothed = smooth_mask(&full, SmoothOptions::default());
        assert_eq!(smoothed, full);
    }

    #[test]
    fn test_empty_mask_unchanged() {
        let empty = GrayImage::new(8, 8);
        assert_eq!(smooth_mask(&empty, SmoothOptions::default()), empty);
    }

    #[test]
    fn test_smoothing_removes_specks_keeps_body() {
        let mut mask = square_mask(40, 10, 30);
        mask.put_pixel(2, 2, image::Luma([255]));
        mask.put_pixel(37, 36, image::Luma([255]));
        mask.put_pixel(20, 20, image::Luma([0]));

        let smoothed = smooth_mask(&mask, SmoothOptions::default());
        assert_eq!(smoothed.get_pixel(2, 2)[0], 0);
        assert_eq!(smoothed.get_pixel(37, 36)[0], 0);
        assert_eq!(smoothed.get_pixel(20, 20)[0], 255);
        assert_eq!(smoothed.get_pixel(15, 15)[0], 255);
        assert!(smoothed.as_raw().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn test_kernel_size_one_skips_median() {
        let smoother = ShapeSmoother::new(SmoothOptions {
            kernel_size: 1,
            iterations: 2,
        });
        assert_eq!(smoother.kernel().size(), 1);
        let mask = square_mask(10, 3, 6);
        // A single-pixel kernel is the identity for every stage.
        assert_eq!(smoother.apply(&mask), mask);
    }
}
