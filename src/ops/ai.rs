// ============================================================================
// AI OPERATIONS: inference handle and prediction rasters
// ============================================================================
//
// The segmentation model itself lives outside this crate. Everything here is
// the boundary the merge pipeline relies on: a `Predictor` that turns a crop
// image into a probability raster, and the normalization that maps raw model
// output into [0, 1].

use image::RgbImage;

use crate::error::PredictError;

/// Per-pixel foreground probabilities in [0, 1], row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ProbabilityMap {
    /// Wrap values that are already probabilities. Values are clamped to
    /// [0, 1].
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self, PredictError> {
        let mut map = Self::checked(width, height, data)?;
        for v in &mut map.data {
            *v = clamp_probability(*v);
        }
        Ok(map)
    }

    /// Normalize raw model output. Rasters whose maximum exceeds 1.0 are
    /// treated as 8-bit scale and divided by 255.
    pub fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Result<Self, PredictError> {
        let mut map = Self::checked(width, height, data)?;
        let byte_scale = !is_probability_space(&map.data);
        for v in &mut map.data {
            let p = if byte_scale { *v / 255.0 } else { *v };
            *v = clamp_probability(p);
        }
        Ok(map)
    }

    /// Uniform map, mostly useful in tests and previews.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![clamp_probability(value); width * height],
        }
    }

    fn checked(width: usize, height: usize, data: Vec<f32>) -> Result<Self, PredictError> {
        if data.is_empty() || width == 0 || height == 0 {
            return Err(PredictError::EmptyOutput);
        }
        if data.len() != width * height {
            return Err(PredictError::ShapeMismatch {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// One row of probabilities.
    #[inline]
    pub fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }
}

/// Model output as produced, before normalization. Values may be in
/// [0, 1] or in [0, 255].
#[derive(Clone, Debug, PartialEq)]
pub struct RawPrediction {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl RawPrediction {
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Self {
        Self {
            width,
            height,
            values,
        }
    }

    /// See [`ProbabilityMap::from_raw`].
    pub fn normalize(self) -> Result<ProbabilityMap, PredictError> {
        ProbabilityMap::from_raw(self.width, self.height, self.values)
    }
}

/// Whether every value already sits in probability space. NaN values are
/// skipped here and zeroed by [`clamp_probability`].
fn is_probability_space(data: &[f32]) -> bool {
    let max_val = data.iter().copied().fold(f32::MIN, f32::max);
    max_val <= 1.0
}

#[inline]
fn clamp_probability(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Inference service handle. Built once at process start and shared by
/// every request, so implementations must be thread safe.
pub trait Predictor: Send + Sync {
    /// Predict a foreground probability raster for one crop image.
    ///
    /// `mode` is the model mode requested by the client. Implementations
    /// reject modes they do not know with [`PredictError::UnsupportedMode`].
    /// The caller normalizes the returned raster.
    fn predict(&self, image: &RgbImage, mode: &str) -> Result<RawPrediction, PredictError>;
}

/// Luminance-based stand-in for a segmentation model.
///
/// `normal` treats bright pixels as foreground, `inverted` dark pixels.
/// Output is produced in 8-bit scale, like most exported segmentation models.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntensityPredictor;

impl Predictor for IntensityPredictor {
    fn predict(&self, image: &RgbImage, mode: &str) -> Result<RawPrediction, PredictError> {
        let invert = match mode {
            "normal" => false,
            "inverted" => true,
            other => return Err(PredictError::UnsupportedMode(other.to_string())),
        };

        let (w, h) = image.dimensions();
        let raw: Vec<f32> = image
            .pixels()
            .map(|p| {
                // Rec. 601 luma
                let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                if invert { 255.0 - luma } else { luma }
            })
            .collect();

        Ok(RawPrediction::new(w as usize, h as usize, raw))
    }
}
