// ============================================================================
// REQUEST OPTIONS: every recognized option, its default and its bounds
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

pub const DEFAULT_MODE: &str = "normal";
pub const DEFAULT_BOOST_BASE: f64 = 5.0;
pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_KERNEL_SIZE: u32 = 3;
pub const DEFAULT_ITERATIONS: u32 = 2;
pub const DEFAULT_NOISE_EPS: f64 = 10.0;
pub const DEFAULT_NOISE_MIN_SAMPLES: usize = 5;

/// Options shared by both request operations.
///
/// Field names follow the wire format the drawing client sends; the
/// camelCase aliases are accepted as well. Missing fields take the
/// defaults above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Model mode forwarded to the predictor.
    pub mode: String,
    /// Base of the brush multiplier: a pixel brushed `n` times is scaled
    /// by `base^(n-1)`.
    #[serde(alias = "boostBase")]
    pub brush_multiplier_base: f64,
    pub threshold: f64,
    #[serde(alias = "applyMorphology")]
    pub apply_morphology: bool,
    #[serde(alias = "morphKernelSize")]
    pub morph_kernel_size: u32,
    #[serde(alias = "morphIterations")]
    pub morph_iterations: u32,
    #[serde(alias = "applyNoiseFilter")]
    pub apply_dbscan: bool,
    #[serde(alias = "noiseEps")]
    pub db_eps: f64,
    #[serde(alias = "noiseMinSamples")]
    pub db_min_samples: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE.to_string(),
            brush_multiplier_base: DEFAULT_BOOST_BASE,
            threshold: DEFAULT_THRESHOLD,
            apply_morphology: true,
            morph_kernel_size: DEFAULT_KERNEL_SIZE,
            morph_iterations: DEFAULT_ITERATIONS,
            apply_dbscan: true,
            db_eps: DEFAULT_NOISE_EPS,
            db_min_samples: DEFAULT_NOISE_MIN_SAMPLES,
        }
    }
}

impl MergeOptions {
    /// Reject option values the pipeline cannot honor.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let base = self.brush_multiplier_base;
        if !base.is_finite() || base < 0.0 {
            return Err(OptionsError::BoostBase(base));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(OptionsError::Threshold(self.threshold));
        }
        if self.apply_morphology && (self.morph_kernel_size == 0 || self.morph_kernel_size % 2 == 0)
        {
            return Err(OptionsError::KernelSize(self.morph_kernel_size));
        }
        if self.apply_dbscan {
            if !self.db_eps.is_finite() || self.db_eps <= 0.0 {
                return Err(OptionsError::NoiseEps(self.db_eps));
            }
            if self.db_min_samples == 0 {
                return Err(OptionsError::NoiseMinSamples);
            }
        }
        Ok(())
    }

    /// Stage settings for the finalization pipeline.
    pub fn finalize_options(&self) -> FinalizeOptions {
        FinalizeOptions {
            boost_base: self.brush_multiplier_base,
            threshold: self.threshold,
            noise: self.apply_dbscan.then_some(NoiseOptions {
                eps: self.db_eps,
                min_samples: self.db_min_samples,
            }),
            smoothing: self.apply_morphology.then_some(SmoothOptions {
                kernel_size: self.morph_kernel_size,
                iterations: self.morph_iterations,
            }),
        }
    }
}

/// Density-based noise filter parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseOptions {
    /// Neighborhood radius in pixels.
    pub eps: f64,
    pub min_samples: usize,
}

/// Morphological smoothing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmoothOptions {
    /// Odd side length of the elliptical structuring element.
    pub kernel_size: u32,
    /// Closing iterations. Opening always runs once.
    pub iterations: u32,
}

impl Default for SmoothOptions {
    fn default() -> Self {
        Self {
            kernel_size: DEFAULT_KERNEL_SIZE,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Everything the post-accumulation stages need. `None` disables a stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinalizeOptions {
    pub boost_base: f64,
    pub threshold: f64,
    pub noise: Option<NoiseOptions>,
    pub smoothing: Option<SmoothOptions>,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        MergeOptions::default().finalize_options()
    }
}

impl FinalizeOptions {
    /// Average, boost and threshold only.
    pub fn raw(boost_base: f64, threshold: f64) -> Self {
        Self {
            boost_base,
            threshold,
            noise: None,
            smoothing: None,
        }
    }
}
