// ============================================================================
// ERRORS: one enum per failure domain
// ============================================================================

use thiserror::Error;

/// A crop could not be placed onto the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error(
        "prediction is {actual_w}x{actual_h} but the crop declares {declared_w}x{declared_h}"
    )]
    PredictionTooSmall {
        declared_w: usize,
        declared_h: usize,
        actual_w: usize,
        actual_h: usize,
    },
}

/// Transport image decode / encode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode mask to PNG: {0}")]
    Encode(image::ImageError),
    #[error("image payload is empty")]
    Empty,
}

/// Failures raised by a [`crate::ops::ai::Predictor`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("unsupported prediction mode '{0}'")]
    UnsupportedMode(String),
    #[error("prediction raster is empty")]
    EmptyOutput,
    #[error("prediction raster has {len} values, expected {width}x{height}")]
    ShapeMismatch {
        width: usize,
        height: usize,
        len: usize,
    },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Why a single crop was skipped during a batch merge.
#[derive(Debug, Error)]
pub enum CropError {
    #[error("no image data provided")]
    MissingImage,
    #[error("missing crop field '{0}'")]
    MissingField(&'static str),
    #[error("invalid crop size {width}x{height}")]
    InvalidGeometry { width: i64, height: i64 },
    #[error("crop at ({center_x}, {center_y}) is out of coordinate range")]
    OutOfRange { center_x: i64, center_y: i64 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

/// Failures raised by a [`crate::ops::noise::NoiseFilter`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoiseFilterError {
    #[error("eps must be a positive finite number, got {0}")]
    InvalidEps(f64),
    #[error("min_samples must be at least 1")]
    InvalidMinSamples,
}

/// Failures in the post-accumulation stages. Never carries a partial mask.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("noise filter failed: {0}")]
    NoiseFilter(#[from] NoiseFilterError),
    #[error("noise filter returned a {actual_w}x{actual_h} mask for a {expected_w}x{expected_h} canvas")]
    MaskSizeMismatch {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Invalid request options, rejected before any processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    #[error("brush_multiplier_base must be a finite number >= 0, got {0}")]
    BoostBase(f64),
    #[error("threshold must be within [0, 1], got {0}")]
    Threshold(f64),
    #[error("morph_kernel_size must be an odd number >= 1, got {0}")]
    KernelSize(u32),
    #[error("db_eps must be a positive finite number, got {0}")]
    NoiseEps(f64),
    #[error("db_min_samples must be at least 1")]
    NoiseMinSamples,
}
