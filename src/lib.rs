//! MagicPen: merges per-crop segmentation predictions from a brush stroke
//! into a single binary mask over the full canvas.
//!
//! The pipeline is place -> accumulate -> average -> boost -> threshold ->
//! noise filter -> smooth. [`service::MagicPenService`] wraps it in the two
//! request operations, `predict_crops` and `predict_single_crop`.

pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod logger;
pub mod merge;
pub mod ops;
pub mod service;

pub use config::{FinalizeOptions, MergeOptions, NoiseOptions, SmoothOptions};
pub use merge::{AccumulatorGrid, Canvas, CropGeometry, CropPlacement, MergeSession};
pub use ops::ai::{IntensityPredictor, Predictor, ProbabilityMap, RawPrediction};
pub use ops::morphology::ShapeSmoother;
pub use ops::noise::{DbscanFilter, NoiseFilter};
pub use service::{MagicPenService, Route, ServiceResponse};
