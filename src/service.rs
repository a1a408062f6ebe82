// ============================================================================
// SERVICE: the two magic pen request operations
// ============================================================================
//
// `predict_crops` merges many brushed crops into one canvas mask;
// `predict_single_crop` runs one crop through the same pipeline on its own.
// Both take a JSON body and always answer with a status code plus a JSON
// body, whatever happens inside.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MergeOptions;
use crate::error::{CropError, FinalizeError, OptionsError};
use crate::io::{decode_image, encode_mask};
use crate::merge::{Canvas, CropGeometry, CropPlacement, MergeSession};
use crate::ops::ai::{IntensityPredictor, Predictor};
use crate::ops::noise::{DbscanFilter, NoiseFilter};

// ============================================================================
// Wire types
// ============================================================================

/// One brushed crop as sent by the drawing client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CropRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, alias = "image")]
    pub image_base64: Option<String>,
    #[serde(default, rename = "centerX", deserialize_with = "lenient_int")]
    pub center_x: Option<i64>,
    #[serde(default, rename = "centerY", deserialize_with = "lenient_int")]
    pub center_y: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub width: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub height: Option<i64>,
    #[serde(default, alias = "canvasWidth")]
    pub canvas_width: Option<u32>,
    #[serde(default, alias = "canvasHeight")]
    pub canvas_height: Option<u32>,
    /// Client-side capture time; informational only.
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Stroke length at capture; informational only.
    #[serde(default)]
    pub line_distance: Option<f64>,
}

impl CropRecord {
    /// Validated crop geometry.
    pub fn geometry(&self) -> Result<CropGeometry, CropError> {
        let center_x = self.center_x.ok_or(CropError::MissingField("centerX"))?;
        let center_y = self.center_y.ok_or(CropError::MissingField("centerY"))?;
        let width = self.width.ok_or(CropError::MissingField("width"))?;
        let height = self.height.ok_or(CropError::MissingField("height"))?;
        if width <= 0 || height <= 0 {
            return Err(CropError::InvalidGeometry { width, height });
        }
        let geometry = CropGeometry::new(center_x, center_y, width, height);
        if geometry.bounds().is_none() {
            return Err(CropError::OutOfRange { center_x, center_y });
        }
        Ok(geometry)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub crops: Vec<CropRecord>,
    #[serde(flatten)]
    pub options: MergeOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SingleCropRequest {
    #[serde(default, alias = "image")]
    pub image_base64: Option<String>,
    #[serde(flatten)]
    pub geometry: CropInfo,
    #[serde(flatten)]
    pub options: MergeOptions,
}

/// Crop geometry echoed back by the single-crop operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropInfo {
    #[serde(default, rename = "centerX", deserialize_with = "lenient_int")]
    pub center_x: Option<i64>,
    #[serde(default, rename = "centerY", deserialize_with = "lenient_int")]
    pub center_y: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub width: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub height: Option<i64>,
}

/// A crop that was skipped, with the reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CropFailure {
    pub crop_id: Value,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub status: String,
    pub message: String,
    pub merged_mask_base64: String,
    pub num_crops_processed: usize,
    pub canvas_dimensions: [u32; 2],
    pub mode: String,
    pub brush_multiplier_base: f64,
    pub threshold: f64,
    pub morphology_applied: bool,
    pub morph_kernel_size: Option<u32>,
    pub morph_iterations: Option<u32>,
    pub dbscan_applied: bool,
    pub db_eps: Option<f64>,
    pub db_min_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_crops: Vec<CropFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_failed_crops: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SingleCropResponse {
    pub status: String,
    pub message: String,
    pub prediction_base64: String,
    pub crop_info: CropInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_crops: Vec<CropFailure>,
}

/// Which operation a request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    PredictCrops,
    PredictSingleCrop,
}

/// Status code plus JSON body, ready for any transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(e) => ServiceError::Internal(e.to_string()).into_response(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Request-level failure. Per-crop problems never end up here unless every
/// crop failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("No crops were successfully processed")]
    NoCropsProcessed(Vec<CropFailure>),
    #[error("Error generating final prediction: {0}")]
    Finalize(FinalizeError),
    #[error("Error processing single crop: {0}")]
    SingleCrop(String),
    #[error("Server error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NoCropsProcessed(_)
            | ServiceError::Finalize(_)
            | ServiceError::SingleCrop(_)
            | ServiceError::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> ServiceResponse {
        let status = self.status();
        let message = self.to_string();
        let failed_crops = match self {
            ServiceError::NoCropsProcessed(failed) => failed,
            _ => Vec::new(),
        };
        let body = ErrorBody {
            status: "error".to_string(),
            message,
            failed_crops,
        };
        ServiceResponse {
            status,
            body: serde_json::to_value(&body).unwrap_or(Value::Null),
        }
    }
}

impl From<OptionsError> for ServiceError {
    fn from(e: OptionsError) -> Self {
        ServiceError::BadRequest(format!("Invalid options: {}", e))
    }
}

// ============================================================================
// Service
// ============================================================================

/// Result of preparing one crop for accumulation.
pub type CropOutcome = Result<CropPlacement, CropFailure>;

/// Request handler. Holds only shared, immutable collaborators, so one
/// instance serves any number of concurrent requests.
#[derive(Clone)]
pub struct MagicPenService {
    predictor: Arc<dyn Predictor>,
    noise_filter: Arc<dyn NoiseFilter>,
}

impl Default for MagicPenService {
    fn default() -> Self {
        Self::new(Arc::new(IntensityPredictor), Arc::new(DbscanFilter))
    }
}

impl MagicPenService {
    pub fn new(predictor: Arc<dyn Predictor>, noise_filter: Arc<dyn NoiseFilter>) -> Self {
        Self {
            predictor,
            noise_filter,
        }
    }

    /// Handle a raw request body. Never panics; every outcome is a response.
    pub fn handle(&self, route: Route, body: &str) -> ServiceResponse {
        match serde_json::from_str::<Value>(body) {
            Ok(payload) => self.handle_value(route, payload),
            Err(_) => ServiceError::BadRequest("Request must be JSON".to_string()).into_response(),
        }
    }

    /// Handle an already-parsed request body.
    pub fn handle_value(&self, route: Route, payload: Value) -> ServiceResponse {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| match route {
            Route::PredictCrops => self
                .predict_crops(request_id, payload)
                .map(|r| ServiceResponse::ok(&r)),
            Route::PredictSingleCrop => self
                .predict_single_crop(request_id, payload)
                .map(|r| ServiceResponse::ok(&r)),
        }));

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if e.status() >= 500 {
                    log::error!("[{}] {:?} failed: {}", request_id, route, e);
                } else {
                    log::warn!("[{}] {:?} rejected: {}", request_id, route, e);
                }
                e.into_response()
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                log::error!("[{}] {:?} panicked: {}", request_id, route, msg);
                ServiceError::Internal(msg).into_response()
            }
        };

        log::info!(
            "[{}] {:?} -> {} ({:.0}ms)",
            request_id,
            route,
            response.status,
            started.elapsed().as_secs_f64() * 1000.0
        );
        response
    }

    /// Merge every crop of a batch into one canvas mask.
    pub fn predict_crops(
        &self,
        request_id: Uuid,
        payload: Value,
    ) -> Result<MergeResponse, ServiceError> {
        let request: MergeRequest = parse_payload(payload)?;
        request.options.validate()?;

        let first = request
            .crops
            .first()
            .ok_or_else(|| ServiceError::BadRequest("No crops provided".to_string()))?;
        let canvas = match (first.canvas_width, first.canvas_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Canvas::new(w as usize, h as usize),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Canvas dimensions not provided in crop data".to_string(),
                ));
            }
        };

        let options = &request.options;
        log::info!(
            "[{}] predict_crops: {} crops on {}x{} canvas, mode '{}'",
            request_id,
            request.crops.len(),
            canvas.width,
            canvas.height,
            options.mode
        );

        // Decode and inference are independent per crop. Collecting keeps
        // request order, and accumulation below stays serial so the sums do
        // not depend on scheduling.
        let outcomes: Vec<CropOutcome> = request
            .crops
            .par_iter()
            .enumerate()
            .map(|(index, record)| {
                self.prepare_crop(record, &options.mode)
                    .map_err(|e| crop_failure(index, record, &e))
            })
            .collect();

        let mut session = MergeSession::new(canvas);
        let mut processed = 0usize;
        let mut failed_crops = Vec::new();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let result = outcome.and_then(|placement| {
                session
                    .add_crop(&placement)
                    .map_err(|e| crop_failure(index, &request.crops[index], &e.into()))
            });
            match result {
                Ok(_) => processed += 1,
                Err(failure) => {
                    log::warn!(
                        "[{}] crop {} skipped: {}",
                        request_id,
                        failure.crop_id,
                        failure.error
                    );
                    failed_crops.push(failure);
                }
            }
        }

        if processed == 0 {
            return Err(ServiceError::NoCropsProcessed(failed_crops));
        }

        let finalize = options.finalize_options();
        let mask = session
            .finalize(&finalize, self.noise_filter.as_ref())
            .map_err(ServiceError::Finalize)?;
        let merged_mask_base64 = encode_mask(&mask)
            .map_err(|e| ServiceError::Finalize(FinalizeError::Codec(e)))?;

        let num_failed = failed_crops.len();
        Ok(MergeResponse {
            status: "success".to_string(),
            message: format!(
                "Successfully processed {} out of {} crops",
                processed,
                request.crops.len()
            ),
            merged_mask_base64,
            num_crops_processed: processed,
            canvas_dimensions: [canvas.width as u32, canvas.height as u32],
            mode: options.mode.clone(),
            brush_multiplier_base: options.brush_multiplier_base,
            threshold: options.threshold,
            morphology_applied: options.apply_morphology,
            morph_kernel_size: options.apply_morphology.then_some(options.morph_kernel_size),
            morph_iterations: options.apply_morphology.then_some(options.morph_iterations),
            dbscan_applied: options.apply_dbscan,
            db_eps: options.apply_dbscan.then_some(options.db_eps),
            db_min_samples: options.apply_dbscan.then_some(options.db_min_samples),
            failed_crops,
            num_failed_crops: (num_failed > 0).then_some(num_failed),
        })
    }

    /// Predict one crop on its own canvas, without merging.
    pub fn predict_single_crop(
        &self,
        request_id: Uuid,
        payload: Value,
    ) -> Result<SingleCropResponse, ServiceError> {
        let request: SingleCropRequest = parse_payload(payload)?;
        request.options.validate()?;

        let data = request
            .image_base64
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("No image data provided".to_string()))?;

        let image = decode_image(data).map_err(single_crop_error)?;
        let prediction = self
            .predictor
            .predict(&image, &request.options.mode)
            .and_then(|raw| raw.normalize())
            .map_err(single_crop_error)?;

        log::info!(
            "[{}] predict_single_crop: {}x{} prediction, mode '{}'",
            request_id,
            prediction.width(),
            prediction.height(),
            request.options.mode
        );

        // The crop covers its own canvas exactly, so the merge pipeline
        // reduces to threshold -> noise filter -> smooth.
        let (w, h) = (prediction.width(), prediction.height());
        let mut session = MergeSession::new(Canvas::new(w, h));
        let geometry = CropGeometry::new((w / 2) as i64, (h / 2) as i64, w as i64, h as i64);
        session
            .add_crop(&CropPlacement::new(geometry, prediction))
            .map_err(single_crop_error)?;

        let mask = session
            .finalize(
                &request.options.finalize_options(),
                self.noise_filter.as_ref(),
            )
            .map_err(single_crop_error)?;
        let prediction_base64 = encode_mask(&mask).map_err(single_crop_error)?;

        Ok(SingleCropResponse {
            status: "success".to_string(),
            message: "Single crop prediction completed".to_string(),
            prediction_base64,
            crop_info: request.geometry,
        })
    }

    /// Decode, predict and normalize one crop.
    fn prepare_crop(&self, record: &CropRecord, mode: &str) -> Result<CropPlacement, CropError> {
        let geometry = record.geometry()?;
        let data = record
            .image_base64
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(CropError::MissingImage)?;
        let image = decode_image(data)?;
        let prediction = self.predictor.predict(&image, mode)?.normalize()?;
        Ok(CropPlacement::new(geometry, prediction))
    }
}

/// Integer crop coordinate. Fractional values are truncated toward zero.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrFloat {
        Int(i64),
        Float(f64),
    }

    match Option::<IntOrFloat>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrFloat::Int(v)) => Ok(Some(v)),
        Some(IntOrFloat::Float(v)) => {
            let t = v.trunc();
            if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
                Ok(Some(t as i64))
            } else {
                Err(serde::de::Error::custom(format!(
                    "coordinate {} is out of range",
                    v
                )))
            }
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ServiceError> {
    if !payload.is_object() {
        return Err(ServiceError::BadRequest("Request must be JSON".to_string()));
    }
    serde_json::from_value(payload)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid request payload: {}", e)))
}

fn single_crop_error(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::SingleCrop(e.to_string())
}

fn crop_failure(index: usize, record: &CropRecord, error: &CropError) -> CropFailure {
    CropFailure {
        crop_id: record.id.clone().unwrap_or_else(|| Value::from(index)),
        error: error.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected failure".to_string()
    }
}
