use std::sync::Arc;

use image::{GrayImage, Luma, RgbImage};
use serde_json::{Value, json};

use magicpen::error::PredictError;
use magicpen::io::{decode_mask, encode_mask};
use magicpen::{DbscanFilter, MagicPenService, Predictor, RawPrediction, Route};

/// Crop image of the given size, white where `on` says so.
fn crop_image(w: u32, h: u32, on: impl Fn(u32, u32) -> bool) -> String {
    let img = GrayImage::from_fn(w, h, |x, y| Luma([if on(x, y) { 255 } else { 0 }]));
    encode_mask(&img).unwrap()
}

fn white_crop(id: i64, cx: i64, cy: i64, size: u32) -> Value {
    json!({
        "id": id,
        "image_base64": crop_image(size, size, |_, _| true),
        "centerX": cx,
        "centerY": cy,
        "width": size,
        "height": size,
        "canvas_width": 64,
        "canvas_height": 64,
        "timestamp": 1700000000000.0,
        "line_distance": 12.5
    })
}

fn mask_of(body: &Value, key: &str) -> GrayImage {
    decode_mask(body[key].as_str().unwrap()).unwrap()
}

fn count_on(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v == 255).count()
}

#[test]
fn test_merge_end_to_end() {
    let service = MagicPenService::default();
    let request = json!({
        "crops": [white_crop(1, 20, 20, 16), white_crop(2, 24, 20, 16)],
    });
    let response = service.handle(Route::PredictCrops, &request.to_string());
    assert_eq!(response.status, 200, "{}", response.body);

    let body = &response.body;
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Successfully processed 2 out of 2 crops");
    assert_eq!(body["num_crops_processed"], 2);
    assert_eq!(body["canvas_dimensions"], json!([64, 64]));
    assert_eq!(body["mode"], "normal");
    assert_eq!(body["brush_multiplier_base"], 5.0);
    assert_eq!(body["morphology_applied"], true);
    assert_eq!(body["morph_kernel_size"], 3);
    assert_eq!(body["dbscan_applied"], true);
    assert_eq!(body["db_min_samples"], 5);
    assert!(body.get("failed_crops").is_none());
    assert!(body.get("num_failed_crops").is_none());

    let mask = mask_of(body, "merged_mask_base64");
    assert_eq!(mask.dimensions(), (64, 64));
    assert_eq!(mask.get_pixel(22, 20)[0], 255);
    assert_eq!(mask.get_pixel(60, 60)[0], 0);
    assert!(mask.as_raw().iter().all(|&v| v == 0 || v == 255));
}

#[test]
fn test_merge_is_deterministic() {
    let service = MagicPenService::default();
    let crops: Vec<Value> = (0..12)
        .map(|i| white_crop(i, 10 + i * 3, 30 + (i % 3) * 2, 10))
        .collect();
    let request = json!({ "crops": crops }).to_string();

    let a = service.handle(Route::PredictCrops, &request);
    let b = service.handle(Route::PredictCrops, &request);
    assert_eq!(a.status, 200);
    assert_eq!(a.body["merged_mask_base64"], b.body["merged_mask_base64"]);
}

#[test]
fn test_missing_crops_and_canvas() {
    let service = MagicPenService::default();

    let response = service.handle(Route::PredictCrops, r#"{"mode": "normal"}"#);
    assert_eq!(response.status, 400);
    assert_eq!(response.message(), Some("No crops provided"));

    let mut crop = white_crop(1, 10, 10, 8);
    crop.as_object_mut().unwrap().remove("canvas_height");
    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [crop] }).to_string(),
    );
    assert_eq!(response.status, 400);
    assert_eq!(
        response.message(),
        Some("Canvas dimensions not provided in crop data")
    );
}

#[test]
fn test_invalid_options_rejected() {
    let service = MagicPenService::default();
    let request = json!({
        "crops": [white_crop(1, 10, 10, 8)],
        "morph_kernel_size": 4
    });
    let response = service.handle(Route::PredictCrops, &request.to_string());
    assert_eq!(response.status, 400);
    assert!(response.message().unwrap().contains("morph_kernel_size"));
}

#[test]
fn test_all_crops_failing_is_500_with_reasons() {
    let service = MagicPenService::default();
    let mut bad = white_crop(7, 10, 10, 8);
    bad["image_base64"] = json!("data:image/png;base64,@@@@");
    let mut empty = white_crop(8, 20, 20, 8);
    empty["image_base64"] = json!("");

    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [bad, empty] }).to_string(),
    );
    assert_eq!(response.status, 500);
    assert_eq!(response.body["status"], "error");
    assert_eq!(
        response.message(),
        Some("No crops were successfully processed")
    );

    let failed = response.body["failed_crops"].as_array().unwrap();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0]["crop_id"], 7);
    assert!(failed[0]["error"].as_str().unwrap().contains("base64"));
    assert_eq!(failed[1]["crop_id"], 8);
    assert_eq!(failed[1]["error"], "no image data provided");
}

#[test]
fn test_partial_failure_reported_with_success() {
    let service = MagicPenService::default();
    let good = white_crop(1, 32, 32, 16);
    let mut bad = white_crop(2, 10, 10, 8);
    bad["width"] = json!(0);

    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [good, bad] }).to_string(),
    );
    assert_eq!(response.status, 200);
    assert_eq!(
        response.message(),
        Some("Successfully processed 1 out of 2 crops")
    );
    assert_eq!(response.body["num_crops_processed"], 1);
    assert_eq!(response.body["num_failed_crops"], 1);
    assert_eq!(response.body["failed_crops"][0]["crop_id"], 2);
    assert_eq!(mask_of(&response.body, "merged_mask_base64").get_pixel(32, 32)[0], 255);
}

#[test]
fn test_crop_without_id_reported_by_index() {
    let service = MagicPenService::default();
    let good = white_crop(1, 32, 32, 16);
    let mut bad = white_crop(0, 10, 10, 8);
    let obj = bad.as_object_mut().unwrap();
    obj.remove("id");
    obj.remove("centerX");

    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [good, bad] }).to_string(),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body["failed_crops"][0]["crop_id"], 1);
    assert_eq!(
        response.body["failed_crops"][0]["error"],
        "missing crop field 'centerX'"
    );
}

#[test]
fn test_extreme_center_is_a_crop_failure() {
    let service = MagicPenService::default();
    let good = white_crop(1, 32, 32, 16);
    let mut extreme = white_crop(2, 0, 10, 8);
    extreme["centerX"] = json!(i64::MIN);

    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [good, extreme] }).to_string(),
    );
    assert_eq!(response.status, 200, "{}", response.body);
    assert_eq!(response.body["num_crops_processed"], 1);
    assert_eq!(response.body["num_failed_crops"], 1);
    assert_eq!(response.body["failed_crops"][0]["crop_id"], 2);
    assert!(
        response.body["failed_crops"][0]["error"]
            .as_str()
            .unwrap()
            .contains("out of coordinate range")
    );
    assert_eq!(mask_of(&response.body, "merged_mask_base64").get_pixel(32, 32)[0], 255);
}

#[test]
fn test_fractional_center_accepted() {
    let service = MagicPenService::default();
    let mut crop = white_crop(1, 0, 0, 16);
    crop["centerX"] = json!(32.6);
    crop["centerY"] = json!(32.2);

    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [crop], "apply_dbscan": false, "apply_morphology": false }).to_string(),
    );
    assert_eq!(response.status, 200, "{}", response.body);
    // Truncated to (32, 32): the crop spans 24..40 on both axes.
    let mask = mask_of(&response.body, "merged_mask_base64");
    assert_eq!(mask.get_pixel(24, 24)[0], 255);
    assert_eq!(mask.get_pixel(39, 39)[0], 255);
    assert_eq!(mask.get_pixel(40, 40)[0], 0);
    assert_eq!(count_on(&mask), 256);
}

#[test]
fn test_disabled_filters_give_raw_mask() {
    let service = MagicPenService::default();
    let dot = json!({
        "image_base64": crop_image(3, 3, |x, y| x == 1 && y == 1),
        "centerX": 10, "centerY": 10, "width": 3, "height": 3,
        "canvasWidth": 20, "canvasHeight": 20
    });

    let raw = json!({
        "crops": [dot.clone()],
        "apply_dbscan": false,
        "apply_morphology": false
    });
    let response = service.handle(Route::PredictCrops, &raw.to_string());
    assert_eq!(response.status, 200);
    assert_eq!(response.body["morph_kernel_size"], Value::Null);
    assert_eq!(response.body["db_eps"], Value::Null);
    let mask = mask_of(&response.body, "merged_mask_base64");
    assert_eq!(count_on(&mask), 1);
    assert_eq!(mask.get_pixel(10, 10)[0], 255);

    // The same lone pixel is noise once the filter runs.
    let filtered = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [dot] }).to_string(),
    );
    assert_eq!(filtered.status, 200);
    assert_eq!(count_on(&mask_of(&filtered.body, "merged_mask_base64")), 0);
}

#[test]
fn test_unsupported_mode_fails_every_crop() {
    let service = MagicPenService::default();
    let request = json!({
        "crops": [white_crop(1, 10, 10, 8)],
        "mode": "sketch"
    });
    let response = service.handle(Route::PredictCrops, &request.to_string());
    assert_eq!(response.status, 500);
    assert_eq!(
        response.body["failed_crops"][0]["error"],
        "unsupported prediction mode 'sketch'"
    );
}

#[test]
fn test_single_crop() {
    let service = MagicPenService::default();
    let request = json!({
        "image_base64": crop_image(8, 8, |x, _| x < 4),
        "centerX": 100,
        "centerY": 50,
        "width": 8,
        "height": 8,
        "apply_dbscan": false,
        "apply_morphology": false
    });
    let response = service.handle(Route::PredictSingleCrop, &request.to_string());
    assert_eq!(response.status, 200, "{}", response.body);
    assert_eq!(response.message(), Some("Single crop prediction completed"));
    assert_eq!(
        response.body["crop_info"],
        json!({"centerX": 100, "centerY": 50, "width": 8, "height": 8})
    );

    let mask = mask_of(&response.body, "prediction_base64");
    assert_eq!(mask.dimensions(), (8, 8));
    for (x, _, p) in mask.enumerate_pixels() {
        assert_eq!(p[0], if x < 4 { 255 } else { 0 });
    }
}

#[test]
fn test_single_crop_errors() {
    let service = MagicPenService::default();

    let response = service.handle(Route::PredictSingleCrop, r#"{"centerX": 3}"#);
    assert_eq!(response.status, 400);
    assert_eq!(response.message(), Some("No image data provided"));

    let response = service.handle(
        Route::PredictSingleCrop,
        r#"{"image_base64": "not-base64!!"}"#,
    );
    assert_eq!(response.status, 500);
    assert!(
        response
            .message()
            .unwrap()
            .starts_with("Error processing single crop:")
    );
}

/// Predictor that returns a raster half the size of its input.
struct ShrinkingPredictor;

impl Predictor for ShrinkingPredictor {
    fn predict(&self, image: &RgbImage, _mode: &str) -> Result<RawPrediction, PredictError> {
        let (w, h) = ((image.width() / 2).max(1), (image.height() / 2).max(1));
        Ok(RawPrediction::new(
            w as usize,
            h as usize,
            vec![1.0; (w * h) as usize],
        ))
    }
}

struct PanickingPredictor;

impl Predictor for PanickingPredictor {
    fn predict(&self, _image: &RgbImage, _mode: &str) -> Result<RawPrediction, PredictError> {
        panic!("model crashed");
    }
}

#[test]
fn test_undersized_prediction_is_a_crop_failure() {
    let service = MagicPenService::new(Arc::new(ShrinkingPredictor), Arc::new(DbscanFilter));
    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [white_crop(1, 10, 10, 8)] }).to_string(),
    );
    assert_eq!(response.status, 500);
    assert!(
        response.body["failed_crops"][0]["error"]
            .as_str()
            .unwrap()
            .contains("4x4")
    );
}

#[test]
fn test_panic_becomes_server_error() {
    let service = MagicPenService::new(Arc::new(PanickingPredictor), Arc::new(DbscanFilter));
    let response = service.handle(
        Route::PredictCrops,
        &json!({ "crops": [white_crop(1, 10, 10, 8)] }).to_string(),
    );
    assert_eq!(response.status, 500);
    assert!(response.message().unwrap().starts_with("Server error:"));

    // The service keeps working afterwards.
    let response = service.handle(Route::PredictCrops, "{}");
    assert_eq!(response.status, 400);
}
