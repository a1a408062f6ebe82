// ============================================================================
// RASTER I/O: transport encoding of crop images and masks
// ============================================================================
//
// Crop images arrive as base64 strings, usually wrapped in a data URL
// (`data:image/png;base64,...`). Masks go back out as 8-bit grayscale PNG
// data URLs, which round-trip 0/255 content exactly.

use base64::{Engine as _, engine::general_purpose};
use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::CodecError;

/// Prefix put in front of every encoded mask.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Strip an optional `data:...,` header and base64-decode the rest.
fn decode_payload(data: &str) -> Result<Vec<u8>, CodecError> {
    let data = data.trim();
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, b64)| b64).unwrap_or(rest),
        None => data,
    };
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(general_purpose::STANDARD.decode(payload)?)
}

/// Decode a transport image into 8-bit RGB. Alpha is dropped.
pub fn decode_image(data: &str) -> Result<RgbImage, CodecError> {
    let bytes = decode_payload(data)?;
    let img = image::load_from_memory(&bytes).map_err(CodecError::Decode)?;
    Ok(img.to_rgb8())
}

/// Decode a transport image into 8-bit luma (used for masks).
pub fn decode_mask(data: &str) -> Result<GrayImage, CodecError> {
    let bytes = decode_payload(data)?;
    let img = image::load_from_memory(&bytes).map_err(CodecError::Decode)?;
    Ok(img.to_luma8())
}

/// Encode a mask as raw PNG bytes.
pub fn encode_png(mask: &GrayImage) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(mask.as_raw(), mask.width(), mask.height(), ColorType::L8)
        .map_err(CodecError::Encode)?;
    Ok(bytes)
}

/// Encode a mask as a PNG data URL.
pub fn encode_mask(mask: &GrayImage) -> Result<String, CodecError> {
    let bytes = encode_png(mask)?;
    let mut out = String::with_capacity(PNG_DATA_URL_PREFIX.len() + bytes.len() * 4 / 3 + 4);
    out.push_str(PNG_DATA_URL_PREFIX);
    general_purpose::STANDARD.encode_string(&bytes, &mut out);
    Ok(out)
}

/// Write a mask to disk as PNG.
pub fn write_mask_png(mask: &GrayImage, path: &Path) -> std::io::Result<()> {
    let bytes = encode_png(mask).map_err(std::io::Error::other)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&bytes)?;
    writer.flush()
}
