// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Recompression of captured frames before they go on the wire.
//!
//! Capability code hands over whatever the sensor produced (PNG, JPEG, any
//! size). This crate decodes it, downscales to the requested width, and
//! re-encodes so the base64 payload stays under the gateway's frame budget.
//!
//! ## Size limits
//! [`encode_jpeg_within`] lowers the JPEG quality step by step and then
//! shrinks the image until the encoded bytes fit in `max_bytes`. Camera
//! snapshots use [`MAX_SNAPSHOT_BYTES`] (5 MB).

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

pub use error::ImageError;

mod error;

/// Largest encoded snapshot the node will send.
pub const MAX_SNAPSHOT_BYTES: usize = 5 * 1024 * 1024;

/// Lowest JPEG quality tried before the image is shrunk instead.
const MIN_QUALITY: f64 = 0.3;
/// Multiplier applied to the quality on each over-budget attempt.
const QUALITY_STEP: f64 = 0.85;
/// Multiplier applied to the width once quality reductions are exhausted.
const SHRINK_STEP: f64 = 0.8;
/// Never shrink below this width.
const MIN_WIDTH: u32 = 64;

/// Output container of an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Short name used in wire payloads (`"jpg"` / `"png"`).
    pub fn wire_name(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// A frame that has been decoded, resized, and re-encoded.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// Return the base64-encoded string only (no `data:…;base64,` prefix).
    pub fn to_base64(&self) -> String {
        B64.encode(&self.bytes)
    }
}

/// Decode `raw`, fit it to `max_width`, and encode as JPEG no larger than
/// `max_bytes`.
///
/// `quality` is a fraction in `0.0..=1.0`; out-of-range values are clamped.
pub fn encode_jpeg_within(
    raw: &[u8],
    max_width: Option<u32>,
    quality: f64,
    max_bytes: usize,
) -> Result<EncodedImage, ImageError> {
    let mut img = resize_to_width(decode(raw)?, max_width);
    let mut quality = quality.clamp(0.05, 1.0);
    let mut smallest = usize::MAX;

    loop {
        let bytes = jpeg_bytes(&img, quality)?;
        if bytes.len() <= max_bytes {
            return Ok(EncodedImage {
                format: ImageFormat::Jpeg,
                width: img.width(),
                height: img.height(),
                bytes,
            });
        }
        smallest = smallest.min(bytes.len());

        if quality > MIN_QUALITY {
            quality = (quality * QUALITY_STEP).max(MIN_QUALITY);
            continue;
        }

        let next_width = (f64::from(img.width()) * SHRINK_STEP).round() as u32;
        if next_width < MIN_WIDTH {
            return Err(ImageError::TooLarge {
                limit: max_bytes,
                smallest,
            });
        }
        img = resize_to_width(img, Some(next_width));
    }
}

/// Decode `raw`, fit it to `max_width`, and encode as PNG.
pub fn encode_png(raw: &[u8], max_width: Option<u32>) -> Result<EncodedImage, ImageError> {
    let img = resize_to_width(decode(raw)?, max_width);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(EncodedImage {
        format: ImageFormat::Png,
        width: img.width(),
        height: img.height(),
        bytes: out.into_inner(),
    })
}

fn decode(raw: &[u8]) -> Result<DynamicImage, ImageError> {
    let fmt = image::guess_format(raw).map_err(|_| ImageError::UnsupportedFormat)?;
    image::load_from_memory_with_format(raw, fmt).map_err(|e| ImageError::Decode(e.to_string()))
}

fn jpeg_bytes(img: &DynamicImage, quality: f64) -> Result<Vec<u8>, ImageError> {
    let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut out = Vec::new();
    let rgb = img.to_rgb8();
    JpegEncoder::new_with_quality(&mut out, q)
        .encode_image(&rgb)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(out)
}

fn resize_to_width(img: DynamicImage, max_width: Option<u32>) -> DynamicImage {
    let Some(max_width) = max_width.filter(|w| *w > 0) else {
        return img;
    };
    let (w, h) = (img.width(), img.height());
    if w <= max_width {
        return img;
    }
    let ratio = f64::from(max_width) / f64::from(w);
    let new_h = ((f64::from(h) * ratio).round() as u32).max(1);
    img.resize_exact(max_width, new_h, image::imageops::FilterType::Triangle)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
