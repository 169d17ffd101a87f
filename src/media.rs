//! Decoded media representation and display geometry.

use crate::error::MediaError;
use std::path::Path;

/// A decoded, display-ready image: tightly packed RGBA pixels.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Size of the decoded payload in bytes, used for cache accounting.
    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// Decode an image file into RGBA pixels. An extension the decoder does not
/// recognize is reported as `UnsupportedFormat` without touching the file.
pub fn decode_image(path: &Path) -> Result<DecodedImage, MediaError> {
    if image::ImageFormat::from_path(path).is_err() {
        return Err(MediaError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }
    let img = image::open(path).map_err(|e| MediaError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage {
        pixels: rgba.into_raw(),
        width,
        height,
    })
}

/// How media is scaled onto the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Letterbox/pillarbox, whole image visible.
    Fit,
    /// Crop to fill the screen.
    Fill,
    /// Ignore aspect ratio.
    Stretch,
}

impl ScaleMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "fill" => ScaleMode::Fill,
            "stretch" => ScaleMode::Stretch,
            _ => ScaleMode::Fit,
        }
    }
}

/// A destination or crop rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Aspect-preserving fit: the largest centered rectangle inside the screen
/// that keeps the image's ratio.
pub fn fit_rect(img_w: u32, img_h: u32, screen_w: u32, screen_h: u32) -> Rect {
    let img_ratio = img_w as f32 / img_h as f32;
    let screen_ratio = screen_w as f32 / screen_h as f32;

    let (w, h) = if img_ratio > screen_ratio {
        (screen_w, (screen_w as f32 / img_ratio) as u32)
    } else {
        ((screen_h as f32 * img_ratio) as u32, screen_h)
    };

    Rect {
        x: ((screen_w - w) / 2) as i32,
        y: ((screen_h - h) / 2) as i32,
        width: w,
        height: h,
    }
}

/// Aspect-preserving fill: the centered source crop that covers the whole
/// screen after scaling.
pub fn fill_crop(img_w: u32, img_h: u32, screen_w: u32, screen_h: u32) -> Rect {
    let img_ratio = img_w as f32 / img_h as f32;
    let screen_ratio = screen_w as f32 / screen_h as f32;

    let (crop_w, crop_h) = if img_ratio > screen_ratio {
        ((img_h as f32 * screen_ratio) as u32, img_h)
    } else {
        (img_w, (img_w as f32 / screen_ratio) as u32)
    };

    Rect {
        x: ((img_w - crop_w) / 2) as i32,
        y: ((img_h - crop_h) / 2) as i32,
        width: crop_w,
        height: crop_h,
    }
}

/// Coarse classification by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

pub fn media_kind(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(e) if VIDEO_EXTENSIONS.contains(&e.as_str()) => MediaKind::Video,
        _ => MediaKind::Image,
    }
}
