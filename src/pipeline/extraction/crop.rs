//! Boundary-safe field cropping.
//!
//! A requested rectangle is clamped to the decoded source in a fixed order:
//! negative origins are raised to 0 (shrinking the extent by the overhang),
//! an origin past the right/bottom edge is pulled back to the last pixel,
//! then width/height are cut to fit. Every adjustment is logged and returned
//! as a [`ClampedGeometry`] so callers can surface it.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::models::{ClampPolicy, FieldGeometry};

/// Signed working rectangle. Wide enough that clamping arithmetic never overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl CropRect {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }
}

impl From<FieldGeometry> for CropRect {
    fn from(g: FieldGeometry) -> Self {
        Self {
            x: i64::from(g.x),
            y: i64::from(g.y),
            width: i64::from(g.width),
            height: i64::from(g.height),
        }
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Record of a rectangle that had to be adjusted to fit the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClampedGeometry {
    pub requested: CropRect,
    pub applied: CropRect,
}

/// Encoded crop plus the rectangle actually cut out.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    pub png: Vec<u8>,
    pub applied: CropRect,
    pub clamp: Option<ClampedGeometry>,
}

/// Fit `rect` inside a `max_width` x `max_height` canvas.
///
/// Returns the applied rectangle and, when anything changed, the clamp record.
/// Fails with [`ExtractionError::EmptyRegion`] if nothing is left to crop.
pub fn clamp_rect(
    rect: CropRect,
    max_width: u32,
    max_height: u32,
    policy: ClampPolicy,
) -> Result<(CropRect, Option<ClampedGeometry>), ExtractionError> {
    let max_w = i64::from(max_width);
    let max_h = i64::from(max_height);
    let mut r = rect;

    if r.x < 0 {
        r.width += r.x;
        r.x = 0;
    }
    if r.y < 0 {
        r.height += r.y;
        r.y = 0;
    }
    if r.x > max_w {
        r.x = max_w - 1;
    }
    if r.y > max_h {
        r.y = match policy {
            ClampPolicy::Corrected => max_h - 1,
            // Pulls y back against the width, not the height.
            ClampPolicy::Legacy => max_w - 1,
        };
    }
    if r.x + r.width > max_w {
        r.width = max_w - r.x;
    }
    if r.y + r.height > max_h {
        r.height = max_h - r.y;
    }

    if r.width <= 0 || r.height <= 0 || r.x < 0 || r.y < 0 {
        return Err(ExtractionError::EmptyRegion {
            rect: r,
            max_width,
            max_height,
        });
    }

    let clamp = (r != rect).then_some(ClampedGeometry {
        requested: rect,
        applied: r,
    });
    Ok((r, clamp))
}

/// Cut `rect` out of an already decoded image.
pub fn crop_image(
    img: &DynamicImage,
    rect: CropRect,
    policy: ClampPolicy,
) -> Result<(DynamicImage, CropRect, Option<ClampedGeometry>), ExtractionError> {
    let (width, height) = img.dimensions();
    let (applied, clamp) = clamp_rect(rect, width, height, policy)?;
    // clamp_rect guarantees a non-negative origin and an extent inside the canvas.
    let cropped = img.crop_imm(
        applied.x as u32,
        applied.y as u32,
        applied.width as u32,
        applied.height as u32,
    );
    Ok((cropped, applied, clamp))
}

/// Decode `source`, crop it and encode the crop as PNG.
pub fn crop_region(
    source: &Path,
    rect: CropRect,
    policy: ClampPolicy,
) -> Result<CroppedRegion, ExtractionError> {
    crop_and_encode(source, None, rect, policy)
}

/// Like [`crop_region`], and also write the PNG to `output`.
pub fn crop_to_file(
    source: &Path,
    rect: CropRect,
    output: &Path,
    policy: ClampPolicy,
) -> Result<CroppedRegion, ExtractionError> {
    let region = crop_and_encode(source, Some(output), rect, policy)?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, &region.png)?;
    tracing::debug!(output = %output.display(), bytes = region.png.len(), "Crop written");

    Ok(region)
}

fn crop_and_encode(
    source: &Path,
    output: Option<&Path>,
    rect: CropRect,
    policy: ClampPolicy,
) -> Result<CroppedRegion, ExtractionError> {
    let img = decode_source(source)?;
    let (cropped, applied, clamp) = crop_image(&img, rect, policy)?;

    if let Some(ref c) = clamp {
        tracing::warn!(
            source = %source.display(),
            output = %output.map(|p| p.display().to_string()).unwrap_or_default(),
            requested = %c.requested,
            applied = %c.applied,
            "Crop rectangle clamped to image bounds"
        );
    }

    Ok(CroppedRegion {
        png: encode_png(&cropped)?,
        applied,
        clamp,
    })
}

pub fn decode_source(path: &Path) -> Result<DynamicImage, ExtractionError> {
    image::open(path).map_err(|e| ExtractionError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Measured `(width, height)` of an image file, without a full decode.
pub fn measure_source(path: &Path) -> Result<(u32, u32), ExtractionError> {
    image::image_dimensions(path).map_err(|e| ExtractionError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Turn a stored location into a filesystem path. Accepts a `file://` prefix.
pub fn resolve_location(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

/// Where the crop artifact for `field` on an image lives.
///
/// With a crop directory each image gets its own subdirectory holding
/// `<field>.png`. Without one the field name and `.png` are appended to the
/// image location itself.
pub fn crop_output_path(
    image_name: &str,
    location: &str,
    field: &str,
    crop_dir: Option<&Path>,
) -> PathBuf {
    match crop_dir {
        Some(dir) => dir.join(image_name).join(format!("{field}.png")),
        None => {
            let mut path = resolve_location(location).into_os_string();
            path.push(format!("{field}.png"));
            PathBuf::from(path)
        }
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}
