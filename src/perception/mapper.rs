//! Detector box → preview pixels.
//!
//! The detector reports boxes normalised to the sensor buffer with a
//! bottom-left origin. The preview shows that buffer rotated onto the screen
//! and scaled with aspect-fill, centred, with a top-left origin.

use serde::{Deserialize, Serialize};

use crate::perception::types::{NormalizedRect, PixelRect, Size};

/// How the sensor buffer is rotated onto the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// Buffer and display share an orientation.
    None,
    /// Landscape sensor shown on a portrait display.
    #[default]
    Clockwise90,
}

impl Rotation {
    /// Buffer size as it appears after rotation.
    pub fn apply_to_size(self, buffer: Size) -> Size {
        match self {
            Rotation::None => buffer,
            Rotation::Clockwise90 => Size::new(buffer.height, buffer.width),
        }
    }
}

/// Map with the default 90° rotation (landscape buffer, portrait display).
pub fn map_to_display(bbox: &NormalizedRect, buffer: Size, display: Size) -> PixelRect {
    map_to_display_with(bbox, buffer, display, Rotation::Clockwise90)
}

pub fn map_to_display_with(
    bbox: &NormalizedRect,
    buffer: Size,
    display: Size,
    rotation: Rotation,
) -> PixelRect {
    // Normalised → buffer pixels, flipping y to a top-left origin.
    let bx = bbox.x * buffer.width;
    let by = (1.0 - bbox.y - bbox.height) * buffer.height;
    let bw = bbox.width * buffer.width;
    let bh = bbox.height * buffer.height;

    let rotated = match rotation {
        Rotation::None => PixelRect::new(bx, by, bw, bh),
        Rotation::Clockwise90 => PixelRect::new(buffer.height - by - bh, bx, bh, bw),
    };

    let content = rotation.apply_to_size(buffer);
    let scale = aspect_fill_scale(buffer, display, rotation);

    let offset_x = (display.width - content.width * scale) / 2.0;
    let offset_y = (display.height - content.height * scale) / 2.0;

    PixelRect::new(
        rotated.x * scale + offset_x,
        rotated.y * scale + offset_y,
        rotated.width * scale,
        rotated.height * scale,
    )
}

/// Uniform scale that makes the rotated buffer cover the display.
/// Degenerate sizes yield `1.0`.
pub fn aspect_fill_scale(buffer: Size, display: Size, rotation: Rotation) -> f64 {
    if buffer.is_empty() || display.is_empty() {
        return 1.0;
    }
    let content = rotation.apply_to_size(buffer);
    let scale = (display.width / content.width).max(display.height / content.height);
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}
