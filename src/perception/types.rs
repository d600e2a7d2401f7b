use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{LightScanError, LightScanResult};

/// Width/height pair, used for both sensor buffers and display bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Detector-space rectangle. All components are fractions of the frame in
/// `[0, 1]`, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    /// Rejects components outside `[0, 1]` and boxes that leave the frame.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> LightScanResult<Self> {
        let rect = Self { x, y, width, height };
        rect.validate()?;
        Ok(rect)
    }

    /// Clamp detector output that overshoots the frame by float noise.
    pub fn clamped(x: f64, y: f64, width: f64, height: f64) -> Self {
        let x = clamp_unit(x);
        let y = clamp_unit(y);
        Self {
            x,
            y,
            width: clamp_unit(width).min(1.0 - x),
            height: clamp_unit(height).min(1.0 - y),
        }
    }

    pub fn validate(&self) -> LightScanResult<()> {
        let parts = [self.x, self.y, self.width, self.height];
        if parts.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(LightScanError::InvalidDetection(format!(
                "bounding box component out of [0,1]: {:?}",
                self
            )));
        }
        // Small tolerance for boxes that touch the right/top edge.
        if self.x + self.width > 1.0 + 1e-6 || self.y + self.height > 1.0 + 1e-6 {
            return Err(LightScanError::InvalidDetection(format!(
                "bounding box extends past the frame: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Display-space rectangle in pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One labelled box produced by a single inference pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: NormalizedRect,
}

impl Detection {
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        bbox: NormalizedRect,
    ) -> LightScanResult<Self> {
        let det = Self {
            label: label.into(),
            confidence,
            bbox,
        };
        det.validate()?;
        Ok(det)
    }

    /// Recordings and detector back-ends deserialize straight into this type,
    /// so they re-check the invariants here.
    pub fn validate(&self) -> LightScanResult<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LightScanError::InvalidDetection(format!(
                "confidence {} out of [0,1] for '{}'",
                self.confidence, self.label
            )));
        }
        self.bbox.validate()
    }
}

/// Highest-confidence detection of a frame, if any.
pub fn top_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// A captured video frame. Pixel data is shared, so clones are cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Frame {
    pub fn new(id: u64, width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            width,
            height,
            data: data.into(),
            captured_at: chrono::Utc::now(),
        }
    }

    /// Frame without pixel data, for sources that only carry geometry.
    pub fn blank(id: u64, width: u32, height: u32) -> Self {
        Self::new(id, width, height, Vec::<u8>::new())
    }

    pub fn buffer_size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_boxes() {
        assert!(NormalizedRect::new(0.2, 0.2, 0.5, 0.5).is_ok());
        assert!(NormalizedRect::new(-0.1, 0.2, 0.5, 0.5).is_err());
        assert!(NormalizedRect::new(0.8, 0.2, 0.5, 0.5).is_err());
        assert!(NormalizedRect::new(0.0, 0.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn clamped_stays_inside_frame() {
        let r = NormalizedRect::clamped(0.9, -0.05, 0.3, 1.2);
        assert!(r.validate().is_ok());
        assert_eq!(r.y, 0.0);
        assert!((r.width - 0.1).abs() < 1e-9);
        assert_eq!(r.height, 1.0);
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let bbox = NormalizedRect::new(0.1, 0.1, 0.1, 0.1).unwrap();
        assert!(Detection::new("abs", 1.2, bbox).is_err());
        assert!(Detection::new("abs", 0.95, bbox).is_ok());
    }

    #[test]
    fn top_detection_picks_highest_confidence() {
        let bbox = NormalizedRect::new(0.1, 0.1, 0.1, 0.1).unwrap();
        let dets = vec![
            Detection::new("oil", 0.4, bbox).unwrap(),
            Detection::new("battery", 0.93, bbox).unwrap(),
            Detection::new("abs", 0.7, bbox).unwrap(),
        ];
        assert_eq!(top_detection(&dets).map(|d| d.label.as_str()), Some("battery"));
        assert!(top_detection(&[]).is_none());
    }
}
