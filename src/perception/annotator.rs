/// Render the scan overlay onto an RGBA canvas sized like the display.
///
/// The area outside the scan window is darkened, the window gets corner
/// brackets, and the accepted detection is drawn as a translucent fill.
use crate::config::OverlayConfig;
use crate::errors::{LightScanError, LightScanResult};
use crate::perception::scan_window::{Point, ScanWindow};
use crate::perception::types::{PixelRect, Size};

/// Everything needed to draw one preview frame.
#[derive(Debug, Clone)]
pub struct OverlayFrame {
    pub display: Size,
    pub scan_window: ScanWindow,
    pub detection: Option<PixelRect>,
}

impl OverlayFrame {
    pub fn new(display: Size, style: &OverlayConfig) -> Self {
        Self {
            display,
            scan_window: ScanWindow::centered(display, style.scan_window_size),
            detection: None,
        }
    }

    pub fn with_detection(mut self, rect: PixelRect) -> Self {
        self.detection = Some(rect);
        self
    }
}

/// Blank canvas matching the display bounds (at least 1×1).
pub fn blank_canvas(display: Size) -> image::RgbaImage {
    let w = display.width.round().max(1.0) as u32;
    let h = display.height.round().max(1.0) as u32;
    image::RgbaImage::from_pixel(w, h, image::Rgba([40, 40, 40, 255]))
}

pub fn annotate(canvas: &mut image::RgbaImage, overlay: &OverlayFrame, style: &OverlayConfig) {
    let dim = [0, 0, 0, (style.dim_alpha.clamp(0.0, 1.0) * 255.0).round() as u8];
    for region in overlay.scan_window.dim_regions(overlay.display) {
        fill_rect(canvas, &region, dim);
    }

    if let Some(rect) = &overlay.detection {
        fill_rect(canvas, rect, style.detection_rgba);
    }

    let thickness = style.line_width.max(1) as f64;
    for bracket in overlay.scan_window.corner_brackets(style.corner_fraction) {
        draw_segment(canvas, bracket[0], bracket[1], thickness, style.stroke_rgba);
        draw_segment(canvas, bracket[1], bracket[2], thickness, style.stroke_rgba);
    }
}

pub fn encode_png(canvas: &image::RgbaImage) -> LightScanResult<Vec<u8>> {
    let mut out = Vec::new();
    canvas
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| LightScanError::Image(format!("PNG encode: {e}")))?;
    Ok(out)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

/// Axis-aligned segment drawn as a rectangle `thickness` wide, centred on the line.
fn draw_segment(canvas: &mut image::RgbaImage, a: Point, b: Point, thickness: f64, col: [u8; 4]) {
    let half = thickness / 2.0;
    let rect = PixelRect::new(
        a.x.min(b.x) - half,
        a.y.min(b.y) - half,
        (a.x - b.x).abs() + thickness,
        (a.y - b.y).abs() + thickness,
    );
    fill_rect(canvas, &rect, col);
}

fn fill_rect(canvas: &mut image::RgbaImage, rect: &PixelRect, col: [u8; 4]) {
    if !rect.is_finite() || rect.area() <= 0.0 {
        return;
    }
    let (w, h) = canvas.dimensions();
    let x0 = rect.x.floor().max(0.0) as u32;
    let y0 = rect.y.floor().max(0.0) as u32;
    let x1 = (rect.max_x().ceil().max(0.0) as u32).min(w);
    let y1 = (rect.max_y().ceil().max(0.0) as u32).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(canvas, x, y, col);
        }
    }
}

fn blend_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}
