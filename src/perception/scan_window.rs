/// Scan-window overlay geometry: the square crop guide in the middle of the
/// preview, its corner brackets, and the dimmed area around it.
use serde::{Deserialize, Serialize};

use crate::perception::types::{PixelRect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An L-shaped bracket: `[leg end, corner, leg end]`.
pub type Bracket = [Point; 3];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub rect: PixelRect,
}

impl ScanWindow {
    /// Square of `side` pixels centred on the display.
    pub fn centered(display: Size, side: f64) -> Self {
        let side = side.max(0.0);
        let cx = display.width / 2.0;
        let cy = display.height / 2.0;
        Self {
            rect: PixelRect::new(cx - side / 2.0, cy - side / 2.0, side, side),
        }
    }

    /// Brackets in order top-left, top-right, bottom-right, bottom-left.
    /// Each leg is `height * corner_fraction` long.
    pub fn corner_brackets(&self, corner_fraction: f64) -> [Bracket; 4] {
        let r = &self.rect;
        let len = r.height * corner_fraction.clamp(0.0, 0.5);
        let (x0, y0, x1, y1) = (r.x, r.y, r.max_x(), r.max_y());
        [
            [Point::new(x0, y0 + len), Point::new(x0, y0), Point::new(x0 + len, y0)],
            [Point::new(x1 - len, y0), Point::new(x1, y0), Point::new(x1, y0 + len)],
            [Point::new(x1, y1 - len), Point::new(x1, y1), Point::new(x1 - len, y1)],
            [Point::new(x0, y1 - len), Point::new(x0, y1), Point::new(x0 + len, y1)],
        ]
    }

    /// Display area outside the window as up to four non-overlapping bands
    /// (top, bottom, left, right). Empty bands are omitted.
    pub fn dim_regions(&self, display: Size) -> Vec<PixelRect> {
        let w = display.width.max(0.0);
        let h = display.height.max(0.0);
        let top = self.rect.y.clamp(0.0, h);
        let bottom = self.rect.max_y().clamp(0.0, h);
        let left = self.rect.x.clamp(0.0, w);
        let right = self.rect.max_x().clamp(0.0, w);

        [
            PixelRect::new(0.0, 0.0, w, top),
            PixelRect::new(0.0, bottom, w, h - bottom),
            PixelRect::new(0.0, top, left, bottom - top),
            PixelRect::new(right, top, w - right, bottom - top),
        ]
        .into_iter()
        .filter(|r| r.area() > 0.0)
        .collect()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.rect.x && x <= self.rect.max_x() && y >= self.rect.y && y <= self.rect.max_y()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_centred() {
        let win = ScanWindow::centered(Size::new(480.0, 640.0), 120.0);
        assert_eq!(win.rect, PixelRect::new(180.0, 260.0, 120.0, 120.0));
        assert!(win.contains_point(240.0, 320.0));
        assert!(!win.contains_point(10.0, 10.0));
    }

    #[test]
    fn brackets_have_expected_legs() {
        let win = ScanWindow::centered(Size::new(480.0, 640.0), 100.0);
        let brackets = win.corner_brackets(0.16);
        let [tl, tr, br, bl] = brackets;
        assert_eq!(tl[1], Point::new(190.0, 270.0));
        assert!((tl[0].y - 286.0).abs() < 1e-9);
        assert!((tl[2].x - 206.0).abs() < 1e-9);
        assert_eq!(tr[1], Point::new(290.0, 270.0));
        assert_eq!(br[1], Point::new(290.0, 370.0));
        assert_eq!(bl[1], Point::new(190.0, 370.0));
    }

    #[test]
    fn dim_regions_cover_everything_but_the_window() {
        let display = Size::new(480.0, 640.0);
        let win = ScanWindow::centered(display, 120.0);
        let regions = win.dim_regions(display);
        assert_eq!(regions.len(), 4);
        let dimmed: f64 = regions.iter().map(|r| r.area()).sum();
        assert!((dimmed + win.rect.area() - display.width * display.height).abs() < 1e-6);
    }

    #[test]
    fn oversized_window_leaves_nothing_to_dim() {
        let display = Size::new(100.0, 100.0);
        let win = ScanWindow::centered(display, 300.0);
        assert!(win.dim_regions(display).is_empty());
    }
}
